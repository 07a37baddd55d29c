//! Linking objects and the kernel library into one binary.

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::{Error, IoContext, Result};
use crate::process::ToolCommand;

/// Inputs a legacy multiboot link needs: the boot stubs plus the kernel body.
pub const LEGACY_MIN_INPUTS: usize = 3;

/// Linker script, tagged with the boot mode it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkerScript {
    Legacy(PathBuf),
    Uefi(PathBuf),
}

impl LinkerScript {
    pub fn path(&self) -> &Path {
        match self {
            Self::Legacy(path) | Self::Uefi(path) => path,
        }
    }

    pub fn min_inputs(&self) -> usize {
        match self {
            Self::Legacy(_) => LEGACY_MIN_INPUTS,
            Self::Uefi(_) => 0,
        }
    }
}

/// Link `inputs` against `script` into `output`.
///
/// The input count is checked before the linker runs.
pub fn link(
    linker: &ToolCommand,
    script: &LinkerScript,
    inputs: Vec<Artifact>,
    output: &Path,
    echo: bool,
) -> Result<Artifact> {
    if inputs.len() < script.min_inputs() {
        return Err(Error::tool(
            linker.program(),
            format!(
                "linker script '{}' needs at least {} inputs, got {}",
                script.path().display(),
                script.min_inputs(),
                inputs.len()
            ),
        ));
    }
    if !script.path().is_file() {
        return Err(Error::config(format!(
            "linker script '{}' not found",
            script.path().display()
        )));
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).path_context("creating output directory", parent)?;
    }

    linker
        .cmd()
        .arg("--nmagic")
        .arg("-T")
        .arg_path(script.path())
        .args(inputs.iter().map(|input| input.path().as_os_str()))
        .arg("-o")
        .arg_path(output)
        .output(output)
        .fail_on("undefined reference")
        .error_msg("link failed")
        .echo(echo)
        .run()?;

    println!("  Linked {}", output.display());
    Ok(Artifact::new(ArtifactKind::LinkedBinary, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_script, Workspace, FAKE_LD};

    fn fake_linker(ws: &Workspace) -> ToolCommand {
        let script = write_script(&ws.path("fake-tools"), "ld.sh", FAKE_LD);
        ToolCommand::with_args("sh", vec![script.display().to_string()])
    }

    fn objects(ws: &Workspace, names: &[&str]) -> Vec<Artifact> {
        names
            .iter()
            .map(|name| Artifact::new(ArtifactKind::Object, ws.write(name, name.as_bytes())))
            .collect()
    }

    #[test]
    fn test_legacy_link_requires_three_inputs() {
        let ws = Workspace::new();
        ws.seed_sources();
        // A linker that would leave a trace if it ever ran.
        let marker = ws.path("linker-ran");
        let script = write_script(
            &ws.path("fake-tools"),
            "trace.sh",
            &format!("touch '{}'", marker.display()),
        );
        let tracing_linker = ToolCommand::with_args("sh", vec![script.display().to_string()]);

        let err = link(
            &tracing_linker,
            &LinkerScript::Legacy(ws.path("linker.ld")),
            objects(&ws, &["a.o", "b.o"]),
            &ws.path("kernel.bin"),
            false,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("at least 3 inputs, got 2"));
        assert!(!marker.exists());
    }

    #[test]
    fn test_legacy_link_concatenates_in_order() {
        let ws = Workspace::new();
        ws.seed_sources();
        let output = ws.path("out/kernel.bin");
        let binary = link(
            &fake_linker(&ws),
            &LinkerScript::Legacy(ws.path("linker.ld")),
            objects(&ws, &["c.o", "b.o", "a.o"]),
            &output,
            false,
        )
        .unwrap();

        assert_eq!(binary.kind(), ArtifactKind::LinkedBinary);
        assert_eq!(fs::read_to_string(&output).unwrap(), "c.ob.oa.o");
    }

    #[test]
    fn test_uefi_link_has_no_legacy_minimum() {
        let ws = Workspace::new();
        ws.seed_sources();
        let binary = link(
            &fake_linker(&ws),
            &LinkerScript::Uefi(ws.path("kernel/linker.ld")),
            objects(&ws, &["librslib.a"]),
            &ws.path("target/kernel.elf"),
            false,
        )
        .unwrap();
        assert_eq!(fs::read_to_string(binary.path()).unwrap(), "librslib.a");
    }

    #[test]
    fn test_missing_script_is_config_error() {
        let ws = Workspace::new();
        let err = link(
            &fake_linker(&ws),
            &LinkerScript::Uefi(ws.path("missing.ld")),
            objects(&ws, &["lib.a"]),
            &ws.path("kernel.elf"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
