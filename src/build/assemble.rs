//! Boot stub assembly.
//!
//! Each `.asm` file is assembled on its own into a 64-bit ELF object under
//! the staging directory. The object list comes back in descending path order
//! so the link line is the same on every run.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::{Error, IoContext, Result};
use crate::paths::{object_path, OBJECT_EXTENSION};
use crate::process::ToolCommand;

pub const SOURCE_EXTENSION: &str = "asm";

/// Assemble every source into `staging_dir`.
pub fn assemble(
    assembler: &ToolCommand,
    sources: &[PathBuf],
    staging_dir: &Path,
    echo: bool,
) -> Result<Vec<Artifact>> {
    fs::create_dir_all(staging_dir).path_context("creating object directory", staging_dir)?;

    let mut objects = Vec::with_capacity(sources.len());
    for source in sources {
        let object = object_path(staging_dir, source);
        assembler
            .cmd()
            .args(["-f", "elf64"])
            .arg_path(source)
            .arg("-o")
            .arg_path(&object)
            .output(&object)
            .fail_on("error:")
            .error_msg(format!("assembling {} failed", source.display()))
            .echo(echo)
            .run()?;
        println!(
            "  Assembled {}",
            source.file_name().unwrap_or_default().to_string_lossy()
        );
        objects.push(Artifact::new(ArtifactKind::Object, object));
    }

    Ok(sort_descending(objects))
}

/// All `.asm` files directly inside `dir`.
pub fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    files_with_extension(dir, SOURCE_EXTENSION)
}

/// Objects left behind by an earlier assembly run, reused instead of
/// invoking the assembler.
pub fn precompiled_objects(dir: &Path) -> Result<Vec<Artifact>> {
    let objects: Vec<Artifact> = files_with_extension(dir, OBJECT_EXTENSION)?
        .into_iter()
        .map(|path| Artifact::new(ArtifactKind::Object, path))
        .collect();
    if objects.is_empty() {
        return Err(Error::tool(
            "assembler",
            format!("no pre-assembled objects found in '{}'", dir.display()),
        ));
    }
    Ok(sort_descending(objects))
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::config(format!(
            "directory '{}' does not exist",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            Error::io(
                format!("reading directory '{}'", dir.display()),
                e.into(),
            )
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().is_some_and(|ext| ext == extension)
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn sort_descending(mut objects: Vec<Artifact>) -> Vec<Artifact> {
    objects.sort_by(|a, b| b.path().cmp(a.path()));
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_script, Workspace, FAKE_NASM};

    fn fake_assembler(ws: &Workspace) -> ToolCommand {
        let script = write_script(&ws.path("fake-tools"), "nasm.sh", FAKE_NASM);
        ToolCommand::with_args("sh", vec![script.display().to_string()])
    }

    #[test]
    fn test_assemble_one_object_per_source_descending() {
        let ws = Workspace::new();
        ws.seed_sources();
        let sources = discover_sources(&ws.path("src/boot")).unwrap();
        assert_eq!(sources.len(), 3);

        let staging = ws.path("target/debug/asm");
        let objects = assemble(&fake_assembler(&ws), &sources, &staging, false).unwrap();

        assert_eq!(objects.len(), sources.len());
        let names: Vec<String> = objects
            .iter()
            .map(|o| o.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["multiboot_header.o", "long_mode_init.o", "boot.o"]
        );
        for pair in objects.windows(2) {
            assert!(pair[0].path() > pair[1].path());
        }
        for object in &objects {
            assert_eq!(object.kind(), ArtifactKind::Object);
            assert!(object.path().is_file());
        }
    }

    #[test]
    fn test_discover_ignores_other_files() {
        let ws = Workspace::new();
        ws.seed_sources();
        let sources = discover_sources(&ws.path("src/boot")).unwrap();
        assert!(sources.iter().all(|s| s.extension().unwrap() == "asm"));
    }

    #[test]
    fn test_assembler_failure_is_tool_error() {
        let ws = Workspace::new();
        ws.seed_sources();
        let script = write_script(&ws.path("fake-tools"), "bad.sh", "echo 'syntax error' >&2\nexit 1");
        let tool = ToolCommand::with_args("sh", vec![script.display().to_string()]);
        let sources = discover_sources(&ws.path("src/boot")).unwrap();
        let err = assemble(&tool, &sources, &ws.path("target/asm"), false).unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_precompiled_objects_reused() {
        let ws = Workspace::new();
        ws.write("boot_temp/a.o", b"a");
        ws.write("boot_temp/c.o", b"c");
        ws.write("boot_temp/b.o", b"b");
        ws.write("boot_temp/notes.txt", b"x");
        let objects = precompiled_objects(&ws.path("boot_temp")).unwrap();
        let names: Vec<_> = objects
            .iter()
            .map(|o| o.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["c.o", "b.o", "a.o"]);
    }

    #[test]
    fn test_precompiled_objects_empty_dir() {
        let ws = Workspace::new();
        fs::create_dir_all(ws.path("boot_temp")).unwrap();
        assert!(precompiled_objects(&ws.path("boot_temp")).is_err());
    }
}
