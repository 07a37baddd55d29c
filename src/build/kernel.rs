//! Cross-compilation of the kernel body and of the UEFI application.
//!
//! Both are plain `cargo build` runs against a bare-metal target. Host
//! `RUSTFLAGS` are cleared so they cannot leak into the cross build.

use std::path::{Path, PathBuf};

use crate::artifact::{Artifact, ArtifactKind};
use crate::build::Profile;
use crate::config::{AreaName, BootMode, BuildArea, BuildConfiguration, Settings};
use crate::error::Result;
use crate::paths::{efi_application_path, static_library_path};
use crate::process::{Cmd, ToolCommand};

pub const UEFI_TARGET: &str = "x86_64-unknown-uefi";

/// What to compile for the kernel body.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub crate_dir: PathBuf,
    pub library: String,
    pub features: Vec<String>,
    pub profile: Profile,
    pub target: &'static str,
}

impl KernelSpec {
    pub fn from_config(
        config: &BuildConfiguration,
        settings: &Settings,
        mode: BootMode,
    ) -> Result<Self> {
        let kernel = config.area(AreaName::Kernel);
        Ok(Self {
            crate_dir: settings.resolve(&kernel.path("path")?),
            library: kernel.string("library")?.to_string(),
            features: kernel.strings("features")?,
            profile: Profile::from_release(settings.release || kernel.bool("release")?),
            target: mode.kernel_target(),
        })
    }
}

/// What to compile for the UEFI application.
#[derive(Debug, Clone)]
pub struct FirmwareSpec {
    pub crate_dir: PathBuf,
    pub package: String,
    pub profile: Profile,
}

impl FirmwareSpec {
    pub fn from_config(config: &BuildConfiguration, settings: &Settings) -> Result<Self> {
        let uefi = config.area(AreaName::Uefi);
        let release = uefi.optional("release", BuildArea::bool)?;
        let release = match release {
            Some(release) => release,
            None => config.area(AreaName::Kernel).bool("release")?,
        };
        Ok(Self {
            crate_dir: settings.resolve(&uefi.path("path")?),
            package: uefi.string("package")?.to_string(),
            profile: Profile::from_release(settings.release || release),
        })
    }
}

/// Build the kernel body; returns the static library.
pub fn compile_kernel(cargo: &ToolCommand, spec: &KernelSpec, echo: bool) -> Result<Artifact> {
    println!(
        "Building kernel ({}, {})...",
        spec.target,
        spec.profile.as_str()
    );

    let library = static_library_path(&spec.crate_dir, spec.target, spec.profile, &spec.library);
    let mut cmd = cargo_build(cargo, &spec.crate_dir, spec.target, spec.profile);
    if !spec.features.is_empty() {
        cmd = cmd.arg("--features").arg(spec.features.join(" "));
    }
    cmd.output(&library)
        .error_msg("kernel build failed")
        .echo(echo)
        .run()?;

    println!("  Built {}", library.display());
    Ok(Artifact::new(ArtifactKind::StaticLibrary, library))
}

/// Build the UEFI application that loads the kernel.
pub fn build_firmware(cargo: &ToolCommand, spec: &FirmwareSpec, echo: bool) -> Result<Artifact> {
    println!("Building UEFI application {}...", spec.package);

    let application = efi_application_path(&spec.crate_dir, UEFI_TARGET, spec.profile, &spec.package);
    cargo_build(cargo, &spec.crate_dir, UEFI_TARGET, spec.profile)
        .args(["--package", spec.package.as_str()])
        .output(&application)
        .error_msg("UEFI application build failed")
        .echo(echo)
        .run()?;

    println!("  Built {}", application.display());
    Ok(Artifact::new(ArtifactKind::FirmwareApplication, application))
}

fn cargo_build(
    cargo: &ToolCommand,
    crate_dir: &Path,
    target: &str,
    profile: Profile,
) -> Cmd {
    let mut cmd = cargo
        .cmd()
        .arg("build")
        .arg("--manifest-path")
        .arg_path(&crate_dir.join("Cargo.toml"))
        .args(["--target", target])
        .env("RUSTFLAGS", "");
    if profile == Profile::Release {
        cmd = cmd.arg("--release");
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testutil::Workspace;

    #[test]
    fn test_kernel_spec_from_config() {
        let ws = Workspace::new();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let spec = KernelSpec::from_config(&config, &ws.settings(), BootMode::Multiboot).unwrap();
        assert_eq!(spec.crate_dir, ws.path("kernel"));
        assert_eq!(spec.features, vec!["pic"]);
        assert_eq!(spec.profile, Profile::Debug);
        assert_eq!(spec.target, "x86_64-unknown-none");
    }

    #[test]
    fn test_release_override() {
        let ws = Workspace::new();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let mut settings = ws.settings();
        settings.release = true;
        let spec = KernelSpec::from_config(&config, &settings, BootMode::Multiboot).unwrap();
        assert_eq!(spec.profile, Profile::Release);
    }

    #[test]
    fn test_compile_kernel_with_fake_cargo() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let spec = KernelSpec::from_config(&config, &ws.settings(), BootMode::Multiboot).unwrap();
        let cargo = config.toolchain().unwrap().cargo;

        let library = compile_kernel(&cargo, &spec, false).unwrap();
        assert_eq!(library.kind(), ArtifactKind::StaticLibrary);
        assert_eq!(
            library.path(),
            ws.path("kernel/target/x86_64-unknown-none/debug/librslib.a")
        );
    }

    #[test]
    fn test_missing_library_is_tool_error() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let mut spec =
            KernelSpec::from_config(&config, &ws.settings(), BootMode::Multiboot).unwrap();
        spec.library = "other".into();
        let cargo = config.toolchain().unwrap().cargo;

        let err = compile_kernel(&cargo, &spec, false).unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
        assert!(err.to_string().contains("libother.a"));
    }

    #[test]
    fn test_build_firmware_with_fake_cargo() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.uefi_config()).unwrap();
        let spec = FirmwareSpec::from_config(&config, &ws.settings()).unwrap();
        assert_eq!(spec.profile, Profile::Release);
        let cargo = config.toolchain().unwrap().cargo;

        let app = build_firmware(&cargo, &spec, false).unwrap();
        assert_eq!(
            app.path(),
            ws.path("uefis/target/x86_64-unknown-uefi/release/uefis.efi")
        );
    }
}
