//! Build orchestration.
//!
//! Chains the build steps for the active boot mode:
//!
//! - multiboot: assemble (or reuse objects) → compile → link → ISO
//! - UEFI: compile → link → build UEFI application → ESP tree

use std::path::PathBuf;

use tracing::{debug, info};

use crate::artifact::esp::package_esp;
use crate::artifact::iso::{package_iso, IsoOptions};
use crate::artifact::{sha256_file, Artifact};
use crate::build::assemble::{assemble, discover_sources, precompiled_objects};
use crate::build::kernel::{build_firmware, compile_kernel, FirmwareSpec, KernelSpec};
use crate::build::link::{link, LinkerScript};
use crate::config::{AreaName, BootMode, BuildArea, BuildConfiguration, Settings, Toolchain};
use crate::error::Result;
use crate::paths::asm_staging_dir;

/// Staging tree handed to the ISO tool, below the target directory.
pub const ISO_STAGING_DIR: &str = "isofiles";

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub mode: BootMode,
    /// ISO image or ESP directory.
    pub image: Artifact,
    /// The linked kernel binary.
    pub kernel: PathBuf,
    pub kernel_sha256: String,
}

/// Runs the pipeline for one configuration.
pub struct BuildOrchestrator<'a> {
    config: &'a BuildConfiguration,
    settings: &'a Settings,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(config: &'a BuildConfiguration, settings: &'a Settings) -> Self {
        Self { config, settings }
    }

    pub fn build(&self) -> Result<BuildOutput> {
        let mode = self.config.boot_mode()?;
        let tools = self.config.toolchain()?;
        info!(mode = mode.area().as_str(), "building kernel image");

        let (image, kernel) = match mode {
            BootMode::Multiboot => self.build_multiboot(&tools)?,
            BootMode::Uefi => self.build_uefi(&tools)?,
        };

        let kernel_sha256 = sha256_file(&kernel)?;
        debug!(kernel = %kernel.display(), sha256 = %kernel_sha256, "linked kernel");
        Ok(BuildOutput {
            mode,
            image,
            kernel,
            kernel_sha256,
        })
    }

    fn echo(&self) -> bool {
        self.settings.verbose
    }

    fn build_multiboot(&self, tools: &Toolchain) -> Result<(Artifact, PathBuf)> {
        let multiboot = self.config.area(AreaName::Multiboot);
        let spec = KernelSpec::from_config(self.config, self.settings, BootMode::Multiboot)?;

        println!("Assembling boot stubs...");
        let mut inputs = if multiboot.bool("tempfile")? {
            precompiled_objects(&self.settings.resolve(&multiboot.path("temp_dir")?))?
        } else {
            let sources = discover_sources(&self.settings.resolve(&multiboot.path("sources")?))?;
            let staging = asm_staging_dir(&self.settings.target_dir(), spec.profile);
            assemble(&tools.assembler, &sources, &staging, self.echo())?
        };

        inputs.push(compile_kernel(&tools.cargo, &spec, self.echo())?);

        let script = LinkerScript::Legacy(self.settings.resolve(&multiboot.path("linker_script")?));
        let output = self.settings.resolve(&multiboot.path("output")?);
        let kernel = link(&tools.linker, &script, inputs, &output, self.echo())?;
        let kernel_path = kernel.path().to_path_buf();

        let iso = self.config.area(AreaName::Iso);
        let options = IsoOptions {
            staging_root: self.settings.target_dir().join(ISO_STAGING_DIR),
            output_dir: match iso.optional("output", BuildArea::path)? {
                Some(dir) => self.settings.resolve(&dir),
                None => self.settings.target_dir(),
            },
            name: iso.string("name")?.to_string(),
            grub_cfg: self.settings.resolve(&iso.path("grub_cfg")?),
        };
        let image = package_iso(&tools.iso, kernel, &options, self.echo())?;
        Ok((image, kernel_path))
    }

    fn build_uefi(&self, tools: &Toolchain) -> Result<(Artifact, PathBuf)> {
        let uefi = self.config.area(AreaName::Uefi);
        let spec = KernelSpec::from_config(self.config, self.settings, BootMode::Uefi)?;
        let library = compile_kernel(&tools.cargo, &spec, self.echo())?;

        let kernel_name = uefi.string("kernel_output")?;
        let script = LinkerScript::Uefi(self.settings.resolve(&uefi.path("linker_script")?));
        let output = self.settings.target_dir().join(kernel_name);
        let kernel = link(&tools.linker, &script, vec![library], &output, self.echo())?;
        let kernel_path = kernel.path().to_path_buf();

        let firmware = FirmwareSpec::from_config(self.config, self.settings)?;
        let application = build_firmware(&tools.cargo, &firmware, self.echo())?;

        let esp_dir = self.settings.resolve(&uefi.path("output")?);
        let image = package_esp(kernel, application, &esp_dir, kernel_name)?;
        Ok((image, kernel_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::artifact::ArtifactKind;
    use crate::error::Error;
    use crate::testutil::Workspace;

    #[test]
    fn test_multiboot_build_produces_iso() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let settings = ws.settings();

        let output = BuildOrchestrator::new(&config, &settings).build().unwrap();

        assert_eq!(output.mode, BootMode::Multiboot);
        assert_eq!(output.image.kind(), ArtifactKind::IsoImage);
        assert_eq!(output.image.path(), ws.path("target/myos.iso"));
        assert!(ws.path("target/debug/asm/boot.o").is_file());
        assert!(ws.path("target/isofiles/boot/kernel.bin").is_file());

        // Objects in descending order, then the library.
        let linked = fs::read_to_string(&output.kernel).unwrap();
        assert_eq!(linked, "header\nlong mode\nboot\nkernel-body");
    }

    #[test]
    fn test_multiboot_build_reuses_precompiled_objects() {
        let ws = Workspace::new();
        ws.seed_sources();
        ws.write("boot_temp/a.o", b"A");
        ws.write("boot_temp/b.o", b"B");
        let source = ws.multiboot_config().replace("tempfile = false", "tempfile = true");
        let config = BuildConfiguration::load(&source).unwrap();
        let settings = ws.settings();

        let output = BuildOrchestrator::new(&config, &settings).build().unwrap();

        assert!(!ws.path("target/debug/asm").exists());
        assert_eq!(fs::read_to_string(&output.kernel).unwrap(), "BAkernel-body");
    }

    #[test]
    fn test_uefi_build_stages_esp() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.uefi_config()).unwrap();
        let settings = ws.settings();

        let output = BuildOrchestrator::new(&config, &settings).build().unwrap();

        assert_eq!(output.mode, BootMode::Uefi);
        assert_eq!(output.image.kind(), ArtifactKind::EspTree);
        assert_eq!(output.kernel, ws.path("target/kernel"));
        assert_eq!(
            fs::read(ws.path("target/esp/EFI/Boot/BootX64.efi")).unwrap(),
            b"efi-app"
        );
        assert_eq!(
            fs::read(ws.path("target/esp/EFI/Boot/kernel")).unwrap(),
            b"kernel-body"
        );
        assert!(ws
            .path("kernel/target/x86_64-unknown-none/release/librslib.a")
            .is_file());
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let ws = Workspace::new();
        ws.seed_sources();
        let config = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let settings = ws.settings();
        let orchestrator = BuildOrchestrator::new(&config, &settings);

        let first = orchestrator.build().unwrap();
        let first_bytes = fs::read(&first.kernel).unwrap();
        let second = orchestrator.build().unwrap();

        assert_eq!(first.kernel_sha256, second.kernel_sha256);
        assert_eq!(first_bytes, fs::read(&second.kernel).unwrap());
    }

    #[test]
    fn test_missing_sources_dir_aborts() {
        let ws = Workspace::new();
        ws.seed_sources();
        let source = ws
            .multiboot_config()
            .replace("sources = \"src/boot\"", "sources = \"nowhere\"");
        let config = BuildConfiguration::load(&source).unwrap();
        let settings = ws.settings();

        let err = BuildOrchestrator::new(&config, &settings).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!ws.path("kernel/target").exists());
    }
}
