//! EFI system partition layout for the UEFI path.
//!
//! The UEFI application becomes the default boot entry and the linked
//! kernel sits next to it:
//!
//! ```text
//! <output>/EFI/Boot/BootX64.efi
//! <output>/EFI/Boot/<kernel name>
//! ```

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::{Error, IoContext, Result};

pub const ESP_BOOT_DIR: &str = "EFI/Boot";
pub const BOOT_APPLICATION_NAME: &str = "BootX64.efi";

/// Copy the kernel and the UEFI application into the ESP directory.
pub fn package_esp(
    kernel: Artifact,
    firmware: Artifact,
    esp_dir: &Path,
    kernel_name: &str,
) -> Result<Artifact> {
    println!("Packaging EFI system partition...");
    for input in [&kernel, &firmware] {
        if !input.path().is_file() {
            return Err(Error::Packaging(format!(
                "{} not found at '{}'",
                input.kind().as_str(),
                input.path().display()
            )));
        }
    }

    let boot_dir = esp_dir.join(ESP_BOOT_DIR);
    fs::create_dir_all(&boot_dir).path_context("creating ESP boot directory", &boot_dir)?;

    copy_artifact(firmware.path(), &boot_dir.join(BOOT_APPLICATION_NAME))?;
    copy_artifact(kernel.path(), &boot_dir.join(kernel_name))?;

    println!("  Staged {}", boot_dir.display());
    Ok(Artifact::new(ArtifactKind::EspTree, esp_dir))
}

/// Copy `src` to `dst`. Copying a file onto itself is a no-op.
pub fn copy_artifact(src: &Path, dst: &Path) -> Result<()> {
    if is_same_file(src, dst) {
        warn!(path = %src.display(), "source and destination are the same file, not copying");
        return Ok(());
    }
    fs::copy(src, dst)
        .io_context(|| format!("copying '{}' -> '{}'", src.display(), dst.display()))?;
    Ok(())
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
