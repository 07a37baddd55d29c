//! Bootable ISO packaging for the multiboot path.
//!
//! The kernel and the GRUB configuration are staged into a filesystem tree:
//!
//! ```text
//! target/isofiles/
//! └── boot/
//!     ├── grub/grub.cfg
//!     └── kernel.bin
//! ```
//!
//! and the ISO tool turns the tree into `<name>.iso`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{sha256_file, Artifact, ArtifactKind};
use crate::error::{Error, IoContext, Result};
use crate::paths::{iso_file_name, staged_path};
use crate::process::ToolCommand;

pub const ISO_BOOT_DIR: &str = "boot";
pub const ISO_GRUB_DIR: &str = "boot/grub";
pub const GRUB_CFG_NAME: &str = "grub.cfg";
pub const CHECKSUM_SUFFIX: &str = "sha256";

/// Where the ISO is staged and written.
#[derive(Debug, Clone)]
pub struct IsoOptions {
    /// Root of the staging tree.
    pub staging_root: PathBuf,
    /// Directory receiving the `.iso`.
    pub output_dir: PathBuf,
    /// Requested image name, normalized by [`iso_file_name`].
    pub name: String,
    pub grub_cfg: PathBuf,
}

/// Create the staging tree and copy the kernel and grub.cfg into it.
///
/// Both inputs must exist; a missing one is a [`Error::Packaging`].
pub fn stage_iso_tree(kernel: &Path, grub_cfg: &Path, staging_root: &Path) -> Result<()> {
    if !kernel.is_file() {
        return Err(Error::Packaging(format!(
            "kernel binary not found at '{}'",
            kernel.display()
        )));
    }
    if !grub_cfg.is_file() {
        return Err(Error::Packaging(format!(
            "boot loader config not found at '{}'",
            grub_cfg.display()
        )));
    }

    let grub_dir = staging_root.join(ISO_GRUB_DIR);
    fs::create_dir_all(&grub_dir).path_context("creating ISO staging tree", &grub_dir)?;

    let staged_cfg = grub_dir.join(GRUB_CFG_NAME);
    fs::copy(grub_cfg, &staged_cfg).path_context("staging grub.cfg", &staged_cfg)?;

    let staged_kernel = staged_path(&staging_root.join(ISO_BOOT_DIR), kernel);
    fs::copy(kernel, &staged_kernel).path_context("staging kernel", &staged_kernel)?;

    Ok(())
}

/// Stage the tree and run the ISO tool. Returns the ISO image.
pub fn package_iso(
    iso_tool: &ToolCommand,
    kernel: Artifact,
    options: &IsoOptions,
    echo: bool,
) -> Result<Artifact> {
    println!("Packaging ISO...");
    stage_iso_tree(kernel.path(), &options.grub_cfg, &options.staging_root)?;

    fs::create_dir_all(&options.output_dir)
        .path_context("creating ISO output directory", &options.output_dir)?;
    let iso_path = options.output_dir.join(iso_file_name(&options.name));

    iso_tool
        .cmd()
        .arg("-o")
        .arg_path(&iso_path)
        .arg_path(&options.staging_root)
        .output(&iso_path)
        .error_msg(format!("{} failed", iso_tool.program()))
        .echo(echo)
        .run()?;

    write_checksum(&iso_path)?;
    println!("  Wrote {}", iso_path.display());
    Ok(Artifact::new(ArtifactKind::IsoImage, iso_path))
}

/// Write `<iso>.sha256` in `sha256sum -c` format (hash, two spaces, file name).
pub fn write_checksum(iso_path: &Path) -> Result<PathBuf> {
    let hash = sha256_file(iso_path)?;
    let filename = iso_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();

    let mut checksum_name = iso_path.as_os_str().to_os_string();
    checksum_name.push(".");
    checksum_name.push(CHECKSUM_SUFFIX);
    let checksum_path = PathBuf::from(checksum_name);

    fs::write(&checksum_path, format!("{hash}  {filename}\n"))
        .path_context("writing checksum", &checksum_path)?;
    println!("  SHA256: {}...{}", &hash[..8], &hash[hash.len() - 8..]);
    Ok(checksum_path)
}
