//! Mapping from inputs to the paths their artifacts land at.
//!
//! Pure functions, no filesystem access.

use std::path::{Path, PathBuf};

use crate::build::Profile;

pub const OBJECT_EXTENSION: &str = "o";
pub const ISO_EXTENSION: &str = "iso";

/// `<staging>/<source stem>.o`
pub fn object_path(staging_dir: &Path, source: &Path) -> PathBuf {
    staging_dir
        .join(source.file_name().unwrap_or_default())
        .with_extension(OBJECT_EXTENSION)
}

/// `<dir>/<file name of file>`
pub fn staged_path(dir: &Path, file: &Path) -> PathBuf {
    dir.join(file.file_name().unwrap_or_default())
}

/// Staging directory for assembled boot stubs: `<target>/<profile>/asm`.
pub fn asm_staging_dir(target_dir: &Path, profile: Profile) -> PathBuf {
    target_dir.join(profile.as_str()).join("asm")
}

/// `<crate>/target/<triple>/<profile>/lib<name>.a`
pub fn static_library_path(crate_dir: &Path, triple: &str, profile: Profile, name: &str) -> PathBuf {
    crate_dir
        .join("target")
        .join(triple)
        .join(profile.as_str())
        .join(format!("lib{name}.a"))
}

/// `<crate>/target/<triple>/<profile>/<package>.efi`
pub fn efi_application_path(
    crate_dir: &Path,
    triple: &str,
    profile: Profile,
    package: &str,
) -> PathBuf {
    crate_dir
        .join("target")
        .join(triple)
        .join(profile.as_str())
        .join(format!("{package}.efi"))
}

/// Normalize a requested ISO name.
///
/// A trailing `.iso` is dropped, every remaining `.` is removed and `.iso` is
/// appended: `"my.os"` becomes `"myos.iso"`, `"os.iso"` stays `"os.iso"`.
pub fn iso_file_name(name: &str) -> String {
    let base = match name.len().checked_sub(ISO_EXTENSION.len() + 1) {
        Some(split)
            if name.is_char_boundary(split)
                && name[split..].eq_ignore_ascii_case(".iso") =>
        {
            &name[..split]
        }
        _ => name,
    };
    let stem: String = base.chars().filter(|c| *c != '.').collect();
    format!("{stem}.{ISO_EXTENSION}")
}
