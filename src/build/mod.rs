//! Build steps that turn sources into linkable and bootable artifacts.
//!
//! - [`assemble`] - boot stubs through the assembler
//! - [`kernel`] - kernel body and UEFI application through cargo
//! - [`link`] - the linker, against a mode-specific script

pub mod assemble;
pub mod kernel;
pub mod link;

/// Cargo build profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    pub fn from_release(release: bool) -> Self {
        if release {
            Self::Release
        } else {
            Self::Debug
        }
    }

    /// Directory name cargo uses for this profile.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}
