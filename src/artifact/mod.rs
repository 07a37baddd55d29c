//! Build artifacts and the packaging steps that consume them.
//!
//! - [`iso`] - multiboot ISO through the ISO tool
//! - [`esp`] - UEFI system partition directory
//!
//! An [`Artifact`] is handed by value from the step that produced it to the
//! one step that consumes it.

pub mod esp;
pub mod iso;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{IoContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Object,
    StaticLibrary,
    LinkedBinary,
    FirmwareApplication,
    IsoImage,
    EspTree,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object file",
            Self::StaticLibrary => "static library",
            Self::LinkedBinary => "linked binary",
            Self::FirmwareApplication => "UEFI application",
            Self::IsoImage => "ISO image",
            Self::EspTree => "EFI system partition",
        }
    }
}

/// A path on disk tagged with what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).path_context("opening", path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).path_context("reading", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.bin");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha256_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(sha256_file(&temp.path().join("nope")).is_err());
    }
}
