//! The screenshot request/acknowledge protocol.
//!
//! The guest prints `SCREENSHOT: <name>` on its console. The host captures the
//! display through the monitor, tells the guest it may continue by writing
//! `OK` to its standard input, and compares the capture byte for byte with
//! `<reference dir>/<name>.ppm`. The capture is removed whatever the outcome.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::qemu::qmp::ControlChannel;

pub const SCREENSHOT_PREFIX: &str = "SCREENSHOT: ";
pub const REFERENCE_EXTENSION: &str = "ppm";
/// Written to the guest once the capture is taken.
pub const ACKNOWLEDGEMENT: &[u8] = b"OK\n";

/// A directive parsed from a console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotRequest {
    reference_name: String,
}

impl ScreenshotRequest {
    /// `Ok(None)` for ordinary lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let Some(name) = line.strip_prefix(SCREENSHOT_PREFIX) else {
            return Ok(None);
        };
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(Error::Comparison(format!(
                "invalid reference name {name:?} in screenshot directive"
            )));
        }
        Ok(Some(Self {
            reference_name: name.to_string(),
        }))
    }

    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn reference_path(&self, reference_dir: &Path) -> PathBuf {
        reference_dir.join(format!("{}.{REFERENCE_EXTENSION}", self.reference_name))
    }
}

/// Removes the capture file when dropped.
struct CaptureFile<'a>(&'a Path);

impl Drop for CaptureFile<'_> {
    fn drop(&mut self) {
        match fs::remove_file(self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), "could not remove capture: {e}"),
        }
    }
}

/// Run one screenshot exchange.
pub fn take_screenshot<R, W, S>(
    channel: &mut ControlChannel<R, W>,
    vm_stdin: &mut S,
    request: &ScreenshotRequest,
    capture: &Path,
    reference_dir: &Path,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    S: Write,
{
    let _capture = CaptureFile(capture);

    channel.screendump(capture)?;
    vm_stdin
        .write_all(ACKNOWLEDGEMENT)
        .and_then(|_| vm_stdin.flush())
        .map_err(|e| Error::io("acknowledging screenshot to the VM", e))?;
    debug!(name = request.reference_name(), "screenshot taken");

    compare(capture, &request.reference_path(reference_dir))
}

fn compare(capture: &Path, reference: &Path) -> Result<()> {
    if !reference.is_file() {
        return Err(Error::Comparison(format!(
            "reference image '{}' not found",
            reference.display()
        )));
    }
    let captured = fs::read(capture).path_context("reading capture", capture)?;
    let expected = fs::read(reference).path_context("reading reference", reference)?;
    if captured != expected {
        return Err(Error::Comparison(format!(
            "capture differs from '{}' ({} vs {} bytes)",
            reference.display(),
            captured.len(),
            expected.len()
        )));
    }
    println!("  Screenshot matches {}", reference.display());
    Ok(())
}
