//! Named pipes carrying the monitor protocol.
//!
//! QEMU is started with `-qmp pipe:<base>` and talks over two fifos:
//! `<base>.in` (commands to QEMU) and `<base>.out` (replies from QEMU).
//! The fifos belong to one session. They are created before the VM starts
//! and removed when [`MonitorPipes`] is dropped. A fifo left behind by a
//! crashed run is reused as is.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::qemu::qmp::ControlChannel;

/// Channel over the opened fifos.
pub type PipeChannel = ControlChannel<BufReader<File>, File>;

#[derive(Debug)]
pub struct MonitorPipes {
    base: PathBuf,
    input: PathBuf,
    output: PathBuf,
    _lock: File,
}

impl MonitorPipes {
    /// Lock `<base>.lock` and make sure both fifos exist.
    ///
    /// Fails if another session holds the lock.
    pub fn create(base: &Path) -> Result<Self> {
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent).path_context("creating pipe directory", parent)?;
        }

        // The lock file is never unlinked: removing a locked file would let a
        // second session lock a fresh inode at the same path.
        let lock_path = with_suffix(base, "lock");
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .path_context("creating lock file", &lock_path)?;
        if lock.try_lock_exclusive().is_err() {
            return Err(Error::config(format!(
                "monitor pipe '{}' is in use by another session",
                base.display()
            )));
        }

        let pipes = Self {
            base: base.to_path_buf(),
            input: with_suffix(base, "in"),
            output: with_suffix(base, "out"),
            _lock: lock,
        };
        ensure_fifo(&pipes.input)?;
        ensure_fifo(&pipes.output)?;
        Ok(pipes)
    }

    /// `pipe:<base>` for QEMU's `-qmp` option.
    pub fn qemu_arg(&self) -> String {
        format!("pipe:{}", self.base.display())
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Open both ends. Blocks until the VM has opened its side.
    pub fn open(&self) -> Result<PipeChannel> {
        let writer = OpenOptions::new()
            .write(true)
            .open(&self.input)
            .path_context("opening monitor input", &self.input)?;
        let reader = File::open(&self.output).path_context("opening monitor output", &self.output)?;
        debug!(base = %self.base.display(), "monitor pipes open");
        Ok(ControlChannel::new(BufReader::new(reader), writer))
    }
}

impl Drop for MonitorPipes {
    fn drop(&mut self) {
        for path in [&self.input, &self.output] {
            if !is_fifo(path) {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "could not remove pipe: {e}"),
            }
        }
    }
}

fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Reuse an existing fifo, otherwise create one.
fn ensure_fifo(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => {
            debug!(path = %path.display(), "reusing existing fifo");
            return Ok(());
        }
        Ok(_) => {
            return Err(Error::config(format!(
                "'{}' exists and is not a named pipe",
                path.display()
            )))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(format!("inspecting '{}'", path.display()), e)),
    }

    mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| {
        Error::io(format!("creating fifo '{}'", path.display()), errno.into())
    })?;
    Ok(())
}
