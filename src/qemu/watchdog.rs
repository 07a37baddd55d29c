//! Supervision of the VM process while the session is driven.
//!
//! Opening a fifo and reading the monitor both block until the VM does its
//! part. The watchdog owns the VM process for the duration of the session
//! and releases a stuck harness in two cases:
//!
//! - the VM exits on its own (bad arguments, missing firmware, guest crash)
//! - the session outlives its timeout, in which case the VM is killed first
//!
//! Either way it keeps cycling the fifos open and closed until disarmed, so
//! every blocked open completes and every blocked read sees end of file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Time the fifos stay open, then closed, per release cycle.
const RELEASE_WINDOW: Duration = Duration::from_millis(100);

/// What the watchdog saw before it was disarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Disarmed while the VM was still running.
    Disarmed,
    /// The VM exited by itself.
    VmExited,
    /// The session timed out and the VM was killed.
    Fired,
}

pub struct Watchdog {
    disarm: Sender<()>,
    handle: JoinHandle<(Child, WatchOutcome)>,
}

impl Watchdog {
    /// Take over `child` and watch it for at most `timeout`.
    pub fn arm(child: Child, timeout: Duration, pipes: Vec<PathBuf>) -> Self {
        let (disarm, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || watch(child, timeout, &pipes, &rx));
        Self { disarm, handle }
    }

    /// Stop watching and hand the VM process back.
    pub fn disarm(self) -> Result<(Child, WatchOutcome)> {
        let _ = self.disarm.send(());
        self.handle
            .join()
            .map_err(|_| Error::tool("watchdog", "supervisor thread panicked"))
    }
}

fn watch(
    mut child: Child,
    timeout: Duration,
    pipes: &[PathBuf],
    rx: &Receiver<()>,
) -> (Child, WatchOutcome) {
    let deadline = Instant::now() + timeout;
    loop {
        if disarmed_within(rx, POLL_INTERVAL) {
            return (child, WatchOutcome::Disarmed);
        }

        if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "session timed out, killing VM");
            if let Err(e) = child.kill() {
                debug!("kill failed: {e}");
            }
            release_until_disarmed(pipes, rx);
            return (child, WatchOutcome::Fired);
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "VM exited, releasing monitor pipes");
                release_until_disarmed(pipes, rx);
                return (child, WatchOutcome::VmExited);
            }
            Ok(None) => {}
            Err(e) => debug!("polling VM failed: {e}"),
        }
    }
}

fn disarmed_within(rx: &Receiver<()>, wait: Duration) -> bool {
    !matches!(rx.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
}

/// Hold the fifos open for a window, close them for a window, repeat.
///
/// The open half completes blocked opens on the other end. The closed half
/// leaves no peer, so blocked reads return end of file.
fn release_until_disarmed(pipes: &[PathBuf], rx: &Receiver<()>) {
    loop {
        let held: Vec<File> = pipes
            .iter()
            .filter_map(|path| {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(OFlag::O_NONBLOCK.bits())
                    .open(path)
                    .ok()
            })
            .collect();
        let disarmed = disarmed_within(rx, RELEASE_WINDOW);
        drop(held);
        if disarmed || disarmed_within(rx, RELEASE_WINDOW) {
            return;
        }
    }
}
