//! The VM test session.
//!
//! ```text
//! Building → Launching → Handshaking → Streaming ⇄ Screenshotting
//!                                          ↓
//!                                     ShuttingDown → Passed | Failed
//! ```
//!
//! The monitor fifos, the screenshot capture and the VM process are released
//! on every path out of a session.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactKind};
use crate::config::{BuildConfiguration, Settings};
use crate::error::{Error, Result};
use crate::pipeline::BuildOrchestrator;
use crate::qemu::output::LineFilter;
use crate::qemu::pipes::{MonitorPipes, PipeChannel};
use crate::qemu::screenshot::{take_screenshot, ScreenshotRequest};
use crate::qemu::watchdog::{WatchOutcome, Watchdog};
use crate::qemu::{find_ovmf, QemuBuilder, VmOptions};

/// Exit code recorded for a VM that had to be killed.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Console lines kept in a [`SessionReport`].
pub const CONSOLE_TAIL_LINES: usize = 200;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Idle,
    Building,
    Launching,
    Handshaking,
    Streaming,
    Screenshotting,
    ShuttingDown,
    Passed,
    Failed,
}

/// What a passed session saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// The last [`CONSOLE_TAIL_LINES`] non-empty console lines, escape
    /// sequences stripped.
    pub lines: VecDeque<String>,
    /// Every non-empty console line seen, including those no longer kept.
    pub line_count: usize,
    /// Reference names of the screenshots that matched.
    pub screenshots: Vec<String>,
    pub exit_code: i32,
}

impl SessionReport {
    fn record(&mut self, line: String) {
        if self.lines.len() == CONSOLE_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.line_count += 1;
    }
}

/// How the VM process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: i32,
    pub killed: bool,
}

pub struct VmTestHarness<'a> {
    config: &'a BuildConfiguration,
    settings: &'a Settings,
    options: VmOptions,
    state: HarnessState,
}

impl<'a> VmTestHarness<'a> {
    pub fn new(config: &'a BuildConfiguration, settings: &'a Settings) -> Result<Self> {
        Ok(Self {
            config,
            settings,
            options: VmOptions::from_config(config, settings)?,
            state: HarnessState::Idle,
        })
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Build the image, then boot it.
    pub fn run(&mut self) -> Result<SessionReport> {
        self.transition(HarnessState::Building);
        let built = match BuildOrchestrator::new(self.config, self.settings).build() {
            Ok(built) => built,
            Err(e) => {
                self.transition(HarnessState::Failed);
                return Err(e);
            }
        };
        self.boot(&built.image)
    }

    /// Boot an already built ISO image or ESP tree.
    pub fn boot(&mut self, image: &Artifact) -> Result<SessionReport> {
        let result = self.session(image);
        match &result {
            Ok(report) => {
                self.transition(HarnessState::Passed);
                info!(lines = report.line_count, screenshots = report.screenshots.len(), "VM session passed");
            }
            Err(e) => {
                self.transition(HarnessState::Failed);
                warn!("VM session failed: {e}");
            }
        }
        result
    }

    fn transition(&mut self, next: HarnessState) {
        debug!(from = ?self.state, to = ?next, "harness state");
        self.state = next;
    }

    fn session(&mut self, image: &Artifact) -> Result<SessionReport> {
        self.transition(HarnessState::Launching);
        let builder = self.vm_builder(image)?;
        let pipes = MonitorPipes::create(&self.options.pipe_base)?;

        let mut command = builder.qmp(pipes.qemu_arg()).build();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        println!("Starting VM ({})...", self.options.qemu.program());
        let mut child = command.spawn().map_err(|e| {
            Error::tool(self.options.qemu.program(), format!("could not start: {e}"))
        })?;
        let streams = (child.stdin.take(), child.stdout.take());

        let watchdog = Watchdog::arm(
            child,
            self.options.session_timeout,
            vec![pipes.input().to_path_buf(), pipes.output().to_path_buf()],
        );
        let mut report = SessionReport::default();
        let driven = match streams {
            (Some(stdin), Some(stdout)) => self.drive(&pipes, stdin, stdout, &mut report),
            _ => Err(Error::tool(
                self.options.qemu.program(),
                "standard streams were not captured",
            )),
        };
        let (mut child, watch) = watchdog.disarm()?;

        self.transition(HarnessState::ShuttingDown);
        let exit = if driven.is_ok() || watch == WatchOutcome::VmExited {
            shutdown(&mut child, self.options.exit_timeout)?
        } else {
            // Nobody reads the console any more; do not wait for a clean exit.
            kill(&mut child)?
        };
        drop(pipes);
        report.exit_code = exit.code;

        if watch == WatchOutcome::Fired {
            return Err(Error::Timeout(self.options.session_timeout));
        }
        if let Err(e) = driven {
            // A VM that died on its own broke the session; its status says why.
            if watch == WatchOutcome::VmExited && exit.code != 0 {
                debug!("session error after VM exit: {e}");
                return Err(Error::VmExit { code: exit.code });
            }
            return Err(e);
        }
        if exit.killed {
            return Err(Error::Timeout(self.options.exit_timeout));
        }
        if exit.code != 0 {
            return Err(Error::VmExit { code: exit.code });
        }
        Ok(report)
    }

    fn vm_builder(&self, image: &Artifact) -> Result<QemuBuilder> {
        let builder = QemuBuilder::from_options(&self.options);
        match image.kind() {
            ArtifactKind::IsoImage => Ok(builder.cdrom(image.path().to_path_buf())),
            ArtifactKind::EspTree => {
                let firmware =
                    find_ovmf(self.options.ovmf_dir.as_deref(), &self.options.workspace)?;
                Ok(builder.uefi(firmware).esp(image.path().to_path_buf()))
            }
            other => Err(Error::config(format!("cannot boot a {}", other.as_str()))),
        }
    }

    /// Handshake, then stream the console until it closes.
    fn drive<I: Write, O: Read>(
        &mut self,
        pipes: &MonitorPipes,
        mut vm_stdin: I,
        vm_stdout: O,
        report: &mut SessionReport,
    ) -> Result<()> {
        self.transition(HarnessState::Handshaking);
        let mut channel: PipeChannel = pipes.open()?;
        channel.handshake()?;

        self.transition(HarnessState::Streaming);
        let filter = LineFilter::new()?;
        let mut console = BufReader::new(vm_stdout);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let read = console
                .read_until(b'\n', &mut raw)
                .map_err(|e| Error::io("reading VM console", e))?;
            if read == 0 {
                break;
            }
            let Some(line) = filter.clean(&raw) else {
                continue;
            };
            println!("{line}");

            if let Some(request) = ScreenshotRequest::parse(&line)? {
                self.transition(HarnessState::Screenshotting);
                take_screenshot(
                    &mut channel,
                    &mut vm_stdin,
                    &request,
                    &self.options.capture,
                    &self.options.screenshots,
                )?;
                report.screenshots.push(request.reference_name().to_string());
                self.transition(HarnessState::Streaming);
            }
            report.record(line);
        }
        debug!("VM console closed");
        Ok(())
    }
}

/// Wait for `child` to exit, killing it after `timeout`.
pub fn shutdown(child: &mut Child, timeout: Duration) -> Result<ExitOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        let status = child
            .try_wait()
            .map_err(|e| Error::io("waiting for VM", e))?;
        if let Some(status) = status {
            return Ok(ExitOutcome {
                code: exit_code(status),
                killed: false,
            });
        }
        if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "VM did not exit in time, killing it");
            return kill(child);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn kill(child: &mut Child) -> Result<ExitOutcome> {
    // Fails only if the process already exited, which wait() reports.
    let _ = child.kill();
    child.wait().map_err(|e| Error::io("reaping VM", e))?;
    Ok(ExitOutcome {
        code: KILLED_EXIT_CODE,
        killed: true,
    })
}

/// Exit status as a number; death by signal N maps to 128 + N.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(KILLED_EXIT_CODE)
}
