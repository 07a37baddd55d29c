//! QEMU runner infrastructure for the VM test session.
//!
//! Provides [`QemuBuilder`] for constructing the QEMU command line,
//! [`find_ovmf`] for UEFI firmware discovery and [`VmTestHarness`] for the
//! monitored boot itself.

pub mod harness;
pub mod output;
pub mod pipes;
pub mod qmp;
pub mod screenshot;
pub mod watchdog;

pub use harness::{HarnessState, SessionReport, VmTestHarness};

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::config::{AreaName, BuildArea, BuildConfiguration, Settings};
use crate::error::{Error, Result};
use crate::process::ToolCommand;

pub const DEFAULT_QEMU: &str = "qemu-system-x86_64";
pub const DEFAULT_MEMORY: &str = "128M";
pub const DEFAULT_SMP: u32 = 3;
pub const DEFAULT_EXIT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";

pub const MONITOR_PIPE_NAME: &str = "qemu-monitor";
pub const CAPTURE_FILE_NAME: &str = "screenshot.ppm";

pub const OVMF_CODE: &str = "OVMF_CODE.fd";
pub const OVMF_VARS: &str = "OVMF_VARS.fd";

/// Port and width of the `isa-debug-exit` device the kernel uses to exit.
const DEBUG_EXIT_DEVICE: &str = "isa-debug-exit,iobase=0xf4,iosize=0x04";

/// Port of the debug console OVMF logs to.
const DEBUGCON_PORT: &str = "isa-debugcon.iobase=0x402";

/// Options for one VM session, from `[vm]` and the runtime settings.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub qemu: ToolCommand,
    pub ovmf_dir: Option<PathBuf>,
    /// Directory of reference `.ppm` images.
    pub screenshots: PathBuf,
    pub exit_timeout: Duration,
    pub session_timeout: Duration,
    pub memory: String,
    pub smp: u32,
    pub headless: bool,
    /// Host directories exposed as additional FAT drives.
    pub extra_drives: Vec<PathBuf>,
    /// File receiving the firmware debug console.
    pub debugcon: Option<PathBuf>,
    /// Base path of the monitor fifos.
    pub pipe_base: PathBuf,
    /// Where the monitor writes a screenshot.
    pub capture: PathBuf,
    pub workspace: PathBuf,
}

impl VmOptions {
    pub fn from_config(config: &BuildConfiguration, settings: &Settings) -> Result<Self> {
        let vm = config.area(AreaName::Vm);
        let seconds = |key: &str, default: u64| -> Result<Duration> {
            match vm.optional(key, BuildArea::integer)? {
                None => Ok(Duration::from_secs(default)),
                Some(secs) if secs > 0 => Ok(Duration::from_secs(secs.unsigned_abs())),
                Some(secs) => Err(Error::config(format!(
                    "[vm] {key} must be a positive number of seconds, found {secs}"
                ))),
            }
        };
        let smp = match vm.optional("smp", BuildArea::integer)? {
            None => DEFAULT_SMP,
            Some(n) => u32::try_from(n)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::config(format!("[vm] smp must be a positive integer, found {n}")))?,
        };
        let target = settings.target_dir();

        Ok(Self {
            qemu: vm
                .optional("qemu", BuildArea::command)?
                .unwrap_or_else(|| ToolCommand::new(DEFAULT_QEMU)),
            ovmf_dir: vm
                .optional("ovmf_dir", BuildArea::path)?
                .map(|dir| settings.resolve(&dir)),
            screenshots: settings.resolve(
                &vm.optional("screenshots", BuildArea::path)?
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            ),
            exit_timeout: seconds("exit_timeout", DEFAULT_EXIT_TIMEOUT_SECS)?,
            session_timeout: seconds("session_timeout", DEFAULT_SESSION_TIMEOUT_SECS)?,
            memory: vm
                .optional("memory", BuildArea::string)?
                .unwrap_or(DEFAULT_MEMORY)
                .to_string(),
            smp,
            headless: settings.headless,
            extra_drives: vm
                .optional("extra_drives", BuildArea::strings)?
                .unwrap_or_default()
                .iter()
                .map(|dir| settings.resolve(Path::new(dir)))
                .collect(),
            debugcon: vm
                .optional("debugcon", BuildArea::path)?
                .map(|file| settings.resolve(&file)),
            pipe_base: target.join(MONITOR_PIPE_NAME),
            capture: target.join(CAPTURE_FILE_NAME),
            workspace: settings.workspace.clone(),
        })
    }
}

/// UEFI firmware images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvmfFirmware {
    pub code: PathBuf,
    pub vars: PathBuf,
}

impl OvmfFirmware {
    fn in_dir(dir: &Path) -> Option<Self> {
        let code = dir.join(OVMF_CODE);
        let vars = dir.join(OVMF_VARS);
        (code.is_file() && vars.is_file()).then_some(Self { code, vars })
    }
}

/// Builder for QEMU commands.
#[derive(Debug, Clone)]
pub struct QemuBuilder {
    qemu: ToolCommand,
    memory: String,
    smp: u32,
    cdrom: Option<PathBuf>,
    esp: Option<PathBuf>,
    ovmf: Option<OvmfFirmware>,
    qmp: Option<String>,
    extra_drives: Vec<PathBuf>,
    debugcon: Option<PathBuf>,
    headless: bool,
}

impl QemuBuilder {
    pub fn new(qemu: ToolCommand, memory: &str, smp: u32) -> Self {
        Self {
            qemu,
            memory: memory.to_string(),
            smp,
            cdrom: None,
            esp: None,
            ovmf: None,
            qmp: None,
            extra_drives: Vec::new(),
            debugcon: None,
            headless: false,
        }
    }

    pub fn from_options(options: &VmOptions) -> Self {
        let mut builder = Self::new(options.qemu.clone(), &options.memory, options.smp)
            .headless(options.headless);
        for dir in &options.extra_drives {
            builder = builder.fat_drive(dir.clone());
        }
        match &options.debugcon {
            Some(file) => builder.debugcon(file.clone()),
            None => builder,
        }
    }

    pub fn cdrom(mut self, path: PathBuf) -> Self {
        self.cdrom = Some(path);
        self
    }

    /// Directory exposed to the guest as a FAT drive.
    pub fn esp(mut self, dir: PathBuf) -> Self {
        self.esp = Some(dir);
        self
    }

    /// Extra host directory exposed as a FAT drive after the ESP.
    pub fn fat_drive(mut self, dir: PathBuf) -> Self {
        self.extra_drives.push(dir);
        self
    }

    pub fn debugcon(mut self, file: PathBuf) -> Self {
        self.debugcon = Some(file);
        self
    }

    pub fn uefi(mut self, firmware: OvmfFirmware) -> Self {
        self.ovmf = Some(firmware);
        self
    }

    /// Monitor chardev, e.g. `pipe:target/qemu-monitor`.
    pub fn qmp(mut self, chardev: String) -> Self {
        self.qmp = Some(chardev);
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn build(self) -> Command {
        let mut cmd = self.qemu.command();

        // KVM when available, TCG otherwise
        cmd.args(["-nodefaults", "-machine", "q35,accel=kvm:tcg"]);
        cmd.args(["-smp", &self.smp.to_string()]);
        cmd.args(["-m", &self.memory]);

        // UEFI firmware
        if let Some(ovmf) = &self.ovmf {
            for image in [&ovmf.code, &ovmf.vars] {
                cmd.args([
                    "-drive",
                    &format!("if=pflash,format=raw,readonly=on,file={}", image.display()),
                ]);
            }
        }

        if let Some(esp) = &self.esp {
            cmd.args(["-drive", &format!("format=raw,file=fat:rw:{}", esp.display())]);
        }
        for dir in &self.extra_drives {
            cmd.args(["-drive", &format!("format=raw,file=fat:rw:{}", dir.display())]);
        }

        if let Some(cdrom) = &self.cdrom {
            cmd.arg("-cdrom").arg(cdrom);
        }

        cmd.args(["-serial", "stdio"]);
        cmd.args(["-device", DEBUG_EXIT_DEVICE]);

        if let Some(log) = &self.debugcon {
            cmd.args(["-debugcon", &format!("file:{}", log.display())]);
            cmd.args(["-global", DEBUGCON_PORT]);
        }

        if let Some(qmp) = &self.qmp {
            cmd.args(["-qmp", qmp]);
        }

        // A VGA adapter is kept in headless mode so screendump has a surface.
        cmd.args(["-vga", "std"]);
        if self.headless {
            cmd.args(["-display", "none"]);
        }

        cmd
    }
}

/// Find OVMF firmware for UEFI boot.
///
/// An explicit directory is the only place searched. Otherwise the workspace
/// root comes first, then the usual distribution locations.
pub fn find_ovmf(explicit: Option<&Path>, workspace: &Path) -> Result<OvmfFirmware> {
    if let Some(dir) = explicit {
        return OvmfFirmware::in_dir(dir).ok_or_else(|| {
            Error::config(format!(
                "{OVMF_CODE} and {OVMF_VARS} not found in '{}'",
                dir.display()
            ))
        });
    }

    let mut candidates = vec![
        workspace.to_path_buf(),
        // Fedora/RHEL
        PathBuf::from("/usr/share/edk2/ovmf"),
        // Debian/Ubuntu
        PathBuf::from("/usr/share/OVMF"),
        PathBuf::from("/usr/share/qemu"),
        // Arch
        PathBuf::from("/usr/share/edk2-ovmf/x64"),
        // NixOS
        PathBuf::from("/run/libvirt/nix-ovmf"),
    ];
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("ovmf"));
    }

    candidates
        .iter()
        .find_map(|dir| OvmfFirmware::in_dir(dir))
        .ok_or_else(|| {
            Error::config(format!(
                "{OVMF_CODE} not found; set [vm] ovmf_dir or place it in '{}'",
                workspace.display()
            ))
        })
}
