//! Preflight checks for build validation.
//!
//! Validates that the host has the tools a pipeline needs before any of them
//! runs, so a missing `nasm` is reported up front instead of halfway through
//! a build.
//!
//! # Example
//!
//! ```rust,no_run
//! use kernel_builder::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("grub-mkrescue") {
//!     println!("grub is not installed");
//! }
//!
//! let tools = [("nasm".to_string(), "nasm"), ("ld".to_string(), "binutils")];
//! if let Err(e) = check_required_tools(&tools) {
//!     eprintln!("{e}");
//! }
//! ```

use crate::config::{AreaName, BootMode, BuildArea, BuildConfiguration};
use crate::error::{Error, Result};
use crate::process::ToolCommand;
use crate::qemu::DEFAULT_QEMU;

/// Package providing each default tool.
pub const TOOL_PACKAGES: &[(&str, &str)] = &[
    ("nasm", "nasm"),
    ("ld", "binutils"),
    ("cargo", "rustup"),
    ("grub-mkrescue", "grub2-tools / grub-common + xorriso"),
    (DEFAULT_QEMU, "qemu-system-x86"),
];

/// Check if a command exists in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each entry is `(command, package)`. Every missing command is listed in the
/// error together with the package that provides it.
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool.as_ref()))
        .map(|(tool, package)| format!("  {} (install: {})", tool.as_ref(), package))
        .collect();

    if !missing.is_empty() {
        return Err(Error::tool(
            "preflight",
            format!("missing required host tools:\n{}", missing.join("\n")),
        ));
    }
    Ok(())
}

/// Tools the configured pipeline will invoke, paired with their packages.
///
/// `with_vm` adds the emulator for a test session.
pub fn required_tools(
    config: &BuildConfiguration,
    with_vm: bool,
) -> Result<Vec<(String, &'static str)>> {
    let toolchain = config.toolchain()?;
    let mut tools = vec![toolchain.cargo, toolchain.linker];
    if config.boot_mode()? == BootMode::Multiboot {
        // Precompiled objects need no assembler.
        if !config.area(AreaName::Multiboot).bool("tempfile")? {
            tools.push(toolchain.assembler);
        }
        tools.push(toolchain.iso);
    }
    if with_vm {
        let vm = config.area(AreaName::Vm);
        tools.push(
            vm.optional("qemu", BuildArea::command)?
                .unwrap_or_else(|| ToolCommand::new(DEFAULT_QEMU)),
        );
    }

    Ok(tools
        .iter()
        .map(|tool| (tool.program().to_string(), package_for(tool.program())))
        .collect())
}

/// Run the preflight for `config`.
pub fn check_host_tools(config: &BuildConfiguration, with_vm: bool) -> Result<()> {
    check_required_tools(&required_tools(config, with_vm)?)
}

fn package_for(program: &str) -> &'static str {
    TOOL_PACKAGES
        .iter()
        .find(|(cmd, _)| *cmd == program)
        .map(|(_, package)| *package)
        .unwrap_or("configured in [tools]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Workspace;

    #[test]
    fn test_command_exists() {
        // 'ls' should exist on any Unix system
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = [("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(&tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_lists_every_missing_tool() {
        let tools = [
            ("nonexistent_command_xyz", "fake-package"),
            ("ls", "coreutils"),
            ("another_missing_tool_abc", "other-package"),
        ];
        let err = check_required_tools(&tools).unwrap_err().to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(err.contains("another_missing_tool_abc (install: other-package)"));
        assert!(!err.contains("coreutils"));
    }

    #[test]
    fn test_required_tools_follow_boot_mode() {
        let ws = Workspace::new();
        let multiboot = BuildConfiguration::load(&ws.multiboot_config()).unwrap();
        let uefi = BuildConfiguration::load(&ws.uefi_config()).unwrap();

        // Tests route every tool through `sh`.
        assert_eq!(required_tools(&multiboot, false).unwrap().len(), 4);
        assert_eq!(required_tools(&uefi, false).unwrap().len(), 2);

        let with_vm = required_tools(&uefi, true).unwrap();
        assert_eq!(with_vm.last().unwrap().0, DEFAULT_QEMU);
        assert_eq!(with_vm.last().unwrap().1, "qemu-system-x86");
        assert!(check_host_tools(&uefi, false).is_ok());
    }

    #[test]
    fn test_precompiled_objects_skip_assembler() {
        let ws = Workspace::new();
        let source = ws
            .multiboot_config()
            .replace("tempfile = false", "tempfile = true");
        let config = BuildConfiguration::load(&source).unwrap();

        // cargo, linker and the ISO tool.
        assert_eq!(required_tools(&config, false).unwrap().len(), 3);
    }
}
