//! Build and boot-test pipeline for a small x86_64 kernel.
//!
//! - **Configuration** - TOML build areas (`kernel`, `iso`, `multiboot`,
//!   `uefi`, optional `vm` and `tools`) with typed, lazy field access
//! - **Build steps** - assemble boot stubs, cross-compile the kernel body,
//!   link against a linker script
//! - **Packaging** - GRUB ISO image or EFI system partition tree
//! - **VM test harness** - boot the image in QEMU, drive the QMP monitor over
//!   named pipes and compare requested screenshots with reference images
//! - **Preflight checks** - host tool validation before a run
//!
//! # Architecture
//!
//! ```text
//! BuildConfiguration
//!     │
//!     └── BuildOrchestrator
//!             ├── multiboot: assemble ─┐
//!             │                        ├── compile → link → ISO
//!             └── uefi: ───────────────┘         └── ESP (+ UEFI app)
//!
//! VmTestHarness
//!     ├── BuildOrchestrator
//!     ├── QemuBuilder + MonitorPipes
//!     └── ControlChannel (QMP) + screenshots
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use kernel_builder::{BuildConfiguration, Settings, VmTestHarness};
//!
//! # fn main() -> kernel_builder::Result<()> {
//! let config = BuildConfiguration::from_file(Path::new("build.toml"))?;
//! let settings = Settings::new(".");
//! let report = VmTestHarness::new(&config, &settings)?.run()?;
//! println!("{} screenshots matched", report.screenshots.len());
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod build;
pub mod config;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod qemu;

#[cfg(test)]
mod testutil;

pub use config::{BootMode, BuildConfiguration, Settings};
pub use error::{Error, Result};
pub use pipeline::{BuildOrchestrator, BuildOutput};
pub use qemu::{SessionReport, VmTestHarness};
