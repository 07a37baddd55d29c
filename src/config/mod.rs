//! Build configuration.
//!
//! The configuration is a TOML document with one table per build area:
//!
//! ```toml
//! [kernel]
//! path = "kernel"
//! library = "rslib"
//! features = ["pic"]
//! release = false
//!
//! [iso]
//! name = "os"
//! grub_cfg = "src/boot/grub.cfg"
//!
//! [multiboot]
//! use = true
//! sources = "src/boot"
//! tempfile = false
//! temp_dir = "boot_temp"
//! linker_script = "linker.ld"
//! output = "kernel.bin"
//!
//! [uefi]
//! use = false
//! ```
//!
//! `kernel`, `iso`, `multiboot` and `uefi` must be present. `vm` and `tools`
//! are optional. Fields are read on demand: a required field that is absent
//! fails with [`Error::Config`] when a step asks for it, not at load time.
//! The one eager check is the boot mode: exactly one of `multiboot.use` and
//! `uefi.use` must be true.

mod settings;

pub use settings::Settings;

use std::fs;
use std::path::{Path, PathBuf};

use toml::{Table, Value};

use crate::error::{Error, IoContext, Result};
use crate::process::ToolCommand;

/// Names of the configuration areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaName {
    Kernel,
    Iso,
    Multiboot,
    Uefi,
    Vm,
    Tools,
}

impl AreaName {
    pub const REQUIRED: [AreaName; 4] = [Self::Kernel, Self::Iso, Self::Multiboot, Self::Uefi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Iso => "iso",
            Self::Multiboot => "multiboot",
            Self::Uefi => "uefi",
            Self::Vm => "vm",
            Self::Tools => "tools",
        }
    }
}

/// The two mutually exclusive boot strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Multiboot,
    Uefi,
}

impl BootMode {
    /// Target triple the kernel body is compiled for.
    pub fn kernel_target(self) -> &'static str {
        match self {
            Self::Multiboot | Self::Uefi => "x86_64-unknown-none",
        }
    }

    pub fn area(self) -> AreaName {
        match self {
            Self::Multiboot => AreaName::Multiboot,
            Self::Uefi => AreaName::Uefi,
        }
    }
}

/// One named section of the configuration.
#[derive(Debug, Clone)]
pub struct BuildArea {
    name: AreaName,
    fields: Table,
}

impl BuildArea {
    fn new(name: AreaName, fields: Table) -> Self {
        Self { name, fields }
    }

    pub fn name(&self) -> &'static str {
        self.name.as_str()
    }

    /// Raw field lookup; `None` when the key is not declared.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn field(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| Error::missing_field(self.name(), key))
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        let value = self.field(key)?;
        value
            .as_bool()
            .ok_or_else(|| self.wrong_type(key, "a boolean", value))
    }

    pub fn string(&self, key: &str) -> Result<&str> {
        let value = self.field(key)?;
        value
            .as_str()
            .ok_or_else(|| self.wrong_type(key, "a string", value))
    }

    pub fn integer(&self, key: &str) -> Result<i64> {
        let value = self.field(key)?;
        value
            .as_integer()
            .ok_or_else(|| self.wrong_type(key, "an integer", value))
    }

    pub fn strings(&self, key: &str) -> Result<Vec<String>> {
        let value = self.field(key)?;
        let items = value
            .as_array()
            .ok_or_else(|| self.wrong_type(key, "an array of strings", value))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.wrong_type(key, "an array of strings", value))
            })
            .collect()
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    /// A tool given as `"program"` or `["program", "arg", ...]`.
    pub fn command(&self, key: &str) -> Result<ToolCommand> {
        let value = self.field(key)?;
        if let Some(program) = value.as_str() {
            return Ok(ToolCommand::new(program));
        }
        let mut parts = self.strings(key)?.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| Error::config(format!("[{}] {key} must not be empty", self.name())))?;
        Ok(ToolCommand::with_args(program, parts.collect()))
    }

    /// Read an optional field with one of the typed accessors.
    ///
    /// Absent is `Ok(None)`; present with the wrong type is still an error.
    pub fn optional<'a, T>(
        &'a self,
        key: &str,
        read: impl FnOnce(&'a Self, &str) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.get(key).is_none() {
            return Ok(None);
        }
        read(self, key).map(Some)
    }

    fn wrong_type(&self, key: &str, expected: &str, found: &Value) -> Error {
        Error::config(format!(
            "[{}] {key} must be {expected}, found {}",
            self.name(),
            found.type_str()
        ))
    }
}

/// Parsed configuration; read-only after [`BuildConfiguration::load`].
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    kernel: BuildArea,
    iso: BuildArea,
    multiboot: BuildArea,
    uefi: BuildArea,
    vm: BuildArea,
    tools: BuildArea,
}

impl BuildConfiguration {
    pub fn load(source: &str) -> Result<Self> {
        let mut document: Table = toml::from_str(source)
            .map_err(|e| Error::config(format!("malformed configuration: {e}")))?;

        let mut take = |name: AreaName, required: bool| -> Result<BuildArea> {
            match document.remove(name.as_str()) {
                Some(Value::Table(fields)) => Ok(BuildArea::new(name, fields)),
                Some(other) => Err(Error::config(format!(
                    "[{}] must be a table, found {}",
                    name.as_str(),
                    other.type_str()
                ))),
                None if required => Err(Error::config(format!(
                    "missing required area [{}]",
                    name.as_str()
                ))),
                None => Ok(BuildArea::new(name, Table::new())),
            }
        };

        let config = Self {
            kernel: take(AreaName::Kernel, true)?,
            iso: take(AreaName::Iso, true)?,
            multiboot: take(AreaName::Multiboot, true)?,
            uefi: take(AreaName::Uefi, true)?,
            vm: take(AreaName::Vm, false)?,
            tools: take(AreaName::Tools, false)?,
        };
        config.boot_mode()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).path_context("reading configuration", path)?;
        Self::load(&source)
    }

    pub fn area(&self, name: AreaName) -> &BuildArea {
        match name {
            AreaName::Kernel => &self.kernel,
            AreaName::Iso => &self.iso,
            AreaName::Multiboot => &self.multiboot,
            AreaName::Uefi => &self.uefi,
            AreaName::Vm => &self.vm,
            AreaName::Tools => &self.tools,
        }
    }

    pub fn field(&self, area: AreaName, key: &str) -> Result<&Value> {
        self.area(area).field(key)
    }

    /// The active boot mode; exactly one of the two areas may be in use.
    pub fn boot_mode(&self) -> Result<BootMode> {
        let multiboot = self.multiboot.bool("use")?;
        let uefi = self.uefi.bool("use")?;
        match (multiboot, uefi) {
            (true, false) => Ok(BootMode::Multiboot),
            (false, true) => Ok(BootMode::Uefi),
            (true, true) => Err(Error::config(
                "both [multiboot] and [uefi] have use = true; exactly one boot mode must be active",
            )),
            (false, false) => Err(Error::config(
                "neither [multiboot] nor [uefi] has use = true; exactly one boot mode must be active",
            )),
        }
    }

    /// External tools, with `[tools]` overrides applied.
    pub fn toolchain(&self) -> Result<Toolchain> {
        let tool = |key: &str, default: &str| -> Result<ToolCommand> {
            Ok(self
                .tools
                .optional(key, BuildArea::command)?
                .unwrap_or_else(|| ToolCommand::new(default)))
        };
        Ok(Toolchain {
            assembler: tool("assembler", "nasm")?,
            linker: tool("linker", "ld")?,
            cargo: tool("cargo", "cargo")?,
            iso: tool("iso", "grub-mkrescue")?,
        })
    }
}

/// The external build tools.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub assembler: ToolCommand,
    pub linker: ToolCommand,
    pub cargo: ToolCommand,
    pub iso: ToolCommand,
}
