//! Scratch workspaces with fake external tools.
//!
//! Every tool is an `sh` script invoked as `sh <script>`, so nothing here
//! needs the executable bit or the real toolchain.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::Settings;

/// `nasm -f elf64 <in> -o <out>`: the object is a copy of the source.
pub(crate) const FAKE_NASM: &str = r#"cp "$3" "$5""#;

/// `ld --nmagic -T <script> <inputs...> -o <out>`: concatenates the inputs.
pub(crate) const FAKE_LD: &str = r#"
out=""
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -T) shift 2 ;;
    --nmagic) shift ;;
    *) inputs="$inputs $1"; shift ;;
  esac
done
cat $inputs > "$out"
"#;

/// `cargo build --manifest-path <m> --target <t> [--release] ...`: drops a
/// fixed static library and UEFI application where cargo would.
pub(crate) const FAKE_CARGO: &str = r#"
manifest=""
target=""
profile=debug
while [ $# -gt 0 ]; do
  case "$1" in
    --manifest-path) manifest="$2"; shift 2 ;;
    --target) target="$2"; shift 2 ;;
    --features|--package) shift 2 ;;
    --release) profile=release; shift ;;
    *) shift ;;
  esac
done
out="$(dirname "$manifest")/target/$target/$profile"
mkdir -p "$out"
printf 'kernel-body' > "$out/librslib.a"
printf 'efi-app' > "$out/uefis.efi"
"#;

/// `grub-mkrescue -o <iso> <tree>`
pub(crate) const FAKE_ISO: &str = r#"cat "$3/boot/grub/grub.cfg" > "$2""#;

pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\nset -e\n{body}\n")).unwrap();
    path
}

/// TOML value running `script` through `sh`.
pub(crate) fn toml_tool(script: &Path) -> String {
    format!("[\"sh\", \"{}\"]", script.display())
}

pub(crate) struct Workspace {
    temp: TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.temp.path()
    }

    pub(crate) fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub(crate) fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings::new(self.root())
    }

    /// `[tools]` section pointing at the fake scripts.
    pub(crate) fn tools_section(&self) -> String {
        let dir = self.path("fake-tools");
        let nasm = write_script(&dir, "nasm.sh", FAKE_NASM);
        let ld = write_script(&dir, "ld.sh", FAKE_LD);
        let cargo = write_script(&dir, "cargo.sh", FAKE_CARGO);
        let iso = write_script(&dir, "grub-mkrescue.sh", FAKE_ISO);
        format!(
            "[tools]\nassembler = {}\nlinker = {}\ncargo = {}\niso = {}\n",
            toml_tool(&nasm),
            toml_tool(&ld),
            toml_tool(&cargo),
            toml_tool(&iso)
        )
    }

    /// Boot stubs, linker scripts and grub.cfg of a small kernel tree.
    pub(crate) fn seed_sources(&self) {
        self.write("src/boot/multiboot_header.asm", b"header\n");
        self.write("src/boot/boot.asm", b"boot\n");
        self.write("src/boot/long_mode_init.asm", b"long mode\n");
        self.write("src/boot/grub.cfg", b"menuentry \"os\" { multiboot2 /boot/kernel.bin }\n");
        self.write("linker.ld", b"ENTRY(start)\n");
        self.write("kernel/Cargo.toml", b"[package]\nname = \"rslib\"\n");
        self.write("kernel/linker.ld", b"ENTRY(efi_main)\n");
        self.write("uefis/Cargo.toml", b"[package]\nname = \"uefis\"\n");
    }

    pub(crate) fn multiboot_config(&self) -> String {
        format!(
            r#"
[kernel]
path = "kernel"
library = "rslib"
features = ["pic"]
release = false

[iso]
name = "my.os"
grub_cfg = "src/boot/grub.cfg"

[multiboot]
use = true
sources = "src/boot"
tempfile = false
temp_dir = "boot_temp"
linker_script = "linker.ld"
output = "kernel.bin"

[uefi]
use = false

{}"#,
            self.tools_section()
        )
    }

    pub(crate) fn uefi_config(&self) -> String {
        format!(
            r#"
[kernel]
path = "kernel"
library = "rslib"
features = ["uefi"]
release = true

[iso]
name = "os"

[multiboot]
use = false

[uefi]
use = true
path = "uefis"
package = "uefis"
linker_script = "kernel/linker.ld"
kernel_output = "kernel"
output = "target/esp"

{}"#,
            self.tools_section()
        )
    }
}
