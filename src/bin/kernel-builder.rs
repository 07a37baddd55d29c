use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kernel_builder::artifact::ArtifactKind;
use kernel_builder::preflight::check_host_tools;
use kernel_builder::{BuildConfiguration, BuildOrchestrator, Error, Settings, VmTestHarness};

/// Build a kernel image and boot-test it in QEMU
#[derive(Parser)]
#[command(name = "kernel-builder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Build configuration
    #[arg(short, long, global = true, default_value = "build.toml")]
    config: PathBuf,

    /// Echo every external command before running it
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run the VM without a display window
    #[arg(long, global = true)]
    headless: bool,

    /// Build with the release profile regardless of the configuration
    #[arg(long, global = true)]
    release: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Build the image and print where it is
    Build,
    /// Build the image and run the VM test session (default)
    Run,
    /// Check that the required host tools are installed
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = BuildConfiguration::from_file(&cli.config)?;
    let settings = Settings {
        workspace: workspace_root(&cli.config)?,
        verbose: cli.verbose,
        headless: cli.headless,
        release: cli.release,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            check_host_tools(&config, true)?;
            println!("All required host tools found");
        }
        Commands::Build => {
            check_host_tools(&config, false)?;
            let output = BuildOrchestrator::new(&config, &settings).build()?;
            println!();
            println!("Kernel: {}", output.kernel.display());
            println!("  SHA256: {}", output.kernel_sha256);
            let label = match output.image.kind() {
                ArtifactKind::IsoImage => "ISO",
                _ => "ESP",
            };
            println!("{label}: {}", output.image.path().display());
        }
        Commands::Run => {
            check_host_tools(&config, true)?;
            let report = VmTestHarness::new(&config, &settings)?.run()?;
            println!();
            println!(
                "VM session passed ({} lines, {} screenshots)",
                report.line_count,
                report.screenshots.len()
            );
        }
    }
    Ok(())
}

/// Directory holding the configuration file, made absolute.
fn workspace_root(config: &Path) -> Result<PathBuf> {
    let config = config
        .canonicalize()
        .with_context(|| format!("resolving '{}'", config.display()))?;
    Ok(config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/")))
}
