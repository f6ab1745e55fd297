mod workflows;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use halow_kernel_builder::{Error, StepFailure};

#[derive(Debug, Parser)]
#[command(
    name = "halow-kernel-builder",
    version,
    about = "Build and install a Linux kernel with the Morse Micro HaLow driver."
)]
struct Cli {
    /// TOML config file (default: ./halow-kernel-builder.toml if present).
    #[arg(long, global = true, env = "HALOW_KERNEL_BUILDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline: clone, configure, integrate, patch, build, install.
    Run(RunArgs),
    /// Only check host tools and privileges.
    Check(RunArgs),
    /// Print the effective configuration as TOML.
    ShowConfig(RunArgs),
    /// Set `NAME=VALUE` in a .config-style file, replacing other definitions.
    SetOption(SetOptionArgs),
    /// Insert a line after the first line matching a regex, once.
    InsertLine(InsertLineArgs),
}

/// Overrides applied on top of the config file.
#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Working directory for the kernel clone and downloads.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Kernel git repository.
    #[arg(long)]
    kernel_repo: Option<String>,

    /// Kernel branch or tag.
    #[arg(long)]
    kernel_branch: Option<String>,

    /// Starting config: running, defconfig, a path, or an http(s) URL.
    #[arg(long)]
    base_config: Option<String>,

    /// Driver archive URL.
    #[arg(long)]
    driver_url: Option<String>,

    /// Kernel patch archive URL.
    #[arg(long)]
    patches_url: Option<String>,

    /// Parallel make jobs (default: number of CPUs).
    #[arg(long)]
    jobs: Option<usize>,

    /// Extra kernel option, e.g. CONFIG_CRYPTO_CCM=y. Repeatable.
    #[arg(long = "option", value_name = "NAME=VALUE", value_parser = workflows::parse_assignment)]
    options: Vec<(String, String)>,

    /// Kernel option to switch off. Repeatable.
    #[arg(long = "disable", value_name = "NAME")]
    disabled: Vec<String>,

    /// Skip modules_install and install.
    #[arg(long, default_value_t = false)]
    skip_install: bool,

    /// Skip update-grub.
    #[arg(long, default_value_t = false)]
    skip_bootloader: bool,
}

#[derive(Debug, Args)]
struct SetOptionArgs {
    /// File to edit. Must exist unless --create is given.
    #[arg(long)]
    file: PathBuf,

    /// Create the file when it does not exist.
    #[arg(long, default_value_t = false)]
    create: bool,

    #[arg(value_name = "NAME=VALUE", value_parser = workflows::parse_assignment)]
    assignment: (String, String),
}

#[derive(Debug, Args)]
struct InsertLineArgs {
    /// File to edit. Must exist unless --create is given.
    #[arg(long)]
    file: PathBuf,

    /// Create the file when it does not exist.
    #[arg(long, default_value_t = false)]
    create: bool,

    /// Regex for the line to insert after.
    #[arg(long)]
    anchor: String,

    /// Line to insert.
    #[arg(long)]
    line: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match workflows::dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(report_failure(&e)),
    }
}

/// Log `e` and pick the exit code for its kind.
fn report_failure(e: &anyhow::Error) -> u8 {
    if let Some(failure) = e.downcast_ref::<StepFailure>() {
        error!("step '{}' failed: {}", failure.step, error_chain(&failure.source));
        error!(
            "working directory left for inspection: {}",
            failure.work_dir.display()
        );
        return failure.source.exit_code();
    }

    error!("{:#}", e);
    e.chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map_or(1, Error::exit_code)
}

/// `e` followed by each cause not already part of its message.
fn error_chain(e: &Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
