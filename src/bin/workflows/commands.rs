use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, info};

use halow_kernel_builder::kconfig::{self, LinePattern};
use halow_kernel_builder::pipeline::{self, paths::resolve_path};
use halow_kernel_builder::{preflight, RunConfig};

use crate::{Cli, Command, InsertLineArgs, RunArgs, SetOptionArgs};

pub(crate) fn dispatch(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    match cli.cmd {
        Command::Run(args) => run(&effective_config(cli.config.as_deref(), &cwd, &args)?),
        Command::Check(args) => check(&effective_config(cli.config.as_deref(), &cwd, &args)?),
        Command::ShowConfig(args) => {
            let config = effective_config(cli.config.as_deref(), &cwd, &args)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::SetOption(args) => set_option(&args),
        Command::InsertLine(args) => insert_line(&args),
    }
}

/// Config file (or defaults), then command-line overrides, with the work
/// dir made absolute.
fn effective_config(file: Option<&Path>, cwd: &Path, args: &RunArgs) -> Result<RunConfig> {
    let mut config = RunConfig::load_or_default(file, cwd)?;
    apply_overrides(&mut config, args);
    config.work_dir = resolve_path(cwd, &config.work_dir);
    Ok(config)
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(repo) = &args.kernel_repo {
        config.kernel.repo = repo.clone();
    }
    if let Some(branch) = &args.kernel_branch {
        config.kernel.branch = branch.clone();
    }
    if let Some(base) = &args.base_config {
        config.kernel.base_config = base.clone();
    }
    // Checksum and legacy dir name belong to the configured URL.
    if let Some(url) = &args.driver_url {
        config.driver.archive.url = url.clone();
        config.driver.archive.sha256 = None;
        config.driver.archive.legacy_dir = None;
    }
    if let Some(url) = &args.patches_url {
        config.patches.archive.url = url.clone();
        config.patches.archive.sha256 = None;
        config.patches.archive.legacy_dir = None;
    }
    if args.jobs.is_some() {
        config.build.jobs = args.jobs;
    }

    for (name, value) in &args.options {
        config.kernel.disabled.retain(|d| d != name);
        config.kernel.options.insert(name.clone(), value.clone());
    }
    for name in &args.disabled {
        config.kernel.options.remove(name);
        if !config.kernel.disabled.contains(name) {
            config.kernel.disabled.push(name.clone());
        }
    }

    config.build.skip_install |= args.skip_install;
    config.build.skip_bootloader |= args.skip_bootloader;
}

fn run(config: &RunConfig) -> Result<()> {
    debug!("effective configuration:\n{}", config.to_toml()?);
    info!("Building in {}", config.work_dir.display());

    let report = pipeline::run(config)?;

    info!("Done.");
    info!("  Kernel release:  {}", report.kernel_release);
    info!("  Kernel tree:     {}", report.kernel_dir.display());
    info!("  Driver files:    {}", report.driver.files_copied);
    info!("  Patches applied: {}", report.patches_applied);
    info!("  Build stages:    {}", report.build_stages.join(", "));
    if config.build.skip_install || config.build.skip_bootloader {
        info!("  Install steps were skipped; reboot is not enough to pick up this kernel.");
    } else {
        info!("  Reboot to use the new kernel.");
    }
    Ok(())
}

fn check(config: &RunConfig) -> Result<()> {
    config.validate()?;
    preflight::check_host(config)?;
    info!("Host is ready to build in {}", config.work_dir.display());
    Ok(())
}

fn set_option(args: &SetOptionArgs) -> Result<()> {
    let (name, value) = &args.assignment;
    if args.create {
        ensure_file(&args.file)?;
    }
    kconfig::set_option(&args.file, name, value)?;
    info!("{}: {}={}", args.file.display(), name, value);
    Ok(())
}

fn insert_line(args: &InsertLineArgs) -> Result<()> {
    let anchor = LinePattern::regex(&args.anchor)
        .with_context(|| format!("invalid anchor regex '{}'", args.anchor))?;
    if args.create {
        ensure_file(&args.file)?;
    }
    let outcome = kconfig::insert_after_pattern(&args.file, &anchor, &args.line)?;
    info!("{}: `{}` {}", args.file.display(), args.line, outcome);
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    Ok(())
}
