//! Working directory preparation: kernel clone and base `.config`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::pipeline::config::{BaseConfig, KernelConfig, ToolsConfig};
use crate::pipeline::paths::WorkspacePaths;
use crate::process::Cmd;

const OSRELEASE: &str = "/proc/sys/kernel/osrelease";

/// `/boot/config-<release>` of the running kernel.
pub fn running_kernel_config() -> Result<PathBuf> {
    let release = fs::read_to_string(OSRELEASE).map_err(|e| Error::io(OSRELEASE, e))?;
    Ok(PathBuf::from(format!("/boot/config-{}", release.trim())))
}

/// Clone the kernel unless a tree is already there.
///
/// An existing tree with a top-level Makefile is reused as is, so a rerun
/// after a failed build does not fetch the kernel again.
pub fn clone_kernel(tools: &ToolsConfig, kernel: &KernelConfig, kernel_dir: &Path) -> Result<bool> {
    if kernel_dir.join("Makefile").is_file() {
        info!("  [SKIP] Kernel tree exists at {}", kernel_dir.display());
        return Ok(false);
    }

    info!("  Cloning {} ({})...", kernel.repo, kernel.branch);
    Cmd::new(&tools.git)
        .args(["clone", "--depth", "1", "--branch"])
        .arg(&kernel.branch)
        .arg(&kernel.repo)
        .arg(kernel_dir)
        .error_msg("git clone failed")
        .run_interactive()?;
    Ok(true)
}

/// Put the base configuration at `<kernel>/.config`.
pub fn install_base_config(tools: &ToolsConfig, base: &BaseConfig, kernel_dir: &Path) -> Result<()> {
    let config_path = kernel_dir.join(".config");
    info!("  Base config: {}", base);

    match base {
        BaseConfig::Running => {
            let source = running_kernel_config()?;
            copy_config(&source, &config_path)
        }
        BaseConfig::Path(source) => copy_config(source, &config_path),
        BaseConfig::Url(url) => {
            Cmd::new(&tools.curl)
                .args(["-fsSL", "-o"])
                .arg(&config_path)
                .arg(url)
                .error_msg(format!("downloading base config {url}"))
                .run()?;
            Ok(())
        }
        BaseConfig::Defconfig => {
            Cmd::new(&tools.make)
                .arg("-C")
                .arg(kernel_dir)
                .arg("defconfig")
                .error_msg("make defconfig failed")
                .run()?;
            Ok(())
        }
    }
}

fn copy_config(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).map_err(|e| Error::io(source, e))?;
    Ok(())
}

/// Fill options the base config does not know about with their defaults,
/// without prompting.
pub fn olddefconfig(tools: &ToolsConfig, kernel_dir: &Path) -> Result<()> {
    info!("  Running olddefconfig...");
    Cmd::new(&tools.make)
        .arg("-C")
        .arg(kernel_dir)
        .arg("olddefconfig")
        .error_msg("make olddefconfig failed")
        .run()?;
    Ok(())
}

/// Create the working directory, clone the kernel, install the base config
/// and reconfigure non-interactively.
pub fn prepare_workspace(
    tools: &ToolsConfig,
    kernel: &KernelConfig,
    base: &BaseConfig,
    paths: &WorkspacePaths,
) -> Result<()> {
    fs::create_dir_all(&paths.work_dir).map_err(|e| Error::io(&paths.work_dir, e))?;
    clone_kernel(tools, kernel, &paths.kernel_dir)?;
    install_base_config(tools, base, &paths.kernel_dir)?;
    olddefconfig(tools, &paths.kernel_dir)
}
