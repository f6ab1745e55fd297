//! Preflight checks for build validation.
//!
//! Validates that the host has every external tool the pipeline shells out
//! to, and that it runs with the privileges the install steps need. This
//! prevents a clone and a half-hour compile from ending in a cryptic error.
//!
//! # Example
//!
//! ```rust
//! use halow_kernel_builder::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("patch") {
//!     println!("patch not installed");
//! }
//!
//! let tools = &[("sh", "dash"), ("ls", "coreutils")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use tracing::{debug, info};

use crate::error::{Error, MissingTool, Result};
use crate::pipeline::config::RunConfig;

/// Check if a command exists on the host system.
///
/// Bare names are looked up on `PATH`; names containing a slash are checked
/// as paths.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is `(command, install hint)`. Every missing tool is reported,
/// not just the first.
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, S)]) -> Result<()> {
    let missing: Vec<MissingTool> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool.as_ref()))
        .map(|(tool, hint)| MissingTool {
            command: tool.as_ref().to_string(),
            install_hint: hint.as_ref().to_string(),
        })
        .collect();

    if !missing.is_empty() {
        return Err(Error::MissingTool(missing));
    }
    Ok(())
}

/// The `(command, install hint)` pairs a run with `config` needs.
pub fn required_tools(config: &RunConfig) -> Vec<(String, String)> {
    let tools = &config.tools;
    let mut required = vec![
        (tools.git.clone(), "git".to_string()),
        (tools.curl.clone(), "curl".to_string()),
        (tools.unzip.clone(), "unzip".to_string()),
        (tools.patch.clone(), "patch".to_string()),
        (tools.make.clone(), "make (build-essential)".to_string()),
    ];
    if !config.build.skip_bootloader {
        required.push((tools.update_grub.clone(), "grub2-common".to_string()));
    }
    required
}

/// Steps of a run with `config` that must run as root.
pub fn privileged_steps(config: &RunConfig) -> Vec<String> {
    let mut steps = Vec::new();
    if !config.build.skip_install {
        steps.push("modules_install".to_string());
        steps.push("install".to_string());
    }
    if !config.build.skip_bootloader {
        steps.push("update-grub".to_string());
    }
    steps
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Run every preflight check for `config`.
pub fn check_host(config: &RunConfig) -> Result<()> {
    let tools = required_tools(config);
    debug!(
        "checking host tools: {}",
        tools
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    check_required_tools(&tools)?;

    let steps = privileged_steps(config);
    if !steps.is_empty() && !is_root() {
        return Err(Error::InsufficientPrivileges { steps });
    }

    info!("host tools present");
    Ok(())
}
