//! Kernel compilation and installation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use halow_kernel_builder::build::kernel::{build, default_jobs, BuildOptions};
//!
//! let options = BuildOptions {
//!     jobs: default_jobs(),
//!     install: true,
//!     update_bootloader: true,
//! };
//! let outcome = build(&tools, &kernel_dir, &options)?;
//! println!("built {}", outcome.kernel_release);
//! ```

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pipeline::config::{BuildConfig, ToolsConfig};
use crate::process::Cmd;

/// What the build step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Passed to `make -j`.
    pub jobs: usize,
    /// Run `modules_install` and `install`.
    pub install: bool,
    /// Run `update-grub`.
    pub update_bootloader: bool,
}

impl BuildOptions {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            jobs: config.jobs.unwrap_or_else(default_jobs),
            install: !config.skip_install,
            update_bootloader: !config.skip_bootloader,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub kernel_release: String,
    /// Names of the stages that ran, in order.
    pub stages: Vec<&'static str>,
}

/// Number of CPUs, or 4 if it cannot be detected.
pub fn default_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            warn!("  Could not detect CPU count ({}), using 4 cores", e);
            4
        }
    }
}

/// Resolve config dependencies, compile, install modules and kernel, and
/// regenerate the bootloader config. Each stage is fatal on failure and
/// nothing is retried.
pub fn build(tools: &ToolsConfig, kernel_dir: &Path, options: &BuildOptions) -> Result<BuildOutcome> {
    if !kernel_dir.join("Makefile").is_file() {
        return Err(Error::io(
            kernel_dir.join("Makefile"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "invalid kernel source - no Makefile"),
        ));
    }

    let kernel_dir_str = kernel_dir.to_string_lossy();
    let make = |stage: &'static str, extra: &[&str]| {
        Cmd::new(&tools.make)
            .args(["-C", kernel_dir_str.as_ref()])
            .args(extra)
            .error_msg(format!("make {stage}"))
    };
    let mut stages = Vec::new();

    // The driver Kconfig is only visible now, so its options and anything
    // the config step set need their dependencies resolved again.
    info!("  Resolving config dependencies...");
    run_stage(&mut stages, "olddefconfig", || {
        make("olddefconfig", &["olddefconfig"]).run().map(drop)
    })?;

    let jobs_arg = format!("-j{}", options.jobs);
    info!("  Building kernel and modules ({})...", jobs_arg);
    run_stage(&mut stages, "compile", || make("compile", &[jobs_arg.as_str()]).run_interactive())?;

    if options.install {
        info!("  Installing modules...");
        run_stage(&mut stages, "modules_install", || {
            make("modules_install", &["modules_install"]).run_interactive()
        })?;

        info!("  Installing kernel...");
        run_stage(&mut stages, "install", || make("install", &["install"]).run_interactive())?;
    } else {
        info!("  [SKIP] modules_install and install");
    }

    if options.update_bootloader {
        info!("  Updating bootloader...");
        run_stage(&mut stages, "bootloader", || {
            Cmd::new(&tools.update_grub)
                .error_msg("update-grub")
                .run_interactive()
        })?;
    } else {
        info!("  [SKIP] bootloader update");
    }

    let kernel_release = get_kernel_version(kernel_dir)?;
    info!("  Kernel version: {}", kernel_release);

    Ok(BuildOutcome {
        kernel_release,
        stages,
    })
}

fn run_stage(
    stages: &mut Vec<&'static str>,
    stage: &'static str,
    run: impl FnOnce() -> std::result::Result<(), crate::process::CommandError>,
) -> Result<()> {
    run().map_err(|source| Error::Build {
        stage: stage.to_string(),
        source,
    })?;
    stages.push(stage);
    Ok(())
}

/// Get the kernel release from a configured (ideally built) tree.
pub fn get_kernel_version(kernel_dir: &Path) -> Result<String> {
    let release_path = kernel_dir.join("include/config/kernel.release");
    if release_path.exists() {
        let release =
            fs::read_to_string(&release_path).map_err(|e| Error::io(&release_path, e))?;
        return Ok(release.trim().to_string());
    }

    let makefile = kernel_dir.join("Makefile");
    let content = fs::read_to_string(&makefile).map_err(|e| Error::io(&makefile, e))?;
    let mut version = String::new();
    let mut patchlevel = String::new();
    let mut sublevel = String::new();
    let mut extraversion = String::new();

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("VERSION = ") {
            version = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("PATCHLEVEL = ") {
            patchlevel = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("SUBLEVEL = ") {
            sublevel = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("EXTRAVERSION =") {
            extraversion = v.trim().to_string();
        }
    }

    if version.is_empty() || patchlevel.is_empty() {
        return Err(Error::io(
            &makefile,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "could not determine kernel version",
            ),
        ));
    }
    Ok(format!("{version}.{patchlevel}.{sublevel}{extraversion}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn logging_tool(dir: &Path, name: &str, log: &Path, fail_when: &str) -> String {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(
                "#!/bin/sh\necho \"{name} $*\" >> '{}'\ncase \"$*\" in\n  *{fail_when}*) exit 2 ;;\nesac\nexit 0\n",
                log.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn kernel_dir(root: &Path) -> std::path::PathBuf {
        let dir = root.join("linux");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("Makefile"),
            "# SPDX-License-Identifier: GPL-2.0\nVERSION = 6\nPATCHLEVEL = 6\nSUBLEVEL = 22\nEXTRAVERSION =\nNAME = Hurr durr I'ma ninja sloth\n",
        )
        .unwrap();
        dir
    }

    fn tools(root: &Path, log: &Path, fail_when: &str) -> ToolsConfig {
        ToolsConfig {
            make: logging_tool(root, "make", log, fail_when),
            update_grub: logging_tool(root, "update-grub", log, fail_when),
            ..ToolsConfig::default()
        }
    }

    fn log_lines(log: &Path) -> Vec<String> {
        fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn version_from_makefile() {
        let temp = tempfile::tempdir().unwrap();
        let dir = kernel_dir(temp.path());
        assert_eq!(get_kernel_version(&dir).unwrap(), "6.6.22");
    }

    #[test]
    fn version_prefers_kernel_release() {
        let temp = tempfile::tempdir().unwrap();
        let dir = kernel_dir(temp.path());
        fs::create_dir_all(dir.join("include/config")).unwrap();
        fs::write(dir.join("include/config/kernel.release"), "6.6.22-halow\n").unwrap();
        assert_eq!(get_kernel_version(&dir).unwrap(), "6.6.22-halow");
    }

    #[test]
    fn full_build_runs_every_stage_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let dir = kernel_dir(temp.path());
        let log = temp.path().join("tools.log");
        let tools = tools(temp.path(), &log, "never-matches");
        let options = BuildOptions {
            jobs: 3,
            install: true,
            update_bootloader: true,
        };

        let outcome = build(&tools, &dir, &options).unwrap();
        assert_eq!(
            outcome.stages,
            ["olddefconfig", "compile", "modules_install", "install", "bootloader"]
        );
        assert_eq!(outcome.kernel_release, "6.6.22");

        let d = dir.display();
        assert_eq!(
            log_lines(&log),
            [
                format!("make -C {d} olddefconfig"),
                format!("make -C {d} -j3"),
                format!("make -C {d} modules_install"),
                format!("make -C {d} install"),
                "update-grub ".to_string(),
            ]
        );
    }

    #[test]
    fn skipped_stages_do_not_run() {
        let temp = tempfile::tempdir().unwrap();
        let dir = kernel_dir(temp.path());
        let log = temp.path().join("tools.log");
        let tools = tools(temp.path(), &log, "never-matches");
        let options = BuildOptions {
            jobs: 1,
            install: false,
            update_bootloader: false,
        };

        let outcome = build(&tools, &dir, &options).unwrap();
        assert_eq!(outcome.stages, ["olddefconfig", "compile"]);
        assert_eq!(log_lines(&log).len(), 2);
    }

    #[test]
    fn failing_stage_stops_the_build() {
        let temp = tempfile::tempdir().unwrap();
        let dir = kernel_dir(temp.path());
        let log = temp.path().join("tools.log");
        let tools = tools(temp.path(), &log, "modules_install");
        let options = BuildOptions {
            jobs: 2,
            install: true,
            update_bootloader: true,
        };

        let err = build(&tools, &dir, &options).unwrap_err();
        match &err {
            Error::Build { stage, source } => {
                assert_eq!(stage, "modules_install");
                assert_eq!(source.code(), Some(2));
            }
            other => panic!("expected Build, got {other:?}"),
        }
        let lines = log_lines(&log);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with("modules_install"));
    }

    #[test]
    fn missing_makefile_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let options = BuildOptions {
            jobs: 1,
            install: false,
            update_bootloader: false,
        };
        let err = build(&ToolsConfig::default(), temp.path(), &options).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn options_from_config() {
        let config = BuildConfig {
            jobs: Some(6),
            skip_install: true,
            skip_bootloader: false,
        };
        assert_eq!(
            BuildOptions::from_config(&config),
            BuildOptions {
                jobs: 6,
                install: false,
                update_bootloader: true,
            }
        );
        assert!(BuildOptions::from_config(&BuildConfig::default()).jobs >= 1);
    }
}
