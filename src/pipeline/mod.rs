//! The end-to-end build procedure.
//!
//! ```text
//! preflight -> workspace -> config -> fetch -> integrate -> patch -> build
//! ```
//!
//! Steps run strictly in this order on one thread. The first failure stops
//! the run and comes back as a [`StepFailure`] naming the step; whatever the
//! earlier steps left in the working directory stays there for inspection.

pub mod config;
pub mod paths;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::build::{self, BuildOptions};
use crate::error::{Error, Result, StepFailure};
use crate::kconfig;
use crate::patch;
use crate::preflight;
use crate::source::{self, DriverRegistration, IntegrationReport};
use config::RunConfig;
use paths::WorkspacePaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Preflight,
    Workspace,
    Config,
    Fetch,
    Integrate,
    Patch,
    Build,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Preflight,
        Step::Workspace,
        Step::Config,
        Step::Fetch,
        Step::Integrate,
        Step::Patch,
        Step::Build,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Preflight => "preflight",
            Step::Workspace => "workspace",
            Step::Config => "config",
            Step::Fetch => "fetch",
            Step::Integrate => "integrate",
            Step::Patch => "patch",
            Step::Build => "build",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Step::Preflight => "Checking host tools and privileges",
            Step::Workspace => "Preparing kernel tree",
            Step::Config => "Applying kernel options",
            Step::Fetch => "Fetching driver and patches",
            Step::Integrate => "Integrating driver",
            Step::Patch => "Patching kernel",
            Step::Build => "Building kernel",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub kernel_dir: PathBuf,
    pub kernel_release: String,
    pub patches_applied: usize,
    pub driver: IntegrationReport,
    pub build_stages: Vec<&'static str>,
}

fn in_step<T>(step: Step, work_dir: &Path, f: impl FnOnce() -> Result<T>) -> Result<T, StepFailure> {
    info!("[{}] {}...", step, step.description());
    f().map_err(|source| StepFailure {
        step,
        work_dir: work_dir.to_path_buf(),
        source,
    })
}

fn config_error(e: anyhow::Error) -> Error {
    Error::Config(format!("{e:#}"))
}

/// Run every step for `config`. `config.work_dir` is used as given, so
/// callers resolve it against their own base directory first.
pub fn run(config: &RunConfig) -> Result<RunReport, StepFailure> {
    let paths = WorkspacePaths::new(&config.work_dir, &config.kernel.dir_name);
    let work_dir = paths.work_dir.as_path();
    let tools = &config.tools;

    let base = in_step(Step::Preflight, work_dir, || {
        config.validate().map_err(config_error)?;
        let base = config.base_config().map_err(config_error)?;
        preflight::check_host(config)?;
        Ok(base)
    })?;

    in_step(Step::Workspace, work_dir, || {
        build::prepare_workspace(tools, &config.kernel, &base, &paths)
    })?;

    in_step(Step::Config, work_dir, || {
        let config_path = paths.kernel_config();
        kconfig::apply_options(
            &config_path,
            config
                .kernel
                .options
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
            config.kernel.disabled.iter().map(String::as_str),
        )?;
        info!(
            "  {} options set, {} disabled",
            config.kernel.options.len(),
            config.kernel.disabled.len()
        );
        Ok(())
    })?;

    let (driver_dir, patches_dir) = in_step(Step::Fetch, work_dir, || {
        let driver = source::fetch_and_extract(tools, &config.driver.archive, &paths.downloads_dir)?;
        let patches =
            source::fetch_and_extract(tools, &config.patches.archive, &paths.downloads_dir)?;
        Ok((driver, patches))
    })?;

    let driver = in_step(Step::Integrate, work_dir, || {
        let source_dir = match &config.driver.source_subdir {
            Some(subdir) => driver_dir.join(subdir),
            None => driver_dir.clone(),
        };
        let registration = DriverRegistration::from_config(&config.driver);
        source::integrate_driver(&source_dir, &paths.kernel_dir, &registration)
    })?;

    let patches_applied = in_step(Step::Patch, work_dir, || {
        let sets = patch::configured_patch_sets(&config.patches, &patches_dir)?;
        patch::apply_patch_sets(tools, &sets, &paths.kernel_dir)
    })?;

    let outcome = in_step(Step::Build, work_dir, || {
        build::build(
            tools,
            &paths.kernel_dir,
            &BuildOptions::from_config(&config.build),
        )
    })?;

    info!("Kernel {} ready", outcome.kernel_release);
    Ok(RunReport {
        kernel_dir: paths.kernel_dir.clone(),
        kernel_release: outcome.kernel_release,
        patches_applied,
        driver,
        build_stages: outcome.stages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kconfig::Insertion;
    use crate::pipeline::config::{ArchiveConfig, ToolsConfig};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    const KCONFIG_TI: &str = "source \"drivers/net/wireless/ti/Kconfig\"";
    const KCONFIG_MORSE: &str = "source \"drivers/net/wireless/morse/Kconfig\"";

    fn tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Stand-ins for every external tool. All of them append their
    /// invocation to `log`; `patch` fails on any file matching `fail_patch`.
    fn fake_tools(bin: &Path, log: &Path, fail_patch: &str) -> ToolsConfig {
        let log = log.display();
        let git = format!(
            r#"echo "git $*" >> '{log}'
mkdir -p "$7/drivers/net/wireless"
printf 'VERSION = 6\nPATCHLEVEL = 6\nSUBLEVEL = 22\nEXTRAVERSION =\n' > "$7/Makefile"
printf 'source "drivers/net/wireless/ti/Kconfig"\nsource "drivers/net/wireless/zydas/Kconfig"\n' > "$7/drivers/net/wireless/Kconfig"
printf 'obj-$(CONFIG_WLAN_VENDOR_TI) += ti/\nobj-$(CONFIG_WLAN_VENDOR_ZYDAS) += zydas/\n' > "$7/drivers/net/wireless/Makefile""#
        );
        let curl = format!(r#"echo "curl $*" >> '{log}'
printf 'zip' > "$3""#);
        let unzip = format!(
            r#"echo "unzip $*" >> '{log}'
case "$3" in
  *morse_driver.zip)
    mkdir -p "$5/morse_driver/sub"
    echo 'obj-m += morse.o' > "$5/morse_driver/Makefile"
    echo 'int morse;' > "$5/morse_driver/sub/morse.c" ;;
  *linux-patches.zip)
    mkdir -p "$5/linux-patches/kernel/6.6.x" "$5/linux-patches/headers"
    for p in 0003-c 0001-a 0002-b; do echo "$p" > "$5/linux-patches/kernel/6.6.x/$p.patch"; done
    for h in ieee80211 nl80211 cfg80211 mac80211; do echo "$h" > "$5/linux-patches/headers/$h.h.patch"; done ;;
esac"#
        );
        let patch = format!(
            r#"echo "patch $*" >> '{log}'
case "$*" in
  *{fail_patch}*) echo "Hunk #1 FAILED at 10." >&2; exit 1 ;;
esac"#
        );
        let make = format!(r#"echo "make $*" >> '{log}'"#);

        ToolsConfig {
            git: tool(bin, "git", &git),
            curl: tool(bin, "curl", &curl),
            unzip: tool(bin, "unzip", &unzip),
            patch: tool(bin, "patch", &patch),
            make: tool(bin, "make", &make),
            update_grub: tool(bin, "update-grub", &format!(r#"echo "update-grub" >> '{log}'"#)),
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        config: RunConfig,
        log: PathBuf,
    }

    fn fixture(fail_patch: &str) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let log = temp.path().join("tools.log");

        let base = temp.path().join("base.config");
        fs::write(
            &base,
            "CONFIG_WLAN=y\n# CONFIG_CRYPTO_CCM is not set\nCONFIG_DEBUG_INFO_BTF=y\n",
        )
        .unwrap();

        let mut config = RunConfig {
            work_dir: temp.path().join("work"),
            tools: fake_tools(&bin, &log, fail_patch),
            ..RunConfig::default()
        };
        config.kernel.base_config = base.to_string_lossy().into_owned();
        config.driver.archive = ArchiveConfig {
            url: "https://example.org/dl/morse_driver.zip".to_string(),
            legacy_dir: None,
            sha256: None,
        };
        config.patches.archive = ArchiveConfig {
            url: "https://example.org/dl/linux-patches.zip".to_string(),
            legacy_dir: None,
            sha256: None,
        };
        config.build.jobs = Some(2);
        config.build.skip_install = true;
        config.build.skip_bootloader = true;

        Fixture {
            _temp: temp,
            config,
            log,
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
    fn step_names_are_lowercase() {
        let names: Vec<_> = Step::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            ["preflight", "workspace", "config", "fetch", "integrate", "patch", "build"]
        );
    }

    #[test]
    fn full_run_with_stand_in_tools() {
        let fx = fixture("never-matches");
        let report = run(&fx.config).unwrap();

        assert_eq!(report.kernel_release, "6.6.22");
        assert_eq!(report.patches_applied, 7);
        assert_eq!(report.driver.files_copied, 2);
        assert_eq!(report.build_stages, ["olddefconfig", "compile"]);

        let kernel = &report.kernel_dir;
        let dot_config = fs::read_to_string(kernel.join(".config")).unwrap();
        assert!(dot_config.contains("CONFIG_CRYPTO_CCM=y\n"));
        assert!(!dot_config.contains("CONFIG_CRYPTO_CCM is not set"));
        assert!(dot_config.contains("# CONFIG_DEBUG_INFO_BTF is not set\n"));
        assert!(!dot_config.contains("CONFIG_DEBUG_INFO_BTF=y"));
        assert!(dot_config.contains("CONFIG_SYSTEM_TRUSTED_KEYS=\"\"\n"));

        let kconfig = fs::read_to_string(kernel.join("drivers/net/wireless/Kconfig")).unwrap();
        let lines: Vec<&str> = kconfig.lines().collect();
        assert_eq!(lines[0], KCONFIG_TI);
        assert_eq!(lines[1], KCONFIG_MORSE);
        let makefile = fs::read_to_string(kernel.join("drivers/net/wireless/Makefile")).unwrap();
        assert_eq!(
            makefile.lines().nth(1),
            Some("obj-$(CONFIG_WLAN_VENDOR_MORSE) += morse/")
        );
        assert!(kernel.join("drivers/net/wireless/morse/sub/morse.c").is_file());

        let patches: Vec<String> = log_lines(&fx.log)
            .into_iter()
            .filter(|l| l.starts_with("patch "))
            .map(|l| l.rsplit('/').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            patches,
            [
                "0001-a.patch",
                "0002-b.patch",
                "0003-c.patch",
                "ieee80211.h.patch",
                "nl80211.h.patch",
                "cfg80211.h.patch",
                "mac80211.h.patch",
            ]
        );
        assert_eq!(log_lines(&fx.log).last().map(String::as_str), Some(
            format!("make -C {} -j2", kernel.display()).as_str()
        ));
    }

    #[test]
    fn rerun_reuses_tree_and_does_not_duplicate_registration() {
        let fx = fixture("never-matches");
        run(&fx.config).unwrap();
        let second = run(&fx.config).unwrap();

        assert_eq!(second.driver.kconfig, Insertion::AlreadyPresent);
        assert_eq!(second.driver.makefile, Insertion::AlreadyPresent);

        let kconfig =
            fs::read_to_string(second.kernel_dir.join("drivers/net/wireless/Kconfig")).unwrap();
        assert_eq!(kconfig.lines().filter(|l| *l == KCONFIG_MORSE).count(), 1);

        let clones = log_lines(&fx.log)
            .iter()
            .filter(|l| l.starts_with("git clone"))
            .count();
        assert_eq!(clones, 1);
    }

    #[test]
    fn failing_patch_stops_the_run() {
        let fx = fixture("0002-b.patch");
        let failure = run(&fx.config).unwrap_err();

        assert_eq!(failure.step, Step::Patch);
        assert_eq!(failure.work_dir, fx.config.work_dir);
        match &failure.source {
            Error::PatchApplication { patch, reason } => {
                assert!(patch.ends_with("0002-b.patch"));
                assert!(reason.contains("Hunk #1 FAILED"));
            }
            other => panic!("expected PatchApplication, got {other:?}"),
        }
        assert_eq!(failure.source.exit_code(), 5);

        let lines = log_lines(&fx.log);
        assert!(lines.last().unwrap().ends_with("0002-b.patch"));
        assert!(!lines.iter().any(|l| l.contains("0003-c.patch")));
        assert!(!lines.iter().any(|l| l.contains("-j2")));
    }

    #[test]
    fn invalid_configuration_fails_preflight() {
        let mut fx = fixture("never-matches");
        fx.config.kernel.disabled.push("NOT VALID".to_string());
        let failure = run(&fx.config).unwrap_err();

        assert_eq!(failure.step, Step::Preflight);
        assert_eq!(failure.source.exit_code(), 1);
        assert!(!fx.log.exists());
    }

    #[test]
    fn missing_tool_fails_preflight() {
        let mut fx = fixture("never-matches");
        fx.config.tools.unzip = "/nonexistent/unzip".to_string();
        let failure = run(&fx.config).unwrap_err();

        assert_eq!(failure.step, Step::Preflight);
        match &failure.source {
            Error::MissingTool(missing) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].command, "/nonexistent/unzip");
            }
            other => panic!("expected MissingTool, got {other:?}"),
        }
    }
}
