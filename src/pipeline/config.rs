//! Run configuration.
//!
//! Everything the pipeline needs is a named parameter with a default, so a
//! bare `halow-kernel-builder run` reproduces the stock procedure. Values can
//! be overridden from a TOML file and then from the command line.
//!
//! ```toml
//! work_dir = "/var/tmp/halow-build"
//!
//! [kernel]
//! branch = "v6.6.22"
//! base_config = "running"
//! disabled = ["CONFIG_DEBUG_INFO_BTF"]
//!
//! [kernel.options]
//! CONFIG_CRYPTO_CCM = "y"
//!
//! [build]
//! jobs = 8
//! skip_bootloader = true
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::kconfig::{single_line, validate_option_name};

/// Config file picked up from the current directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "halow-kernel-builder.toml";

const DRIVER_RELEASE: &str = "rel_1_12_4_2024_Jun_11";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Directory holding the kernel clone and downloaded archives.
    pub work_dir: PathBuf,
    pub kernel: KernelConfig,
    pub driver: DriverConfig,
    pub patches: PatchesConfig,
    pub build: BuildConfig,
    pub tools: ToolsConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("halow-build"),
            kernel: KernelConfig::default(),
            driver: DriverConfig::default(),
            patches: PatchesConfig::default(),
            build: BuildConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub repo: String,
    /// Branch or tag passed to `git clone --branch`.
    pub branch: String,
    /// Name of the clone under `work_dir`.
    pub dir_name: String,
    /// `running`, `defconfig`, a local path, or an http(s) URL.
    pub base_config: String,
    /// Options written as `# NAME is not set`.
    pub disabled: Vec<String>,
    /// Options written as `NAME=value`. Values are literal, so string
    /// options carry their own quotes.
    pub options: BTreeMap<String, String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let options = [
            ("CONFIG_CFG80211", "m"),
            ("CONFIG_MAC80211", "m"),
            ("CONFIG_MAC80211_MESH", "y"),
            ("CONFIG_CRYPTO_CCM", "y"),
            ("CONFIG_CRYPTO_GCM", "y"),
            ("CONFIG_CRYPTO_CMAC", "y"),
            ("CONFIG_WLAN_VENDOR_MORSE", "m"),
            ("CONFIG_MORSE_SDIO", "y"),
            ("CONFIG_MORSE_USER_ACCESS", "y"),
            ("CONFIG_MORSE_VENDOR_COMMAND", "y"),
            ("CONFIG_SYSTEM_TRUSTED_KEYS", "\"\""),
            ("CONFIG_SYSTEM_REVOCATION_KEYS", "\"\""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            repo: "https://git.kernel.org/pub/scm/linux/kernel/git/stable/linux.git".to_string(),
            branch: "v6.6.22".to_string(),
            dir_name: "linux".to_string(),
            base_config: "running".to_string(),
            disabled: vec!["CONFIG_DEBUG_INFO_BTF".to_string()],
            options,
        }
    }
}

/// A downloadable archive and how to find what it extracts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    pub url: String,
    /// Directory name the archive is known to extract to, when it differs
    /// from the archive file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_dir: Option<String>,
    /// Expected SHA-256 of the downloaded file, lowercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Subdirectory of the extracted archive holding the driver sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_subdir: Option<PathBuf>,
    /// Where the driver lands inside the kernel tree.
    pub vendor_subpath: PathBuf,
    /// Kconfig symbol gating the vendor directory, without `CONFIG_`.
    pub config_symbol: String,
    /// Sibling vendor directory whose registration lines are the anchors.
    pub sibling_dir: String,
    pub sibling_config_symbol: String,
    pub archive: ArchiveConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            source_subdir: None,
            vendor_subpath: PathBuf::from("drivers/net/wireless/morse"),
            config_symbol: "WLAN_VENDOR_MORSE".to_string(),
            sibling_dir: "ti".to_string(),
            sibling_config_symbol: "WLAN_VENDOR_TI".to_string(),
            archive: ArchiveConfig {
                url: format!(
                    "https://github.com/MorseMicro/morse_driver/archive/refs/tags/{DRIVER_RELEASE}.zip"
                ),
                legacy_dir: Some(format!("morse_driver-{DRIVER_RELEASE}")),
                sha256: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchesConfig {
    /// Directory (inside the extracted archive) of bulk patches, applied in
    /// file name order.
    pub bulk_dir: PathBuf,
    /// `patch -F` fuzz for the bulk set. 0 means exact context.
    pub bulk_fuzz: u32,
    /// Directory (inside the extracted archive) of the header patches.
    pub headers_dir: PathBuf,
    /// Header patches, applied in exactly this order.
    pub headers: Vec<String>,
    pub headers_fuzz: u32,
    /// `patch -p` strip level for every set.
    pub strip: u32,
    pub archive: ArchiveConfig,
}

impl Default for PatchesConfig {
    fn default() -> Self {
        Self {
            bulk_dir: PathBuf::from("kernel/6.6.x"),
            bulk_fuzz: 3,
            headers_dir: PathBuf::from("headers"),
            headers: vec![
                "ieee80211.h.patch".to_string(),
                "nl80211.h.patch".to_string(),
                "cfg80211.h.patch".to_string(),
                "mac80211.h.patch".to_string(),
            ],
            headers_fuzz: 0,
            strip: 1,
            archive: ArchiveConfig {
                url: format!(
                    "https://github.com/MorseMicro/linux-patches/archive/refs/tags/{DRIVER_RELEASE}.zip"
                ),
                legacy_dir: Some(format!("linux-patches-{DRIVER_RELEASE}")),
                sha256: None,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// `make -j` value. Defaults to the number of available CPUs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
    /// Skip `modules_install` and `install`.
    pub skip_install: bool,
    /// Skip `update-grub`.
    pub skip_bootloader: bool,
}

/// Program names (or paths) for each external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub git: String,
    pub curl: String,
    pub unzip: String,
    pub patch: String,
    pub make: String,
    pub update_grub: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            curl: "curl".to_string(),
            unzip: "unzip".to_string(),
            patch: "patch".to_string(),
            make: "make".to_string(),
            update_grub: "update-grub".to_string(),
        }
    }
}

/// Where the starting `.config` comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseConfig {
    /// `/boot/config-<release>` of the running kernel.
    Running,
    /// `make defconfig` for the host architecture.
    Defconfig,
    Path(PathBuf),
    Url(String),
}

impl FromStr for BaseConfig {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        match value {
            "" => bail!("base_config must not be empty"),
            "running" => Ok(BaseConfig::Running),
            "defconfig" => Ok(BaseConfig::Defconfig),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(BaseConfig::Url(url.to_string()))
            }
            path => Ok(BaseConfig::Path(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for BaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseConfig::Running => write!(f, "running kernel config"),
            BaseConfig::Defconfig => write!(f, "defconfig"),
            BaseConfig::Path(path) => write!(f, "{}", path.display()),
            BaseConfig::Url(url) => write!(f, "{url}"),
        }
    }
}

impl RunConfig {
    /// Load a config file. Missing tables and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let config: RunConfig =
            toml::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, else `DEFAULT_CONFIG_FILE` under `dir` if it
    /// exists, else the defaults.
    pub fn load_or_default(path: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let discovered = dir.join(DEFAULT_CONFIG_FILE);
        if discovered.is_file() {
            return Self::load(&discovered);
        }
        Ok(Self::default())
    }

    pub fn base_config(&self) -> Result<BaseConfig> {
        self.kernel.base_config.parse()
    }

    /// Reject values that would only fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.kernel.repo.trim().is_empty() || self.kernel.branch.trim().is_empty() {
            bail!("kernel.repo and kernel.branch must be set");
        }
        if self.kernel.dir_name.is_empty() || self.kernel.dir_name.contains('/') {
            bail!(
                "kernel.dir_name must be a single path component, got '{}'",
                self.kernel.dir_name
            );
        }
        self.base_config()?;

        for name in self.kernel.options.keys().chain(self.kernel.disabled.iter()) {
            validate_option_name(name).with_context(|| "in [kernel] options".to_string())?;
        }
        for (name, value) in &self.kernel.options {
            single_line(value).with_context(|| format!("value of kernel option '{name}'"))?;
        }
        if let Some(name) = self
            .kernel
            .disabled
            .iter()
            .find(|name| self.kernel.options.contains_key(*name))
        {
            bail!("option '{}' is both set and disabled", name);
        }

        for (section, archive) in [
            ("driver.archive", &self.driver.archive),
            ("patches.archive", &self.patches.archive),
        ] {
            if archive.url.trim().is_empty() {
                bail!("{section}.url must be set");
            }
            if let Some(sha) = &archive.sha256 {
                if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
                    bail!("{section}.sha256 must be 64 hex characters");
                }
            }
        }

        for symbol in [&self.driver.config_symbol, &self.driver.sibling_config_symbol] {
            validate_option_name(symbol).context("in [driver] config symbols")?;
        }
        if self.driver.vendor_subpath.file_name().is_none() {
            bail!(
                "driver.vendor_subpath '{}' has no final component",
                self.driver.vendor_subpath.display()
            );
        }

        if self.build.jobs == Some(0) {
            bail!("build.jobs must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing effective configuration")
    }
}
