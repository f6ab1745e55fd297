//! Integration of an out-of-tree driver into the kernel source tree.
//!
//! The driver sources are copied to `<kernel>/<vendor_subpath>` and the
//! vendor directory is registered with kbuild by two lines in the parent
//! directory: a `source` directive in `Kconfig` and an `obj-$(...)` rule in
//! `Makefile`. Both are placed right after a sibling vendor's line so the
//! menu stays alphabetical, and both insertions are idempotent.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::kconfig::{insert_after_pattern, Insertion, LinePattern};
use crate::pipeline::config::DriverConfig;

/// One line to add to a kbuild file, anchored after a sibling's line.
#[derive(Debug, Clone)]
pub struct RegistrationLine {
    /// File relative to the kernel root.
    pub file: PathBuf,
    pub anchor: LinePattern,
    pub line: String,
}

/// How a vendor driver directory hooks into kbuild.
#[derive(Debug, Clone)]
pub struct DriverRegistration {
    pub vendor_subpath: PathBuf,
    pub kconfig: RegistrationLine,
    pub makefile: RegistrationLine,
}

impl DriverRegistration {
    /// Registration for `<parent>/<dir>` gated by `CONFIG_<symbol>`, anchored
    /// after `<parent>/<sibling_dir>` gated by `CONFIG_<sibling_symbol>`.
    ///
    /// For `drivers/net/wireless/morse` this yields
    /// `source "drivers/net/wireless/morse/Kconfig"` after the `ti` source
    /// line, and `obj-$(CONFIG_WLAN_VENDOR_MORSE) += morse/` after the `ti`
    /// rule.
    pub fn for_vendor(
        vendor_subpath: &Path,
        symbol: &str,
        sibling_dir: &str,
        sibling_symbol: &str,
    ) -> Self {
        let parent = vendor_subpath.parent().unwrap_or(Path::new(""));
        let dir_name = vendor_subpath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_str = parent.to_string_lossy();
        let sibling_path = if parent_str.is_empty() {
            sibling_dir.to_string()
        } else {
            format!("{parent_str}/{sibling_dir}")
        };

        Self {
            vendor_subpath: vendor_subpath.to_path_buf(),
            kconfig: RegistrationLine {
                file: parent.join("Kconfig"),
                anchor: LinePattern::literal(&format!("source \"{sibling_path}/Kconfig\"")),
                line: format!("source \"{}/Kconfig\"", vendor_subpath.to_string_lossy()),
            },
            makefile: RegistrationLine {
                file: parent.join("Makefile"),
                anchor: LinePattern::literal(&format!(
                    "obj-$(CONFIG_{sibling_symbol}) += {sibling_dir}/"
                )),
                line: format!("obj-$(CONFIG_{symbol}) += {dir_name}/"),
            },
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::for_vendor(
            &config.vendor_subpath,
            &config.config_symbol,
            &config.sibling_dir,
            &config.sibling_config_symbol,
        )
    }
}

/// What [`integrate_driver`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationReport {
    pub target_dir: PathBuf,
    pub files_copied: usize,
    pub kconfig: Insertion,
    pub makefile: Insertion,
}

/// Copy `source_dir` into the kernel tree and register it with kbuild.
///
/// Existing files under the target are overwritten, so re-running after a
/// newer driver download refreshes the tree.
pub fn integrate_driver(
    source_dir: &Path,
    kernel_root: &Path,
    registration: &DriverRegistration,
) -> Result<IntegrationReport> {
    if !source_dir.is_dir() {
        return Err(Error::io(
            source_dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "driver source directory not found"),
        ));
    }

    let target_dir = kernel_root.join(&registration.vendor_subpath);
    info!(
        "  Copying driver {} -> {}",
        source_dir.display(),
        target_dir.display()
    );
    let files_copied = copy_tree(source_dir, &target_dir)?;
    info!("  Copied {} files", files_copied);

    let kconfig = register(kernel_root, &registration.kconfig)?;
    let makefile = register(kernel_root, &registration.makefile)?;

    Ok(IntegrationReport {
        target_dir,
        files_copied,
        kconfig,
        makefile,
    })
}

fn register(kernel_root: &Path, reg: &RegistrationLine) -> Result<Insertion> {
    let path = kernel_root.join(&reg.file);
    let outcome = insert_after_pattern(&path, &reg.anchor, &reg.line)?;
    match outcome {
        Insertion::AppendedAtEnd => warn!(
            "  {}: anchor `{}` not found, appended `{}` at end",
            reg.file.display(),
            reg.anchor,
            reg.line
        ),
        other => info!("  {}: `{}` {}", reg.file.display(), reg.line, other),
    }
    Ok(outcome)
}

/// Recursively copy `src` into `dst`, overwriting files. Returns the number
/// of files and symlinks copied.
fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::io(path, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::io(entry.path(), std::io::Error::other(e)))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target).map_err(|e| Error::io(&target, e))?;
            }
            std::os::unix::fs::symlink(&link, &target).map_err(|e| Error::io(&target, e))?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
