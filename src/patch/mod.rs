//! Patch set application through the external `patch` tool.
//!
//! Two kinds of set are applied to the kernel tree:
//!
//! - **bulk** - every `*.patch` / `*.diff` in a directory, in file name order
//! - **enumerated** - an explicit list of files, in the listed order
//!
//! Each set carries its own [`FuzzPolicy`]. Application is strict: the first
//! patch that does not apply aborts the run, and the tree is left exactly as
//! `patch` left it for manual inspection. Re-applying an already applied set
//! fails the same way (`--forward` refuses reversed hunks).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};
use crate::pipeline::config::{PatchesConfig, ToolsConfig};
use crate::process::{Cmd, CommandError};

const PATCH_EXTENSIONS: &[&str] = &["patch", "diff"];

/// How much context mismatch `patch` may tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzPolicy {
    /// Context lines must match exactly (`-F 0`).
    Exact,
    /// Up to this many context lines may be ignored (`-F n`).
    Fuzz(u32),
}

impl FuzzPolicy {
    pub fn from_fuzz(fuzz: u32) -> Self {
        if fuzz == 0 {
            FuzzPolicy::Exact
        } else {
            FuzzPolicy::Fuzz(fuzz)
        }
    }

    fn factor(self) -> u32 {
        match self {
            FuzzPolicy::Exact => 0,
            FuzzPolicy::Fuzz(n) => n,
        }
    }
}

impl fmt::Display for FuzzPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzPolicy::Exact => write!(f, "exact"),
            FuzzPolicy::Fuzz(n) => write!(f, "fuzz {n}"),
        }
    }
}

/// An ordered list of patch files sharing one application policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub fuzz: FuzzPolicy,
    pub strip: u32,
}

impl PatchSet {
    /// Every patch file directly under `dir`, sorted by file name.
    pub fn bulk(name: &str, dir: &Path, fuzz: FuzzPolicy, strip: u32) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            let path = entry.path();
            let is_patch = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| PATCH_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if is_patch && path.is_file() {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(Error::PatchApplication {
                patch: dir.to_path_buf(),
                reason: format!("bulk patch set '{name}' has no .patch or .diff files"),
            });
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self {
            name: name.to_string(),
            files,
            fuzz,
            strip,
        })
    }

    /// `names` under `dir`, in the given order. Every file must exist.
    pub fn enumerated<S: AsRef<str>>(
        name: &str,
        dir: &Path,
        names: &[S],
        fuzz: FuzzPolicy,
        strip: u32,
    ) -> Result<Self> {
        let mut files = Vec::with_capacity(names.len());
        for file in names {
            let path = dir.join(file.as_ref());
            if !path.is_file() {
                return Err(Error::PatchApplication {
                    patch: path,
                    reason: format!("listed in patch set '{name}' but not found"),
                });
            }
            files.push(path);
        }

        Ok(Self {
            name: name.to_string(),
            files,
            fuzz,
            strip,
        })
    }
}

/// The bulk and header sets described by `config`, rooted at the extracted
/// patch archive.
pub fn configured_patch_sets(config: &PatchesConfig, archive_dir: &Path) -> Result<Vec<PatchSet>> {
    let mut sets = vec![PatchSet::bulk(
        "bulk",
        &archive_dir.join(&config.bulk_dir),
        FuzzPolicy::from_fuzz(config.bulk_fuzz),
        config.strip,
    )?];

    if !config.headers.is_empty() {
        sets.push(PatchSet::enumerated(
            "headers",
            &archive_dir.join(&config.headers_dir),
            &config.headers,
            FuzzPolicy::from_fuzz(config.headers_fuzz),
            config.strip,
        )?);
    }
    Ok(sets)
}

/// Apply every patch of `set` to `target_tree`, stopping at the first
/// failure. Returns the number of patches applied.
pub fn apply_patch_set(tools: &ToolsConfig, set: &PatchSet, target_tree: &Path) -> Result<usize> {
    info!(
        "  Applying patch set '{}' ({} patches, {})",
        set.name,
        set.files.len(),
        set.fuzz
    );

    for (idx, file) in set.files.iter().enumerate() {
        let shown = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        info!("    [{}/{}] {}", idx + 1, set.files.len(), shown);

        Cmd::new(&tools.patch)
            .arg(format!("-p{}", set.strip))
            .args(["--forward", "--batch"])
            .arg(format!("-F{}", set.fuzz.factor()))
            .arg("-d")
            .arg(target_tree)
            .arg("-i")
            .arg(file)
            .error_msg(format!("applying {shown}"))
            .run()
            .map_err(|e| patch_error(file, e))?;
    }
    Ok(set.files.len())
}

/// Apply `sets` in order. Nothing after the first failing patch runs.
pub fn apply_patch_sets(tools: &ToolsConfig, sets: &[PatchSet], target_tree: &Path) -> Result<usize> {
    let mut applied = 0;
    for set in sets {
        applied += apply_patch_set(tools, set, target_tree)?;
    }
    Ok(applied)
}

fn patch_error(file: &Path, err: CommandError) -> Error {
    let reason = match &err {
        CommandError::Failed { code, stderr, .. } => {
            let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            if stderr.is_empty() {
                format!("patch exited with {code}")
            } else {
                format!("patch exited with {code}: {stderr}")
            }
        }
        CommandError::Spawn { .. } => err.to_string(),
    };
    Error::PatchApplication {
        patch: file.to_path_buf(),
        reason,
    }
}
