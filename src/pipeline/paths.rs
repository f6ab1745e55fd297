use std::path::{Path, PathBuf};

/// Every location a run reads or writes, derived once from the work dir.
///
/// Steps receive these paths explicitly; nothing changes the process
/// working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub work_dir: PathBuf,
    pub kernel_dir: PathBuf,
    pub downloads_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(work_dir: &Path, kernel_dir_name: &str) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            kernel_dir: work_dir.join(kernel_dir_name),
            downloads_dir: work_dir.join("downloads"),
        }
    }

    pub fn kernel_config(&self) -> PathBuf {
        self.kernel_dir.join(".config")
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
