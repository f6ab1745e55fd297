//! Download and extraction of vendor archives.
//!
//! Upstream tag archives do not always extract to a directory named after
//! the file: a GitHub tag zip `rel_1_12_4.zip` unpacks to
//! `morse_driver-rel_1_12_4/`, and some releases kept an older directory
//! name. The extracted directory is therefore resolved from an explicit,
//! prioritized candidate list:
//!
//! 1. the known legacy directory name, when configured
//! 2. the archive file name with its extension stripped
//!
//! and anything else is a [`Error::Resolution`] listing what was tried.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pipeline::config::{ArchiveConfig, ToolsConfig};
use crate::process::Cmd;

/// Extensions stripped to derive the extraction directory name, longest
/// first so `.tar.gz` wins over `.gz`.
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.xz", ".tgz", ".zip", ".tar"];

/// File name of the resource at `url`: the last path segment, without any
/// query string or fragment.
pub fn archive_file_name(url: &str) -> Result<String> {
    let without_suffix = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let name = without_suffix.rsplit('/').next().unwrap_or_default();

    if name.is_empty() || !without_suffix.contains('/') || name.contains(':') {
        return Err(Error::Resolution {
            archive: url.to_string(),
            search_dir: PathBuf::new(),
            candidates: Vec::new(),
        });
    }
    Ok(name.to_string())
}

/// Directory name derived from the archive file name.
pub fn derived_dir_name(file_name: &str) -> &str {
    ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file_name)
}

/// Directory names to look for, in priority order, without duplicates.
pub fn candidate_dirs(file_name: &str, legacy_dir: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(legacy) = legacy_dir.filter(|l| !l.is_empty()) {
        candidates.push(legacy.to_string());
    }
    let derived = derived_dir_name(file_name).to_string();
    if !candidates.contains(&derived) {
        candidates.push(derived);
    }
    candidates
}

/// Pick the first candidate that exists as a directory under `search_dir`.
pub fn resolve_extracted_dir(
    search_dir: &Path,
    file_name: &str,
    legacy_dir: Option<&str>,
) -> Result<PathBuf> {
    let candidates = candidate_dirs(file_name, legacy_dir);
    for candidate in &candidates {
        let path = search_dir.join(candidate);
        if path.is_dir() {
            debug!("resolved {} -> {}", file_name, path.display());
            return Ok(path);
        }
    }

    Err(Error::Resolution {
        archive: file_name.to_string(),
        search_dir: search_dir.to_path_buf(),
        candidates,
    })
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(())
}

/// Download `archive.url` into `dest_dir`, extract it there, and return the
/// directory it produced.
pub fn fetch_and_extract(
    tools: &ToolsConfig,
    archive: &ArchiveConfig,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let file_name = archive_file_name(&archive.url)?;
    fs::create_dir_all(dest_dir).map_err(|e| Error::io(dest_dir, e))?;
    let archive_path = dest_dir.join(&file_name);

    info!("  Downloading {}...", archive.url);
    Cmd::new(&tools.curl)
        .args(["-fsSL", "-o"])
        .arg(&archive_path)
        .arg(&archive.url)
        .error_msg(format!("downloading {}", archive.url))
        .run()?;

    if let Some(expected) = &archive.sha256 {
        verify_checksum(&archive_path, expected)?;
        debug!("checksum ok for {}", file_name);
    }

    info!("  Extracting {}...", file_name);
    Cmd::new(&tools.unzip)
        .args(["-o", "-q"])
        .arg(&archive_path)
        .arg("-d")
        .arg(dest_dir)
        .error_msg(format!("extracting {}", archive_path.display()))
        .run()?;

    let extracted = resolve_extracted_dir(dest_dir, &file_name, archive.legacy_dir.as_deref())?;
    info!("  Extracted to {}", extracted.display());
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn file_name_from_url() {
        assert_eq!(
            archive_file_name(
                "https://github.com/MorseMicro/morse_driver/archive/refs/tags/rel_1_12_4.zip"
            )
            .unwrap(),
            "rel_1_12_4.zip"
        );
        assert_eq!(
            archive_file_name("https://example.org/dl/driver.zip?token=abc#frag").unwrap(),
            "driver.zip"
        );
        assert!(archive_file_name("https://").is_err());
        assert!(archive_file_name("driver.zip").is_err());
    }

    #[test]
    fn derived_name_strips_known_extensions() {
        assert_eq!(derived_dir_name("morse_driver-1.12.4.zip"), "morse_driver-1.12.4");
        assert_eq!(derived_dir_name("patches.tar.gz"), "patches");
        assert_eq!(derived_dir_name("README"), "README");
        assert_eq!(derived_dir_name(".zip"), ".zip");
    }

    #[test]
    fn candidates_prefer_legacy_and_dedupe() {
        assert_eq!(
            candidate_dirs("rel_1_12_4.zip", Some("morse_driver-rel_1_12_4")),
            ["morse_driver-rel_1_12_4", "rel_1_12_4"]
        );
        assert_eq!(candidate_dirs("pkg.zip", Some("pkg")), ["pkg"]);
        assert_eq!(candidate_dirs("pkg.zip", None), ["pkg"]);
    }

    #[test]
    fn legacy_dir_wins_when_both_exist() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("morse_driver-1.11.3")).unwrap();
        fs::create_dir(temp.path().join("morse_driver-1.12.4")).unwrap();

        let resolved = resolve_extracted_dir(
            temp.path(),
            "morse_driver-1.12.4.zip",
            Some("morse_driver-1.11.3"),
        )
        .unwrap();
        assert_eq!(resolved, temp.path().join("morse_driver-1.11.3"));
    }

    #[test]
    fn falls_back_to_derived_name() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("morse_driver-1.12.4")).unwrap();

        let resolved = resolve_extracted_dir(
            temp.path(),
            "morse_driver-1.12.4.zip",
            Some("morse_driver-1.11.3"),
        )
        .unwrap();
        assert_eq!(resolved, temp.path().join("morse_driver-1.12.4"));
    }

    #[test]
    fn no_candidate_is_a_resolution_error() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("something-else")).unwrap();
        // A plain file with a candidate name is not a directory.
        fs::write(temp.path().join("morse_driver-1.12.4"), "").unwrap();

        let err = resolve_extracted_dir(
            temp.path(),
            "morse_driver-1.12.4.zip",
            Some("morse_driver-1.11.3"),
        )
        .unwrap_err();
        match &err {
            Error::Resolution { candidates, .. } => {
                assert_eq!(candidates, &["morse_driver-1.11.3", "morse_driver-1.12.4"]);
            }
            other => panic!("expected Resolution, got {other:?}"),
        }
        assert!(err.to_string().contains("morse_driver-1.11.3, morse_driver-1.12.4"));
    }

    #[test]
    fn sha256_of_known_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a.zip");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(matches!(
            verify_checksum(&path, &"0".repeat(64)),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn fetch_and_extract_with_stand_in_tools() {
        let temp = tempfile::tempdir().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let dest = temp.path().join("downloads");

        let tools = ToolsConfig {
            // curl -fsSL -o <file> <url>
            curl: script(&bin, "curl", r#"printf 'zipdata' > "$3""#),
            // unzip -o -q <file> -d <dir>
            unzip: script(&bin, "unzip", r#"mkdir -p "$5/morse_driver-rel_1""#),
            ..ToolsConfig::default()
        };
        let archive = ArchiveConfig {
            url: "https://example.org/archive/refs/tags/rel_1.zip".to_string(),
            legacy_dir: Some("morse_driver-rel_1".to_string()),
            sha256: Some(
                "a0a4b1ef0e0d8ad8ff9d32e1a4a0a7b3a6bba0b4a10d2f6e1d7a2b2c3f3e8c1d".to_string(),
            ),
        };

        // Wrong checksum stops before extraction.
        let err = fetch_and_extract(&tools, &archive, &dest).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!dest.join("morse_driver-rel_1").exists());

        let archive = ArchiveConfig {
            sha256: None,
            ..archive
        };
        let extracted = fetch_and_extract(&tools, &archive, &dest).unwrap();
        assert_eq!(extracted, dest.join("morse_driver-rel_1"));
        assert_eq!(fs::read_to_string(dest.join("rel_1.zip")).unwrap(), "zipdata");
    }

    #[test]
    fn failed_download_is_a_command_error() {
        let temp = tempfile::tempdir().unwrap();
        let tools = ToolsConfig {
            curl: script(temp.path(), "curl", "echo 'curl: (22) 404' >&2; exit 22"),
            ..ToolsConfig::default()
        };
        let archive = ArchiveConfig {
            url: "https://example.org/missing.zip".to_string(),
            legacy_dir: None,
            sha256: None,
        };
        let err = fetch_and_extract(&tools, &archive, &temp.path().join("dl")).unwrap_err();
        match err {
            Error::Command(cmd) => assert_eq!(cmd.code(), Some(22)),
            other => panic!("expected Command, got {other:?}"),
        }
    }
}
