//! Archive extraction contract
//!
//! Extraction itself lives outside the engine (unrar, 7z, whatever the
//! shell wires in); the engine only locates the first archive of a
//! completed job and hands it to an [`ArchiveExtractor`] when auto-extract
//! is on.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Contract for extracting one archive into a destination directory
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `dest`
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Archive kinds the engine recognizes, in extraction priority order
const ARCHIVE_PRIORITY: &[fn(&str) -> bool] = &[
    is_first_rar_volume,
    |name| name.ends_with(".rar"),
    |name| name.ends_with(".001"),
    |name| name.ends_with(".zip"),
    |name| name.ends_with(".7z"),
];

/// `name.part01.rar` / `name.part001.rar`: the first volume of a split set
fn is_first_rar_volume(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".rar") else {
        return false;
    };
    let Some(idx) = stem.rfind(".part") else {
        return false;
    };
    let digits = &stem[idx + 5..];
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && digits.trim_start_matches('0') == "1"
}

/// Locate the archive to extract in a completed job directory
///
/// Split RAR sets extract from their first volume; plain `.rar`, `.001`,
/// `.zip`, and `.7z` follow in that order. Ties within a priority class
/// resolve lexicographically.
pub fn find_first_archive(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    names.sort();

    for matches in ARCHIVE_PRIORITY {
        for path in &names {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if matches(&name.to_ascii_lowercase()) {
                return Ok(Some(path.clone()));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_first_rar_volume_detection() {
        assert!(is_first_rar_volume("archive.part01.rar"));
        assert!(is_first_rar_volume("archive.part001.rar"));
        assert!(is_first_rar_volume("archive.part1.rar"));
        assert!(!is_first_rar_volume("archive.part02.rar"));
        assert!(!is_first_rar_volume("archive.part10.rar"));
        assert!(!is_first_rar_volume("archive.rar"));
        assert!(!is_first_rar_volume("archive.part.rar"));
    }

    #[test]
    fn test_find_prefers_first_volume_over_zip() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "notes.zip");
        touch(dir.path(), "archive.part01.rar");
        touch(dir.path(), "archive.part02.rar");

        let found = find_first_archive(dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "archive.part01.rar");
    }

    #[test]
    fn test_find_split_001() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "video.001");
        touch(dir.path(), "video.002");

        let found = find_first_archive(dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "video.001");
    }

    #[test]
    fn test_find_none_without_archives() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "readme.txt");
        assert!(find_first_archive(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_find_seven_zip_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "bundle.7z");
        let found = find_first_archive(dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "bundle.7z");
    }
}
