//! Discovery of the generated image in the toolchain's output directory.

use crate::error::{EggsmithError, EggsmithResult};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A located image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl Artifact {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    dir: PathBuf,
    suffix: String,
}

impl ArtifactLocator {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pick the newest regular file ending in the configured suffix.
    ///
    /// Equal modification times fall back to the lexicographically smallest name,
    /// so the choice never depends on directory listing order.
    pub fn locate(&self) -> EggsmithResult<Artifact> {
        let not_found = || EggsmithError::NoArtifactFound {
            dir: self.dir.clone(),
            suffix: self.suffix.clone(),
        };

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("cannot list {}: {err}", self.dir.display());
                return Err(not_found());
            }
        };

        let mut candidates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let matches_suffix = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.ends_with(&self.suffix));
            if !matches_suffix {
                continue;
            }
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => candidates.push(Artifact {
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size: meta.len(),
                    path,
                }),
                Ok(_) => {}
                Err(err) => warn!("skipping unreadable candidate {}: {err}", path.display()),
            }
        }

        if candidates.len() > 1 {
            debug!(
                "{} candidate artifacts in {}; choosing the newest",
                candidates.len(),
                self.dir.display()
            );
        }

        candidates
            .into_iter()
            .min_by(|a, b| {
                b.modified
                    .cmp(&a.modified)
                    .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
            })
            .ok_or_else(not_found)
    }
}

/// Human-readable size with two decimals (B, KB, MB, GB).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, len: usize, mtime: SystemTime) {
        fs::write(path, vec![0u8; len]).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn empty_directory_has_no_artifact() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let err = ArtifactLocator::new(dir.path(), ".iso").locate().unwrap_err();
        assert!(matches!(err, EggsmithError::NoArtifactFound { .. }));
    }

    #[test]
    fn missing_directory_has_no_artifact() {
        let dir = tempdir().unwrap();
        let locator = ArtifactLocator::new(dir.path().join("nope"), ".iso");
        assert!(matches!(
            locator.locate(),
            Err(EggsmithError::NoArtifactFound { .. })
        ));
    }

    #[test]
    fn newest_artifact_wins() {
        let dir = tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        touch(&dir.path().join("old.iso"), 10, base);
        touch(&dir.path().join("new.iso"), 20, base + Duration::from_secs(60));

        let found = ArtifactLocator::new(dir.path(), ".iso").locate().unwrap();
        assert_eq!(found.file_name(), Some("new.iso"));
        assert_eq!(found.size, 20);
    }

    #[test]
    fn equal_mtime_breaks_tie_by_name() {
        let dir = tempdir().unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        touch(&dir.path().join("b.iso"), 1, stamp);
        touch(&dir.path().join("a.iso"), 1, stamp);

        let found = ArtifactLocator::new(dir.path(), ".iso").locate().unwrap();
        assert_eq!(found.file_name(), Some("a.iso"));
    }

    #[test]
    fn directories_with_suffix_are_ignored() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("trap.iso")).unwrap();
        assert!(ArtifactLocator::new(dir.path(), ".iso").locate().is_err());
    }

    #[test]
    fn sizes_render_with_units() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
        assert_eq!(format_size(5 * 1024_u64.pow(4)), "5120.00 GB");
    }
}
