//! Persistence of generated images.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use scenecraft_core::JobId;

use crate::capability::SynthesisOutput;

const FILE_PREFIX: &str = "scene_";
const FILE_EXTENSION: &str = "png";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Where a persisted image lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

pub trait ArtifactStore: Send + Sync + 'static {
    fn persist(&self, job_id: &JobId, output: &SynthesisOutput) -> Result<ArtifactRef, ArtifactError>;

    /// Path of an existing artifact. Names that could escape the store are
    /// rejected.
    fn resolve(&self, filename: &str) -> Result<PathBuf, ArtifactError>;

    /// Newest first.
    fn list_recent(&self, limit: usize) -> Result<Vec<ArtifactInfo>, ArtifactError>;
}

/// Flat directory of `scene_<unix>_<hex>.png` files.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    root: PathBuf,
}

impl DirectoryArtifactStore {
    /// Open (creating if needed) the directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete images beyond the newest `max_files` and any older than
    /// `max_age`. Returns how many were removed.
    pub fn cleanup(&self, max_files: usize, max_age: Duration) -> Result<usize, ArtifactError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for (index, (path, modified)) in self.entries()?.into_iter().enumerate() {
            let too_old = now
                .duration_since(modified)
                .is_ok_and(|age| age > max_age);
            if index < max_files && !too_old {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old image"),
            }
        }

        if removed > 0 {
            debug!(removed, "cleaned up generated images");
        }
        Ok(removed)
    }

    /// Images this store wrote, newest first. Other files are left alone.
    fn entries(&self) -> Result<Vec<(PathBuf, SystemTime)>, ArtifactError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !is_own_file(&path) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push((path, meta.modified()?));
        }
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(entries)
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn persist(&self, job_id: &JobId, output: &SynthesisOutput) -> Result<ArtifactRef, ArtifactError> {
        let filename = new_filename(Utc::now());
        let path = self.root.join(&filename);
        fs::write(&path, &output.image)?;
        debug!(job_id = %job_id, file = %filename, bytes = output.image.len(), "saved image");
        Ok(ArtifactRef { filename, path })
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf, ArtifactError> {
        let name = sanitize_filename(filename)?;
        let path = self.root.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ArtifactError::NotFound(name.to_string()))
        }
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<ArtifactInfo>, ArtifactError> {
        let mut out = Vec::new();
        for (path, modified) in self.entries()?.into_iter().take(limit) {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            out.push(ArtifactInfo {
                filename: filename.to_string(),
                size_bytes,
                modified_at: DateTime::<Utc>::from(modified),
            });
        }
        Ok(out)
    }
}

fn is_own_file(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(FILE_PREFIX));
    named && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
}

/// `scene_<unix seconds>_<12 hex>.png`
pub fn new_filename(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{FILE_PREFIX}{}_{}.{FILE_EXTENSION}",
        now.timestamp(),
        &suffix[..12]
    )
}

/// Accept only plain file names made of `[A-Za-z0-9._-]` that do not start
/// with a dot.
pub fn sanitize_filename(name: &str) -> Result<&str, ArtifactError> {
    let ok = !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(name)
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> SynthesisOutput {
        SynthesisOutput {
            image: vec![0x89, b'P', b'N', b'G'],
            width: 512,
            height: 512,
        }
    }

    #[test]
    fn filenames_follow_the_pattern() {
        let name = new_filename(Utc::now());
        assert!(name.starts_with("scene_"));
        assert!(name.ends_with(".png"));
        let stem = name.trim_end_matches(".png");
        let hex = stem.rsplit('_').next().unwrap();
        assert_eq!(hex.len(), 12);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sanitize_rejects_traversal() {
        for bad in ["", "../etc/passwd", "a/b.png", ".hidden.png", "a\\b.png", "x y.png"] {
            assert!(sanitize_filename(bad).is_err(), "accepted {bad:?}");
        }
        assert!(sanitize_filename("scene_1_abcdef012345.png").is_ok());
    }

    #[test]
    fn persist_then_resolve_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryArtifactStore::open(dir.path().join("out")).unwrap();

        let artifact = store.persist(&JobId::generate(), &output()).unwrap();
        assert!(artifact.path.starts_with(store.root()));
        assert_eq!(fs::read(&artifact.path).unwrap(), output().image);

        assert_eq!(store.resolve(&artifact.filename).unwrap(), artifact.path);
        assert!(matches!(
            store.resolve("scene_0_000000000000.png"),
            Err(ArtifactError::NotFound(_))
        ));
        assert!(matches!(
            store.resolve("../secret.png"),
            Err(ArtifactError::InvalidName(_))
        ));

        let listed = store.list_recent(50).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, artifact.filename);
        assert_eq!(listed[0].size_bytes, 4);
    }

    #[test]
    fn cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryArtifactStore::open(dir.path()).unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("scene_{i}_000000000000.png")), b"x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let removed = store.cleanup(2, Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list_recent(10).unwrap().len(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn foreign_images_are_never_listed_or_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryArtifactStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("logo.png"), b"x").unwrap();
        let ours = store.persist(&JobId::generate(), &output()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let listed = store.list_recent(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, ours.filename);

        assert_eq!(store.cleanup(0, Duration::from_millis(1)).unwrap(), 1);
        assert!(dir.path().join("logo.png").exists());
        assert!(!ours.path.exists());
    }

    #[test]
    fn cleanup_removes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryArtifactStore::open(dir.path()).unwrap();
        store.persist(&JobId::generate(), &output()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = store.cleanup(100, Duration::from_millis(1)).unwrap();
        assert_eq!(removed, 1);
    }
}
