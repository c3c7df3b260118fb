use filetime::FileTime;
use sha1::{Digest, Sha1};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps source images to their on-disk thumbnail artifacts and decides
/// whether an artifact is still fresh.
#[derive(Debug, Clone)]
pub struct CacheKeyStore {
    cache_dir: PathBuf,
}

impl CacheKeyStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Hex SHA1 of the path string (40 chars).
    pub fn key_for(path: &Path) -> String {
        let mut hasher = Sha1::new();
        hasher.update(path.to_string_lossy().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Artifact location: cache_dir/<first 3 hex chars>/<remaining hex chars>.png
    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        let hex = Self::key_for(source);
        let (first, rest) = hex.split_at(3);
        self.cache_dir.join(first).join(format!("{rest}.png"))
    }

    /// An artifact is valid when it exists and its mtime, truncated to whole
    /// seconds, is not older than the source's.
    pub fn is_valid(&self, source: &Path, artifact: &Path) -> bool {
        match (mtime_secs(source), mtime_secs(artifact)) {
            (Some(source_mtime), Some(artifact_mtime)) => artifact_mtime >= source_mtime,
            _ => false,
        }
    }

    /// Copies the source mtime onto a freshly written artifact.
    pub fn stamp(&self, source: &Path, artifact: &Path) -> io::Result<()> {
        let mtime = FileTime::from_last_modification_time(&fs::metadata(source)?);
        filetime::set_file_mtime(artifact, mtime)
    }

    /// Removes every cached artifact.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.cache_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

fn mtime_secs(path: &Path) -> Option<i64> {
    let meta = fs::metadata(path).ok()?;
    Some(FileTime::from_last_modification_time(&meta).unix_seconds())
}
