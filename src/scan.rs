use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::metadata::ImageFamily;

/// Recursively collects every supported image under `folder`, canonicalized
/// and sorted so the grid order is stable between runs.
pub fn scan_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let root = folder
        .canonicalize()
        .with_context(|| format!("cannot open folder {}", folder.display()))?;
    let mut paths = Vec::new();
    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || ImageFamily::from_path(entry.path()).is_none() {
            continue;
        }
        match entry.path().canonicalize() {
            Ok(path) => paths.push(path),
            Err(err) => debug!(path = %entry.path().display(), "cannot canonicalize: {err}"),
        }
    }
    paths.sort();
    paths.dedup();
    info!(folder = %root.display(), images = paths.len(), "scan finished");
    Ok(paths)
}
