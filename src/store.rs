//! JSON persistence of the collection.
//!
//! The state file holds a [`CollectionSnapshot`]. Writes go to a temporary
//! sibling file that is synced and then renamed over the target, so a crash
//! mid-write leaves the previous state intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::collection::CollectionSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access state file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file '{path}' is not valid: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads the snapshot at `path`.
///
/// - Missing file → empty snapshot
/// - Empty file → empty snapshot
/// - Malformed JSON → `Err(StoreError::Json)`
pub fn load(path: &Path) -> Result<CollectionSnapshot, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No state file, starting empty");
            return Ok(CollectionSnapshot::default());
        }
        Err(e) => return Err(io_error(path)(e)),
    };

    if content.trim().is_empty() {
        return Ok(CollectionSnapshot::default());
    }

    let snapshot: CollectionSnapshot =
        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(
        path = %path.display(),
        feeds = snapshot.feeds.len(),
        "Loaded state"
    );
    Ok(snapshot)
}

/// Writes `snapshot` to `path` atomically, creating parent directories.
pub fn save(path: &Path, snapshot: &CollectionSnapshot) -> Result<(), StoreError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    // Randomized temp name so concurrent writers never share a file
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = write_synced(&temp_path, &content)
        .and_then(|()| std::fs::rename(&temp_path, path).map_err(io_error(path)));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Saved state");
    Ok(())
}

fn write_synced(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_error(path))?;
    file.write_all(content).map_err(io_error(path))?;
    file.sync_all().map_err(io_error(path))
}
