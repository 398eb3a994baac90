//! Key-addressed JSON file stores for tasks, runs, and checks.
//!
//! Every write goes to a sibling `.tmp` file, is flushed, then atomically
//! renamed over the destination, so a reader never observes a torn file --
//! only the pre- or post-image.

pub mod check_store;
pub mod lock;
pub mod run_store;
pub mod task_store;

pub use check_store::CheckStore;
pub use lock::LockGuard;
pub use run_store::RunStore;
pub use task_store::TaskStore;

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::TaskStoreError;

/// Serialize `value` to pretty JSON and atomically publish it at `path`.
pub(crate) fn atomic_write_json<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), TaskStoreError> {
    let parent = path
        .parent()
        .expect("record path must have a parent directory");
    std::fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("record")
    ));

    let body = serde_json::to_vec_pretty(value).map_err(|e| TaskStoreError::SchemaInvalid {
        id: path.display().to_string(),
        reason: e.to_string(),
    })?;

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    // Best-effort durability for the rename itself: fsync the parent
    // directory entry on platforms that support it.
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Read and parse a JSON record at `path`. Maps a missing file to
/// `NotFound` and a parse failure to `SchemaInvalid`.
pub(crate) fn read_json<T: DeserializeOwned>(
    path: &Path,
    id: &str,
) -> Result<T, TaskStoreError> {
    let body = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TaskStoreError::NotFound(id.to_string()));
        }
        Err(e) => return Err(TaskStoreError::Io(e)),
    };

    serde_json::from_slice(&body).map_err(|e| TaskStoreError::SchemaInvalid {
        id: id.to_string(),
        reason: e.to_string(),
    })
}
