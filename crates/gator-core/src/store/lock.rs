//! Directory-creation CAS: the arbiter of concurrency on a single record.
//!
//! `std::fs::create_dir` is atomic on any POSIX-like filesystem and fails
//! with `AlreadyExists` exactly when another holder is present -- which is
//! exactly the signal `TaskStore::update_cas` needs, with no OS-specific
//! file-locking API required.

use std::path::{Path, PathBuf};

use crate::error::TaskStoreError;

/// An acquired advisory lock on one record id.
///
/// Dropping the guard removes the lock directory, including on an early
/// `return` or a panic unwind through the guarded critical section -- the
/// lock must never outlive the operation that took it.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Create `locks_dir/{id}/`. Returns `LockHeld` if it already exists.
    pub fn acquire(locks_dir: &Path, id: &str) -> Result<Self, TaskStoreError> {
        std::fs::create_dir_all(locks_dir)?;
        let path = locks_dir.join(id);
        match std::fs::create_dir(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(TaskStoreError::LockHeld(id.to_string()))
            }
            Err(e) => Err(TaskStoreError::Io(e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to release lock directory"
            );
        }
    }
}
