//! Session pointer files: `sessions/latest.json` and `sessions/previous.json`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionLogError;
use crate::store::atomic_write_json;

/// `{sessionId, startedAt, status}`, as persisted in `latest.json` /
/// `previous.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPointer {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub status: String,
}

/// Maintains `latest.json`/`previous.json` under a sessions root.
#[derive(Debug, Clone)]
pub struct SessionPointerManager {
    root: PathBuf,
}

impl SessionPointerManager {
    pub fn new(sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            root: sessions_root.into(),
        }
    }

    fn latest_path(&self) -> PathBuf {
        self.root.join("latest.json")
    }

    fn previous_path(&self) -> PathBuf {
        self.root.join("previous.json")
    }

    pub fn read_latest(&self) -> Result<SessionPointer, SessionLogError> {
        Self::read(&self.latest_path())
    }

    pub fn read_previous(&self) -> Result<SessionPointer, SessionLogError> {
        Self::read(&self.previous_path())
    }

    fn read(path: &PathBuf) -> Result<SessionPointer, SessionLogError> {
        let body = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionLogError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(SessionLogError::Io(e)),
        };
        serde_json::from_slice(&body)
            .map_err(|e| SessionLogError::SessionResumeError {
                session_id: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Demote the current `latest` to `previous` (if any) and publish `info`
    /// as the new `latest`.
    pub fn update_latest(&self, info: SessionPointer) -> Result<(), SessionLogError> {
        std::fs::create_dir_all(&self.root).map_err(SessionLogError::Io)?;

        if let Ok(current_latest) = self.read_latest() {
            atomic_write_json(&self.previous_path(), &current_latest)
                .map_err(|e| SessionLogError::Io(std::io::Error::other(e.to_string())))?;
        }

        atomic_write_json(&self.latest_path(), &info)
            .map_err(|e| SessionLogError::Io(std::io::Error::other(e.to_string())))
    }

    /// Update the `status` field of whichever pointer (`latest` or
    /// `previous`) currently refers to `session_id`, in place.
    pub fn update_status(&self, session_id: &str, status: &str) -> Result<(), SessionLogError> {
        let mut updated_any = false;

        if let Ok(mut latest) = self.read_latest() {
            if latest.session_id == session_id {
                latest.status = status.to_string();
                atomic_write_json(&self.latest_path(), &latest)
                    .map_err(|e| SessionLogError::Io(std::io::Error::other(e.to_string())))?;
                updated_any = true;
            }
        }

        if let Ok(mut previous) = self.read_previous() {
            if previous.session_id == session_id {
                previous.status = status.to_string();
                atomic_write_json(&self.previous_path(), &previous)
                    .map_err(|e| SessionLogError::Io(std::io::Error::other(e.to_string())))?;
                updated_any = true;
            }
        }

        if updated_any {
            Ok(())
        } else {
            Err(SessionLogError::NotFound(session_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ptr(id: &str) -> SessionPointer {
        SessionPointer {
            session_id: id.to_string(),
            started_at: Utc::now(),
            status: "executing".to_string(),
        }
    }

    #[test]
    fn missing_pointers_are_not_found() {
        let dir = TempDir::new().unwrap();
        let mgr = SessionPointerManager::new(dir.path());
        assert!(matches!(
            mgr.read_latest().unwrap_err(),
            SessionLogError::NotFound(_)
        ));
    }

    #[test]
    fn update_latest_demotes_previous() {
        let dir = TempDir::new().unwrap();
        let mgr = SessionPointerManager::new(dir.path());
        mgr.update_latest(ptr("s1")).unwrap();
        mgr.update_latest(ptr("s2")).unwrap();

        assert_eq!(mgr.read_latest().unwrap().session_id, "s2");
        assert_eq!(mgr.read_previous().unwrap().session_id, "s1");
    }

    #[test]
    fn update_status_modifies_in_place() {
        let dir = TempDir::new().unwrap();
        let mgr = SessionPointerManager::new(dir.path());
        mgr.update_latest(ptr("s1")).unwrap();
        mgr.update_status("s1", "completed").unwrap();
        assert_eq!(mgr.read_latest().unwrap().status, "completed");
    }
}
