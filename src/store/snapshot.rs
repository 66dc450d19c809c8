use anyhow::{Context, Result};
use std::{fs, io::ErrorKind, path::PathBuf};

use crate::models::RecordingSession;

use super::write_atomic;

/// The at-most-one pending snapshot of the session being recorded.
///
/// Written after every action, cleared on a clean stop, read once at startup.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn save(&self, session: &RecordingSession) -> Result<()> {
        let json =
            serde_json::to_vec_pretty(session).context("failed to serialize session snapshot")?;
        write_atomic(&self.path, &json)
    }

    /// A missing file is `None`; so is a corrupt one, after a warning.
    pub fn load(&self) -> Option<RecordingSession> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    log::warn!(
                        "failed to read session snapshot {}: {err}",
                        self.path.display()
                    );
                }
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(session) => Some(session),
            Err(err) => {
                log::warn!(
                    "ignoring corrupt session snapshot {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Clear the snapshot unless it belongs to a different session.
    pub fn clear_for(&self, session_id: &str) -> Result<()> {
        match self.load() {
            Some(pending) if pending.id != session_id => {
                log::debug!(
                    "keeping snapshot of session {} while finishing {session_id}",
                    pending.id
                );
                Ok(())
            }
            _ => self.clear(),
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::sample_session;
    use crate::models::{ActionKind, SessionStatus};
    use tempfile::TempDir;

    #[test]
    fn save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("pending_session.json"));
        assert!(store.load().is_none());

        let mut session = sample_session(&dir.path().join("s"));
        session.append_action(ActionKind::tap_at(5, 6));
        store.save(&session).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.status, SessionStatus::Recording);
        assert_eq!(loaded.actions, session.actions);

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn clear_for_leaves_another_sessions_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("pending_session.json"));
        let mut newer = sample_session(&dir.path().join("s2"));
        newer.id = "session-newer".into();
        newer.append_action(ActionKind::Back);
        store.save(&newer).unwrap();

        store.clear_for("session-older").unwrap();
        assert_eq!(store.load().unwrap().id, "session-newer");

        store.clear_for("session-newer").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_snapshot_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pending_session.json");
        fs::write(&path, "{\"id\": \"half-writ").unwrap();

        assert!(SnapshotStore::new(path).load().is_none());
    }
}
