use super::backend::SessionHandle;
use crate::domains::settings::KeeperSettings;
use crate::errors::SessionError;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CHECKPOINT_VERSION: u32 = 3;
const MIN_SUPPORTED_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    /// The id as it was computed when saved. Restore recomputes and compares.
    pub session_id: String,
    pub pane_id: Uuid,
    pub project_id: Uuid,
    pub worktree_id: Uuid,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub display_name: String,
    pub working_directory: PathBuf,
    pub last_known_alive: DateTime<Utc>,
}

impl CheckpointEntry {
    pub fn from_handle(handle: &SessionHandle, last_known_alive: DateTime<Utc>) -> Self {
        Self {
            session_id: handle.id.to_string(),
            pane_id: handle.pane_id,
            project_id: handle.project_id,
            worktree_id: handle.worktree_id,
            repo_path: handle.repo_path.clone(),
            worktree_path: handle.worktree_path.clone(),
            display_name: handle.display_name.clone(),
            working_directory: handle.working_directory.clone(),
            last_known_alive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub sessions: Vec<CheckpointEntry>,
}

impl Checkpoint {
    pub fn from_handles<'a>(
        handles: impl IntoIterator<Item = &'a SessionHandle>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp: now,
            sessions: handles
                .into_iter()
                .map(|handle| CheckpointEntry::from_handle(handle, now))
                .collect(),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > max_age
    }

    pub fn encode(&self) -> Result<String, SessionError> {
        serde_json::to_string_pretty(self).map_err(|e| SessionError::CheckpointDecode {
            message: format!("failed to encode checkpoint: {e}"),
        })
    }

    /// Decode any supported schema version into the current one.
    pub fn decode(raw: &str) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_str(raw).map_err(decode_error)?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| SessionError::CheckpointDecode {
                message: "missing integer 'version' field".to_string(),
            })?;

        match u32::try_from(version) {
            Ok(CHECKPOINT_VERSION) => serde_json::from_value(value).map_err(decode_error),
            Ok(2) => {
                let legacy: CheckpointV2 = serde_json::from_value(value).map_err(decode_error)?;
                debug!(
                    "Migrating checkpoint from version 2 ({} session(s))",
                    legacy.sessions.len()
                );
                Ok(legacy.migrate())
            }
            _ => Err(SessionError::CheckpointDecode {
                message: format!(
                    "unsupported checkpoint version {version} (supported {MIN_SUPPORTED_VERSION}..={CHECKPOINT_VERSION})"
                ),
            }),
        }
    }
}

fn decode_error(err: serde_json::Error) -> SessionError {
    SessionError::CheckpointDecode {
        message: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct CheckpointV2 {
    timestamp: DateTime<Utc>,
    sessions: Vec<CheckpointEntryV2>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointEntryV2 {
    session_id: String,
    pane_id: Uuid,
    project_id: Uuid,
    worktree_id: Uuid,
    repo_path: PathBuf,
    worktree_path: PathBuf,
}

impl CheckpointV2 {
    fn migrate(self) -> Checkpoint {
        let timestamp = self.timestamp;
        Checkpoint {
            version: CHECKPOINT_VERSION,
            timestamp,
            sessions: self
                .sessions
                .into_iter()
                .map(|entry| CheckpointEntry {
                    session_id: entry.session_id,
                    pane_id: entry.pane_id,
                    project_id: entry.project_id,
                    worktree_id: entry.worktree_id,
                    repo_path: entry.repo_path,
                    working_directory: entry.worktree_path.clone(),
                    worktree_path: entry.worktree_path,
                    display_name: String::new(),
                    last_known_alive: timestamp,
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Missing,
    Loaded(Checkpoint),
    Stale(Checkpoint),
    Invalid(SessionError),
}

/// On-disk location of the session checkpoint plus its staleness policy.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    max_age: chrono::Duration,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, max_age: chrono::Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn from_settings(settings: &KeeperSettings) -> Self {
        Self::new(settings.checkpoint_file(), settings.checkpoint_max_age())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_age(&self) -> chrono::Duration {
        self.max_age
    }

    pub fn load(&self) -> LoadOutcome {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> LoadOutcome {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(err) => {
                return LoadOutcome::Invalid(SessionError::io(
                    "read checkpoint",
                    self.path.display(),
                    err,
                ));
            }
        };

        match Checkpoint::decode(&raw) {
            Ok(checkpoint) if checkpoint.is_stale(now, self.max_age) => {
                info!(
                    "Checkpoint at {} is stale (saved {})",
                    self.path.display(),
                    checkpoint.timestamp
                );
                LoadOutcome::Stale(checkpoint)
            }
            Ok(checkpoint) => LoadOutcome::Loaded(checkpoint),
            Err(err) => {
                warn!("Ignoring checkpoint at {}: {err}", self.path.display());
                LoadOutcome::Invalid(err)
            }
        }
    }

    /// Replace the checkpoint file atomically: write a sibling temp file, then rename.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), SessionError> {
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .map_err(|e| SessionError::io("create checkpoint dir", dir.display(), e))?;

        let encoded = checkpoint.encode()?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SessionError::io("create temp checkpoint", dir.display(), e))?;
        temp.write_all(encoded.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| SessionError::io("write temp checkpoint", temp.path().display(), e))?;
        temp.persist(&self.path)
            .map_err(|e| SessionError::io("persist checkpoint", self.path.display(), e.error))?;

        debug!(
            "Saved checkpoint with {} session(s) to {}",
            checkpoint.sessions.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn delete(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted checkpoint {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionError::io(
                "delete checkpoint",
                self.path.display(),
                err,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sessions::workspace::{RepoRef, WorktreeRef};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn handle(pane: u128) -> SessionHandle {
        let repo = RepoRef::new(Uuid::from_u128(1), "/projects/alpha");
        let worktree = WorktreeRef::new(Uuid::from_u128(2), repo.id, "/projects/alpha/wt");
        SessionHandle::for_pane(&repo, &worktree, Uuid::from_u128(pane))
    }

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(
            dir.path().join("nested").join("session-checkpoint.json"),
            chrono::Duration::hours(24 * 7),
        )
    }

    #[test]
    fn save_then_load_preserves_every_field() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let handles = [handle(3), handle(4)];
        let checkpoint = Checkpoint::from_handles(handles.iter(), at(0));

        store.save(&checkpoint).unwrap();

        match store.load_at(at(1)) {
            LoadOutcome::Loaded(loaded) => assert_eq!(loaded, checkpoint),
            other => panic!("expected loaded checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn wire_format_uses_camel_case_fields() {
        let checkpoint = Checkpoint::from_handles([handle(3)].iter(), at(0));
        let value: Value = serde_json::from_str(&checkpoint.encode().unwrap()).unwrap();
        let entry = &value["sessions"][0];

        assert_eq!(value["version"], json!(3));
        for field in [
            "sessionId",
            "paneId",
            "projectId",
            "worktreeId",
            "repoPath",
            "worktreePath",
            "displayName",
            "workingDirectory",
            "lastKnownAlive",
        ] {
            assert!(entry.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn missing_file_is_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(store(&dir).load(), LoadOutcome::Missing));
    }

    #[test]
    fn old_checkpoint_is_stale() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save(&Checkpoint::from_handles([handle(3)].iter(), at(0)))
            .unwrap();

        assert!(matches!(store.load_at(at(24 * 7 + 1)), LoadOutcome::Stale(_)));
        assert!(matches!(store.load_at(at(24 * 7 - 1)), LoadOutcome::Loaded(_)));
    }

    #[test]
    fn unbounded_max_age_never_goes_stale() {
        let dir = TempDir::new().unwrap();
        let settings = KeeperSettings {
            checkpoint_path: Some(dir.path().join("session-checkpoint.json")),
            checkpoint_max_age_hours: u64::MAX,
            ..KeeperSettings::default()
        };
        let store = CheckpointStore::from_settings(&settings);
        assert!(store.max_age() > chrono::Duration::zero());
        store
            .save(&Checkpoint::from_handles([handle(3)].iter(), at(0)))
            .unwrap();

        assert!(matches!(
            store.load_at(at(24 * 365 * 100)),
            LoadOutcome::Loaded(_)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(
            store.load(),
            LoadOutcome::Invalid(SessionError::CheckpointDecode { .. })
        ));
    }

    #[test]
    fn version_two_is_migrated_with_defaults() {
        let raw = json!({
            "version": 2,
            "timestamp": "2026-03-01T12:00:00Z",
            "sessions": [{
                "sessionId": "pk--aaaaaaaaaaaaaaaa--bbbbbbbbbbbbbbbb--cccccccccccccccc",
                "paneId": Uuid::from_u128(3),
                "projectId": Uuid::from_u128(1),
                "worktreeId": Uuid::from_u128(2),
                "repoPath": "/projects/alpha",
                "worktreePath": "/projects/alpha/wt"
            }]
        })
        .to_string();

        let checkpoint = Checkpoint::decode(&raw).unwrap();
        let entry = &checkpoint.sessions[0];

        assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
        assert_eq!(entry.working_directory, PathBuf::from("/projects/alpha/wt"));
        assert_eq!(entry.display_name, "");
        assert_eq!(entry.last_known_alive, at(0));
    }

    #[test]
    fn version_one_and_future_versions_are_refused() {
        let v1 = json!({
            "version": 1,
            "timestamp": "2026-03-01T12:00:00Z",
            "sessions": [{ "sessionId": "pk--aaaaaaaaaaaaaaaa--bbbbbbbbbbbbbbbb" }]
        });
        let future = json!({ "version": 4, "timestamp": "2026-03-01T12:00:00Z", "sessions": [] });
        let unversioned = json!({ "timestamp": "2026-03-01T12:00:00Z", "sessions": [] });

        for raw in [v1, future, unversioned] {
            assert!(matches!(
                Checkpoint::decode(&raw.to_string()),
                Err(SessionError::CheckpointDecode { .. })
            ));
        }
    }

    #[test]
    fn save_replaces_existing_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save(&Checkpoint::from_handles([handle(3)].iter(), at(0)))
            .unwrap();
        store
            .save(&Checkpoint::from_handles(std::iter::empty(), at(1)))
            .unwrap();

        let files: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files.len(), 1);
        match store.load_at(at(2)) {
            LoadOutcome::Loaded(loaded) => assert!(loaded.sessions.is_empty()),
            other => panic!("expected loaded checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .save(&Checkpoint::from_handles(std::iter::empty(), at(0)))
            .unwrap();

        store.delete().unwrap();
        store.delete().unwrap();
        assert!(!store.path().exists());
    }
}
