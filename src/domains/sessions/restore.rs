use super::backend::SessionHandle;
use super::checkpoint::{Checkpoint, CheckpointEntry, LoadOutcome};
use super::registry::{SessionRegistry, SessionSnapshot};
use super::status::SessionStatus;
use super::workspace::WorkspaceLookup;
use crate::errors::SessionError;
use crate::infrastructure::events::{KeeperEvent, emit_or_log};
use crate::shared::session_id::has_app_prefix;
use log::{debug, info, warn};
use serde::Serialize;

/// What happened to the checkpoint on startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RestoreSource {
    /// Backend unavailable; nothing was read or touched.
    Skipped,
    #[default]
    Missing,
    Stale,
    Invalid,
    Loaded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub source: RestoreSource,
    /// Live sessions re-attached to the registry.
    pub restored: usize,
    /// Entries whose session no longer exists.
    pub dropped: usize,
    /// Sessions killed because their repo or worktree moved or vanished.
    pub destroyed: usize,
    pub orphans_removed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreNotice<'a> {
    #[serde(flatten)]
    report: &'a RestoreReport,
    sessions: Vec<SessionSnapshot>,
}

impl SessionRegistry {
    /// Startup reconciliation: read the checkpoint, re-attach every session
    /// that still exists under its recomputed id, and clear out the rest.
    pub async fn initialize(&self, lookup: &dyn WorkspaceLookup) -> RestoreReport {
        let backend = self.backend();
        if !backend.is_available() {
            let err = SessionError::BackendUnavailable {
                backend: backend.kind().to_string(),
            };
            warn!("[SessionRegistry] {err}; running without session restore");
            return RestoreReport {
                source: RestoreSource::Skipped,
                ..RestoreReport::default()
            };
        }

        let store = self.checkpoint_store();
        let mut report = match store.load() {
            LoadOutcome::Missing => {
                debug!(
                    "[SessionRegistry] No checkpoint at {}",
                    store.path().display()
                );
                return RestoreReport::default();
            }
            outcome @ (LoadOutcome::Stale(_) | LoadOutcome::Invalid(_)) => {
                let source = match outcome {
                    LoadOutcome::Stale(_) => RestoreSource::Stale,
                    _ => RestoreSource::Invalid,
                };
                if let Err(err) = store.delete() {
                    warn!("[SessionRegistry] Could not remove unusable checkpoint: {err}");
                }
                RestoreReport {
                    source,
                    ..RestoreReport::default()
                }
            }
            LoadOutcome::Loaded(checkpoint) => {
                let report = self.restore_from_checkpoint(&checkpoint, lookup).await;
                self.save_checkpoint_logged().await;
                report
            }
        };

        match self.cleanup_orphans().await {
            Ok(removed) => report.orphans_removed = removed.len(),
            Err(err) => warn!("[SessionRegistry] Orphan cleanup failed: {err}"),
        }

        info!(
            "[SessionRegistry] Restore finished: {} restored, {} dropped, {} destroyed, {} orphan(s) removed",
            report.restored, report.dropped, report.destroyed, report.orphans_removed
        );
        let notice = RestoreNotice {
            report: &report,
            sessions: self.snapshot().await,
        };
        emit_or_log(
            self.inner.sink.as_ref(),
            KeeperEvent::SessionsRestored,
            &notice,
        );
        report
    }

    pub async fn restore_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        lookup: &dyn WorkspaceLookup,
    ) -> RestoreReport {
        let mut report = RestoreReport {
            source: RestoreSource::Loaded,
            ..RestoreReport::default()
        };

        for entry in &checkpoint.sessions {
            match self.restore_entry(entry, lookup).await {
                EntryOutcome::Restored => report.restored += 1,
                EntryOutcome::Dropped => report.dropped += 1,
                EntryOutcome::Destroyed => report.destroyed += 1,
                EntryOutcome::AlreadyTracked => {}
            }
        }
        report
    }

    async fn restore_entry(
        &self,
        entry: &CheckpointEntry,
        lookup: &dyn WorkspaceLookup,
    ) -> EntryOutcome {
        let repo = lookup
            .repo_by_id(entry.project_id)
            .or_else(|| lookup.repo_by_path(&entry.repo_path));
        let worktree = lookup
            .worktree_by_id(entry.worktree_id)
            .or_else(|| lookup.worktree_by_path(&entry.worktree_path));

        let (Some(repo), Some(worktree)) = (repo, worktree) else {
            info!(
                "[SessionRegistry] Workspace for {} is gone, destroying its session",
                entry.session_id
            );
            return self.destroy_stale(&entry.session_id).await;
        };

        let handle = SessionHandle::for_pane(&repo, &worktree, entry.pane_id);
        if handle.id.as_str() != entry.session_id {
            info!(
                "[SessionRegistry] {} moved (now {}), destroying the stale session",
                entry.session_id, handle.id
            );
            return self.destroy_stale(&entry.session_id).await;
        }

        if self.entry(&handle.id).await.is_some() {
            return EntryOutcome::AlreadyTracked;
        }

        if !self.backend().session_exists(&handle).await {
            debug!(
                "[SessionRegistry] Session {} no longer exists, dropping it",
                handle.id
            );
            return EntryOutcome::Dropped;
        }

        let id = handle.id.clone();
        if !self.inner.install(handle, SessionStatus::Alive).await {
            return EntryOutcome::AlreadyTracked;
        }
        self.inner.schedule_health_check(&id).await;
        debug!("[SessionRegistry] Restored session {id}");
        EntryOutcome::Restored
    }

    async fn destroy_stale(&self, session_id: &str) -> EntryOutcome {
        if !has_app_prefix(session_id) {
            warn!("[SessionRegistry] Refusing to destroy foreign session name {session_id}");
            return EntryOutcome::Dropped;
        }
        if let Err(err) = self.backend().destroy_session_by_id(session_id).await {
            warn!("[SessionRegistry] Failed to destroy stale session {session_id}: {err}");
        }
        EntryOutcome::Destroyed
    }
}

enum EntryOutcome {
    Restored,
    Dropped,
    Destroyed,
    AlreadyTracked,
}
