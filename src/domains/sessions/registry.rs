use super::backend::{SessionBackend, SessionHandle};
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::state_machine::EffectHandler;
use super::status::{
    SessionMachine, SessionStatus, SessionStatusMachine, StatusEffect, StatusEvent,
    new_session_machine,
};
use super::workspace::{RepoRef, WorktreeRef};
use crate::domains::settings::KeeperSettings;
use crate::errors::SessionError;
use crate::infrastructure::events::{EventSink, KeeperEvent, LogEventSink, emit_or_log};
use crate::shared::session_id::SessionId;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct RegistryEntry {
    pub handle: SessionHandle,
    pub machine: Arc<SessionMachine>,
}

impl RegistryEntry {
    pub fn status(&self) -> SessionStatus {
        self.machine.current_state()
    }
}

#[derive(Default)]
pub(super) struct RegistryState {
    pub(super) entries: HashMap<SessionId, RegistryEntry>,
    pub(super) in_flight: HashSet<SessionId>,
    pub(super) health_tasks: HashMap<SessionId, JoinHandle<()>>,
}

impl RegistryState {
    fn abort_all_tasks(&mut self) {
        for (id, task) in self.health_tasks.drain() {
            debug!("[SessionRegistry] Cancelling health check for {id}");
            task.abort();
        }
    }
}

#[derive(Clone)]
pub(super) struct RegistryConfig {
    pub(super) backend: Arc<dyn SessionBackend>,
    pub(super) settings: KeeperSettings,
    pub(super) store: CheckpointStore,
}

pub(super) struct RegistryInner {
    config: RwLock<RegistryConfig>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) state: Mutex<RegistryState>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.state.get_mut().abort_all_tasks();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub display_name: String,
    pub working_directory: String,
    pub status: SessionStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionNotice<'a> {
    session_id: &'a str,
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// Owns every tracked session: its handle, its status machine and its
/// health-check task. Cloning shares the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    pub(super) inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        settings: KeeperSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let store = CheckpointStore::from_settings(&settings);
        Self {
            inner: Arc::new(RegistryInner {
                config: RwLock::new(RegistryConfig {
                    backend,
                    settings,
                    store,
                }),
                sink,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn with_log_sink(backend: Arc<dyn SessionBackend>, settings: KeeperSettings) -> Self {
        Self::new(backend, settings, Arc::new(LogEventSink))
    }

    pub fn backend(&self) -> Arc<dyn SessionBackend> {
        self.inner.config().backend
    }

    pub fn settings(&self) -> KeeperSettings {
        self.inner.config().settings
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        self.inner.config().store
    }

    pub async fn get_or_create_pane_session(
        &self,
        worktree: &WorktreeRef,
        repo: &RepoRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError> {
        let id = SessionId::for_pane(&repo.path, &worktree.path, pane_id);

        let existing = {
            let mut state = self.inner.state.lock().await;
            if let Some(entry) = state.entries.get(&id) {
                if entry.status().is_alive() {
                    debug!("[SessionRegistry] Reusing live session {id}");
                    return Ok(entry.handle.clone());
                }
            }
            if !state.in_flight.insert(id.clone()) {
                return Err(SessionError::OperationInProgress {
                    session_id: id.to_string(),
                });
            }
            state.entries.get(&id).map(|entry| entry.machine.clone())
        };

        let created = self.inner.create_with_retries(&id, repo, worktree, pane_id).await;

        let handle = match created {
            Ok(handle) => handle,
            Err(err) => {
                self.inner.state.lock().await.in_flight.remove(&id);
                return Err(err);
            }
        };

        {
            let mut state = self.inner.state.lock().await;
            state.in_flight.remove(&id);
            let machine = match existing {
                Some(machine) => {
                    machine.force_state(SessionStatus::Alive);
                    machine
                }
                None => self.inner.new_machine(&id, SessionStatus::Alive),
            };
            state.entries.insert(
                id.clone(),
                RegistryEntry {
                    handle: handle.clone(),
                    machine,
                },
            );
        }

        info!(
            "[SessionRegistry] Session {id} ready for {}",
            handle.display_name
        );
        self.inner.schedule_health_check(&id).await;
        self.save_checkpoint_logged().await;
        self.inner.notify(KeeperEvent::SessionCreated, &handle, None);
        Ok(handle)
    }

    /// Track a session created by the terminal surface (deferred-creation
    /// backends). Invalid ids and already tracked sessions are ignored.
    pub async fn register_pane_session(
        &self,
        worktree: &WorktreeRef,
        repo: &RepoRef,
        pane_id: Uuid,
        session_id: &str,
    ) -> bool {
        let id = match SessionId::parse(session_id) {
            Ok(id) => id,
            Err(err) => {
                warn!("[SessionRegistry] Not registering session: {err}");
                return false;
            }
        };

        let handle = SessionHandle::for_pane(repo, worktree, pane_id);
        if handle.id != id {
            warn!(
                "[SessionRegistry] Not registering {id}: pane resolves to {}",
                handle.id
            );
            return false;
        }

        if !self.inner.install(handle, SessionStatus::Alive).await {
            debug!("[SessionRegistry] Session {id} already registered");
            return false;
        }

        self.inner.schedule_health_check(&id).await;
        self.save_checkpoint_logged().await;
        true
    }

    /// Stop tracking a session. The multiplexer session itself is left running.
    pub async fn unregister_pane_session(&self, session_id: &SessionId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().await;
            if let Some(task) = state.health_tasks.remove(session_id) {
                task.abort();
            }
            state.entries.remove(session_id)
        };
        let Some(entry) = removed else {
            return false;
        };
        entry.machine.clear_effect_handler();
        info!("[SessionRegistry] Unregistered session {session_id}");
        self.save_checkpoint_logged().await;
        true
    }

    pub async fn attach_command(
        &self,
        worktree: &WorktreeRef,
        repo: &RepoRef,
        pane_id: Uuid,
    ) -> Option<String> {
        let id = SessionId::for_pane(&repo.path, &worktree.path, pane_id);
        let entry = self.entry(&id).await?;
        Some(self.backend().attach_command(&entry.handle))
    }

    /// Persist every tracked handle. The registry is the only writer.
    pub async fn save_checkpoint(&self) -> Result<(), SessionError> {
        let handles: Vec<SessionHandle> = {
            let state = self.inner.state.lock().await;
            let mut handles: Vec<_> = state
                .entries
                .values()
                .map(|entry| entry.handle.clone())
                .collect();
            handles.sort_by(|a, b| a.id.cmp(&b.id));
            handles
        };
        let checkpoint = Checkpoint::from_handles(handles.iter(), Utc::now());
        self.checkpoint_store().save(&checkpoint)
    }

    pub(super) async fn save_checkpoint_logged(&self) {
        if let Err(err) = self.save_checkpoint().await {
            error!("[SessionRegistry] Failed to save checkpoint: {err}");
        }
    }

    /// Tear everything down: cancel checks, destroy every session, forget the checkpoint.
    pub async fn destroy_all(&self) {
        let entries: Vec<RegistryEntry> = {
            let mut state = self.inner.state.lock().await;
            state.abort_all_tasks();
            state.in_flight.clear();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };

        let backend = self.backend();
        for entry in &entries {
            entry.machine.clear_effect_handler();
            if let Err(err) = backend.destroy_pane_session(&entry.handle).await {
                warn!(
                    "[SessionRegistry] Failed to destroy {} during teardown: {err}",
                    entry.handle.id
                );
            }
        }

        if let Err(err) = self.checkpoint_store().delete() {
            error!("[SessionRegistry] Failed to delete checkpoint: {err}");
        }
        info!(
            "[SessionRegistry] Destroyed {} session(s)",
            entries.len()
        );
    }

    /// Destroy one session through its machine, then forget it.
    pub async fn destroy_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let entry = self
            .entry(session_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let before = entry.status();
        entry.machine.send(StatusEvent::Destroy).await;
        if before == SessionStatus::Unknown || entry.status() != SessionStatus::Unknown {
            // Verifying and recovering have no destroy transition.
            self.inner.cancel_health_check(session_id).await;
            if let Err(err) = self.backend().destroy_pane_session(&entry.handle).await {
                warn!("[SessionRegistry] Failed to destroy {session_id}: {err}");
            }
            entry.machine.force_state(SessionStatus::Unknown);
        }

        entry.machine.clear_effect_handler();
        self.inner.state.lock().await.entries.remove(session_id);
        self.save_checkpoint_logged().await;
        self.inner
            .notify(KeeperEvent::SessionDestroyed, &entry.handle, None);
        Ok(())
    }

    /// Explicit re-attempt for a dead or failed session.
    pub async fn retry_session(&self, session_id: &SessionId) -> Result<SessionStatus, SessionError> {
        self.send(session_id, StatusEvent::AttemptRecovery).await
    }

    /// The terminal's child process exited; treat it like a failed health check.
    pub async fn report_process_exited(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionStatus, SessionError> {
        self.send(session_id, StatusEvent::HealthCheckFailed).await
    }

    /// Re-run socket and session detection for an unknown or dead session.
    pub async fn verify_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionStatus, SessionError> {
        self.send(session_id, StatusEvent::Verify).await
    }

    async fn send(
        &self,
        session_id: &SessionId,
        event: StatusEvent,
    ) -> Result<SessionStatus, SessionError> {
        let entry = self
            .entry(session_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        entry.machine.send(event).await;
        Ok(entry.machine.current_state())
    }

    pub async fn status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        self.entry(session_id).await.map(|entry| entry.status())
    }

    pub async fn entry(&self, session_id: &SessionId) -> Option<RegistryEntry> {
        self.inner.entry(session_id).await
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<_> = state.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let entries: Vec<RegistryEntry> = {
            let state = self.inner.state.lock().await;
            state.entries.values().cloned().collect()
        };
        let mut snapshot: Vec<_> = entries
            .into_iter()
            .map(|entry| SessionSnapshot {
                status: entry.status(),
                session_id: entry.handle.id,
                display_name: entry.handle.display_name,
                working_directory: entry.handle.working_directory.display().to_string(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub(super) async fn has_health_task(&self, session_id: &SessionId) -> bool {
        self.inner
            .state
            .lock()
            .await
            .health_tasks
            .contains_key(session_id)
    }

    /// Stop background work and write a final checkpoint. Sessions keep running
    /// so the next start can restore them.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.inner.state.lock().await.abort_all_tasks();
        self.save_checkpoint().await
    }

    /// Kill multiplexer sessions that follow our naming scheme but are not tracked.
    pub async fn cleanup_orphans(&self) -> Result<Vec<String>, SessionError> {
        let tracked: HashSet<String> = self
            .session_ids()
            .await
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        let backend = self.backend();
        let orphans = backend.discover_orphan_sessions(&tracked).await?;
        if orphans.is_empty() {
            return Ok(orphans);
        }

        let results = join_all(
            orphans
                .iter()
                .map(|name| backend.destroy_session_by_id(name)),
        )
        .await;

        let mut removed = Vec::new();
        for (name, result) in orphans.into_iter().zip(results) {
            match result {
                Ok(()) => removed.push(name),
                Err(err) => warn!("[SessionRegistry] Failed to remove orphan {name}: {err}"),
            }
        }

        info!("[SessionRegistry] Removed {} orphan session(s)", removed.len());
        emit_or_log(
            self.inner.sink.as_ref(),
            KeeperEvent::OrphansCleaned,
            &removed,
        );
        Ok(removed)
    }

    /// Swap backend and settings wholesale, dropping all tracked state. For tests.
    pub async fn reset(&self, backend: Arc<dyn SessionBackend>, settings: KeeperSettings) {
        let entries: Vec<RegistryEntry> = {
            let mut state = self.inner.state.lock().await;
            state.abort_all_tasks();
            state.in_flight.clear();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.machine.clear_effect_handler();
        }

        let store = CheckpointStore::from_settings(&settings);
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *config = RegistryConfig {
            backend,
            settings,
            store,
        };
    }
}

impl RegistryInner {
    pub(super) fn config(&self) -> RegistryConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn backend(&self) -> Arc<dyn SessionBackend> {
        self.config().backend
    }

    async fn entry(&self, session_id: &SessionId) -> Option<RegistryEntry> {
        self.state.lock().await.entries.get(session_id).cloned()
    }

    pub(super) fn new_machine(
        self: &Arc<Self>,
        session_id: &SessionId,
        initial: SessionStatus,
    ) -> Arc<SessionMachine> {
        let settings = self.config().settings;
        let machine = Arc::new(new_session_machine(initial, settings.max_queue_depth));
        machine.set_effect_handler(Arc::new(RegistryEffectHandler {
            registry: Arc::downgrade(self),
            session_id: session_id.clone(),
        }));
        machine
    }

    /// Insert a fresh entry unless the id is already tracked or being created.
    pub(super) async fn install(self: &Arc<Self>, handle: SessionHandle, status: SessionStatus) -> bool {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&handle.id) || state.in_flight.contains(&handle.id) {
            return false;
        }
        let machine = self.new_machine(&handle.id, status);
        state
            .entries
            .insert(handle.id.clone(), RegistryEntry { handle, machine });
        true
    }

    async fn create_with_retries(
        &self,
        session_id: &SessionId,
        repo: &RepoRef,
        worktree: &WorktreeRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError> {
        let RegistryConfig {
            backend, settings, ..
        } = self.config();
        if !backend.is_available() {
            return Err(SessionError::BackendUnavailable {
                backend: backend.kind().to_string(),
            });
        }

        let retries = settings.creation_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=retries {
            match backend.create_pane_session(repo, worktree, pane_id).await {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    warn!(
                        "[SessionRegistry] Create attempt {attempt}/{retries} for {session_id} failed: {err}"
                    );
                    last_error = Some(err);
                    if attempt < retries {
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    }
                }
            }
        }

        Err(SessionError::CreationFailed {
            session_id: session_id.to_string(),
            retries,
            message: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    pub(super) async fn schedule_health_check(self: &Arc<Self>, session_id: &SessionId) {
        let interval = self.config().settings.health_check_interval();
        let task = spawn_health_task(Arc::downgrade(self), session_id.clone(), interval);
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(session_id) {
            task.abort();
            return;
        }
        if let Some(previous) = state.health_tasks.insert(session_id.clone(), task) {
            previous.abort();
        }
    }

    async fn cancel_health_check(&self, session_id: &SessionId) {
        if let Some(task) = self.state.lock().await.health_tasks.remove(session_id) {
            task.abort();
        }
    }

    fn notify(&self, event: KeeperEvent, handle: &SessionHandle, reason: Option<&str>) {
        emit_or_log(
            self.sink.as_ref(),
            event,
            &SessionNotice {
                session_id: handle.id.as_str(),
                display_name: &handle.display_name,
                reason,
            },
        );
    }

    async fn recover(&self, handle: &SessionHandle) -> StatusEvent {
        let RegistryConfig {
            backend, settings, ..
        } = self.config();
        let attempts = settings.recovery_attempts.max(1);
        for attempt in 1..=attempts {
            if backend.health_check(handle).await {
                info!(
                    "[SessionRegistry] Session {} recovered on attempt {attempt}",
                    handle.id
                );
                return StatusEvent::RecoverySucceeded;
            }
            if attempt < attempts {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }
        StatusEvent::RecoveryFailed(format!(
            "session not alive after {attempts} health check(s)"
        ))
    }
}

fn spawn_health_task(
    registry: Weak<RegistryInner>,
    session_id: SessionId,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let Some(entry) = inner.entry(&session_id).await else {
                return;
            };
            if !entry.status().is_alive() {
                return;
            }
            let backend = inner.backend();
            drop(inner);

            if backend.health_check(&entry.handle).await {
                continue;
            }

            warn!("[SessionRegistry] Health check failed for {session_id}");
            // Sending from a detached task: the resulting CancelHealthCheck
            // aborts this task's handle.
            tokio::spawn(async move {
                entry.machine.send(StatusEvent::HealthCheckFailed).await;
            });
            return;
        }
    })
}

/// Runs status effects against the registry that owns the machine.
struct RegistryEffectHandler {
    registry: Weak<RegistryInner>,
    session_id: SessionId,
}

#[async_trait]
impl EffectHandler<SessionStatusMachine> for RegistryEffectHandler {
    async fn handle(&self, effect: StatusEffect, machine: &SessionMachine) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let id = &self.session_id;
        let backend = inner.backend();
        let handle = inner.entry(id).await.map(|entry| entry.handle);

        match effect {
            StatusEffect::CheckSocket => {
                let event = if backend.socket_exists() {
                    StatusEvent::SocketFound
                } else {
                    StatusEvent::SocketMissing
                };
                machine.send(event).await;
            }
            StatusEffect::CheckSessionExists => {
                let exists = match &handle {
                    Some(handle) => backend.session_exists(handle).await,
                    None => false,
                };
                let event = if exists {
                    StatusEvent::SessionDetected
                } else {
                    StatusEvent::SessionNotDetected
                };
                machine.send(event).await;
            }
            StatusEffect::CreateSession => {
                let Some(handle) = handle else {
                    machine.send(StatusEvent::SessionNotDetected).await;
                    return;
                };
                let repo = RepoRef {
                    id: handle.project_id,
                    path: handle.repo_path.clone(),
                    name: String::new(),
                };
                let worktree = WorktreeRef {
                    id: handle.worktree_id,
                    repo_id: handle.project_id,
                    path: handle.worktree_path.clone(),
                    name: String::new(),
                };
                let event = match inner
                    .create_with_retries(id, &repo, &worktree, handle.pane_id)
                    .await
                {
                    Ok(_) => StatusEvent::SessionDetected,
                    Err(err) => {
                        warn!("[SessionRegistry] Could not create {id}: {err}");
                        StatusEvent::SessionNotDetected
                    }
                };
                machine.send(event).await;
            }
            StatusEffect::DestroySession => {
                if let Err(err) = backend.destroy_session_by_id(id.as_str()).await {
                    warn!("[SessionRegistry] Failed to destroy {id}: {err}");
                }
            }
            StatusEffect::ScheduleHealthCheck => inner.schedule_health_check(id).await,
            StatusEffect::CancelHealthCheck => inner.cancel_health_check(id).await,
            StatusEffect::AttemptRecovery => {
                let event = match &handle {
                    Some(handle) => inner.recover(handle).await,
                    None => StatusEvent::RecoveryFailed("session is no longer tracked".into()),
                };
                machine.send(event).await;
            }
            StatusEffect::NotifyAlive => {
                if let Some(handle) = &handle {
                    inner.notify(KeeperEvent::SessionAlive, handle, None);
                }
            }
            StatusEffect::NotifyDead => {
                if let Some(handle) = &handle {
                    inner.notify(KeeperEvent::SessionDead, handle, None);
                }
                if inner.config().settings.auto_recover {
                    machine.send(StatusEvent::AttemptRecovery).await;
                }
            }
            StatusEffect::NotifyFailed(reason) => {
                error!("[SessionRegistry] Session {id} failed: {reason}");
                if let Some(handle) = &handle {
                    inner.notify(KeeperEvent::SessionFailed, handle, Some(reason.as_str()));
                }
            }
        }
    }
}
