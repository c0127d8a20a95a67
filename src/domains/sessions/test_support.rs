use super::backend::{BackendKind, SessionBackend, SessionHandle, filter_orphans};
use super::workspace::{RepoRef, WorktreeRef};
use crate::domains::settings::KeeperSettings;
use crate::errors::SessionError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// In-memory multiplexer: `sessions` is what the backend would list.
#[derive(Default)]
pub struct MockBackend {
    pub unavailable: AtomicBool,
    pub socket_missing: AtomicBool,
    pub lazy: AtomicBool,
    sessions: Mutex<Vec<String>>,
    create_failures: AtomicU32,
    destroy_failures: AtomicU32,
    create_delay_ms: AtomicU32,
    create_calls: AtomicUsize,
    health_calls: AtomicUsize,
    destroy_calls: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_destroys(&self, count: u32) {
        self.destroy_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    pub fn add_session(&self, id: &str) {
        self.sessions.lock().unwrap().push(id.to_string());
    }

    /// Simulate the multiplexer losing a session behind our back.
    pub fn kill(&self, id: &str) {
        self.sessions.lock().unwrap().retain(|name| name != id);
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.sessions.lock().unwrap().iter().any(|name| name == id)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> Vec<String> {
        self.destroy_calls.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    fn creates_on_attach(&self) -> bool {
        self.lazy.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn socket_exists(&self) -> bool {
        !self.socket_missing.load(Ordering::SeqCst)
    }

    async fn create_pane_session(
        &self,
        repo: &RepoRef,
        worktree: &WorktreeRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if Self::take_failure(&self.create_failures) {
            return Err(SessionError::operation_failed("new-session", "scripted failure"));
        }
        let handle = SessionHandle::for_pane(repo, worktree, pane_id);
        if !self.lazy.load(Ordering::SeqCst) && !self.has_session(handle.id.as_str()) {
            self.add_session(handle.id.as_str());
        }
        Ok(handle)
    }

    async fn session_exists(&self, handle: &SessionHandle) -> bool {
        self.has_session(handle.id.as_str())
    }

    async fn health_check(&self, handle: &SessionHandle) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.has_session(handle.id.as_str())
    }

    async fn destroy_session_by_id(&self, id: &str) -> Result<(), SessionError> {
        self.destroy_calls.lock().unwrap().push(id.to_string());
        if Self::take_failure(&self.destroy_failures) {
            return Err(SessionError::operation_failed("kill-session", "scripted failure"));
        }
        self.kill(id);
        Ok(())
    }

    async fn discover_orphan_sessions(
        &self,
        excluding: &HashSet<String>,
    ) -> Result<Vec<String>, SessionError> {
        let names = self.sessions.lock().unwrap().clone();
        Ok(filter_orphans(names.iter().map(String::as_str), excluding))
    }

    fn attach_command(&self, handle: &SessionHandle) -> String {
        format!("mock attach {}", handle.id)
    }
}

/// Settings pointing the checkpoint into `dir`, with fast retries.
pub fn test_settings(dir: &Path) -> KeeperSettings {
    KeeperSettings {
        checkpoint_path: Some(dir.join("session-checkpoint.json")),
        health_check_interval_secs: 1,
        recovery_attempts: 2,
        ..KeeperSettings::default()
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub repo: RepoRef,
    pub worktree: WorktreeRef,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("alpha");
        let worktree_path = repo_path.join(".worktrees").join("feature");
        std::fs::create_dir_all(&worktree_path).unwrap();
        let repo = RepoRef::new(Uuid::from_u128(1), repo_path);
        let worktree = WorktreeRef::new(Uuid::from_u128(2), repo.id, worktree_path);
        Self {
            dir,
            repo,
            worktree,
        }
    }

    pub fn settings(&self) -> KeeperSettings {
        test_settings(self.dir.path())
    }
}
