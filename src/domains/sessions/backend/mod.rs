pub mod auto_attach;
pub mod runner;
pub mod tmux;

use super::workspace::{RepoRef, WorktreeRef};
use crate::domains::settings::{BackendChoice, KeeperSettings};
use crate::errors::SessionError;
use crate::shared::session_id::{SessionId, has_app_prefix};
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub use auto_attach::AutoAttachBackend;
pub use runner::{CommandOutput, CommandRequest, CommandRunner, RunError, SystemCommandRunner};
pub use tmux::TmuxBackend;

/// Everything needed to name, create and attach to one pane's external session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: SessionId,
    pub pane_id: Uuid,
    pub project_id: Uuid,
    pub worktree_id: Uuid,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub display_name: String,
    pub working_directory: PathBuf,
}

impl SessionHandle {
    pub fn for_pane(repo: &RepoRef, worktree: &WorktreeRef, pane_id: Uuid) -> Self {
        let display_name = if worktree.path == repo.path {
            repo.name.clone()
        } else {
            format!("{}/{}", repo.name, worktree.name)
        };
        Self {
            id: SessionId::for_pane(&repo.path, &worktree.path, pane_id),
            pane_id,
            project_id: repo.id,
            worktree_id: worktree.id,
            repo_path: repo.path.clone(),
            worktree_path: worktree.path.clone(),
            display_name,
            working_directory: worktree.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Tmux,
    Zmx,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Tmux => f.write_str("tmux"),
            BackendKind::Zmx => f.write_str("zmx"),
        }
    }
}

/// Provider of external multiplexer sessions.
///
/// Observations (`session_exists`, `health_check`) never fail: an absent
/// session and an I/O error both read as `false`.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// True when `create_pane_session` spawns nothing and the session only
    /// appears once the terminal attaches.
    fn creates_on_attach(&self) -> bool;

    fn is_available(&self) -> bool;

    fn socket_exists(&self) -> bool;

    async fn create_pane_session(
        &self,
        repo: &RepoRef,
        worktree: &WorktreeRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError>;

    async fn session_exists(&self, handle: &SessionHandle) -> bool;

    async fn health_check(&self, handle: &SessionHandle) -> bool;

    async fn destroy_pane_session(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        self.destroy_session_by_id(handle.id.as_str()).await
    }

    async fn destroy_session_by_id(&self, id: &str) -> Result<(), SessionError>;

    /// Names of live sessions that follow this application's naming
    /// convention and are not in `excluding`.
    async fn discover_orphan_sessions(
        &self,
        excluding: &HashSet<String>,
    ) -> Result<Vec<String>, SessionError>;

    /// Shell line the terminal surface runs to attach, creating the session if needed.
    fn attach_command(&self, handle: &SessionHandle) -> String;
}

pub(crate) fn filter_orphans<'a>(
    names: impl IntoIterator<Item = &'a str>,
    excluding: &HashSet<String>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(str::trim)
        .filter(|name| has_app_prefix(name) && !excluding.contains(*name))
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

pub(crate) fn quote_command(parts: &[String]) -> String {
    shell_words::join(parts)
}

/// Build the backend selected by `settings`. `Auto` prefers tmux and falls
/// back to zmx; when nothing is available the preferred backend is returned
/// so the registry can run in its degraded no-restore mode.
pub fn build_backend(settings: &KeeperSettings) -> Arc<dyn SessionBackend> {
    match settings.backend {
        BackendChoice::Tmux => Arc::new(TmuxBackend::from_settings(settings)),
        BackendChoice::Zmx => Arc::new(AutoAttachBackend::from_settings(settings)),
        BackendChoice::Auto => {
            let tmux = TmuxBackend::from_settings(settings);
            if tmux.is_available() {
                info!("Using tmux session backend");
                return Arc::new(tmux);
            }
            let zmx = AutoAttachBackend::from_settings(settings);
            if zmx.is_available() {
                info!("tmux not found, using zmx session backend");
                return Arc::new(zmx);
            }
            warn!("No session multiplexer found; sessions will not persist across restarts");
            Arc::new(tmux)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_uses_worktree_as_working_directory() {
        let repo = RepoRef::new(Uuid::from_u128(1), "/projects/alpha");
        let worktree = WorktreeRef::new(
            Uuid::from_u128(2),
            repo.id,
            "/projects/alpha/.worktrees/feature",
        );
        let handle = SessionHandle::for_pane(&repo, &worktree, Uuid::from_u128(3));

        assert_eq!(handle.project_id, repo.id);
        assert_eq!(handle.worktree_id, worktree.id);
        assert_eq!(handle.working_directory, worktree.path);
        assert_eq!(handle.display_name, "alpha/feature");
        assert_eq!(
            handle.id,
            SessionId::for_pane(&repo.path, &worktree.path, Uuid::from_u128(3))
        );
    }

    #[test]
    fn main_checkout_display_name_is_repo_name() {
        let repo = RepoRef::new(Uuid::from_u128(1), "/projects/alpha");
        let worktree = WorktreeRef::new(Uuid::from_u128(2), repo.id, "/projects/alpha");
        let handle = SessionHandle::for_pane(&repo, &worktree, Uuid::from_u128(3));
        assert_eq!(handle.display_name, "alpha");
    }

    #[test]
    fn orphan_filter_keeps_only_untracked_app_sessions() {
        let excluding: HashSet<String> = ["pk--A".to_string()].into_iter().collect();
        let orphans = filter_orphans(["pk--A", "pk--B", "user-other"], &excluding);
        assert_eq!(orphans, vec!["pk--B".to_string()]);
    }

    #[test]
    fn orphan_filter_drops_duplicates_and_blank_lines() {
        let orphans = filter_orphans(["pk--B", "", "  pk--B  ", "pk--C"], &HashSet::new());
        assert_eq!(orphans, vec!["pk--B".to_string(), "pk--C".to_string()]);
    }

    #[test]
    fn quoting_escapes_spaces_and_quotes() {
        let line = quote_command(&[
            "tmux".into(),
            "-c".into(),
            "/tmp/my repo/it's".into(),
        ]);
        assert_eq!(shell_words::split(&line).unwrap()[2], "/tmp/my repo/it's");
        assert!(line.starts_with("tmux -c '"));
    }
}
