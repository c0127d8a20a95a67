use super::runner::{CommandOutput, CommandRequest, CommandRunner, SystemCommandRunner};
use super::{BackendKind, SessionBackend, SessionHandle, filter_orphans, quote_command};
use crate::domains::sessions::workspace::{RepoRef, WorktreeRef};
use crate::domains::settings::KeeperSettings;
use crate::errors::SessionError;
use crate::utils::binary_utils::resolve_binary;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

const TMUX_COMMAND: &str = "tmux";
const SOCKET_DIR_ENV: &str = "TMUX_TMPDIR";

const ALREADY_GONE_MARKERS: &[&str] = &[
    "can't find session",
    "session not found",
    "no server running",
    "error connecting to",
];

/// Backend that shells out to tmux for every operation, on a private `-L` socket.
pub struct TmuxBackend<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    binary: Option<PathBuf>,
    socket_name: String,
    config_path: Option<PathBuf>,
    socket_dir: Option<PathBuf>,
    timeout: Duration,
}

impl TmuxBackend<SystemCommandRunner> {
    pub fn from_settings(settings: &KeeperSettings) -> Self {
        let binary = resolve_binary(TMUX_COMMAND, settings.tmux.binary.as_deref());
        if binary.is_none() {
            debug!("[TmuxBackend] tmux binary not found");
        }
        Self {
            runner: SystemCommandRunner,
            binary,
            socket_name: settings.tmux.socket_name.clone(),
            config_path: settings.tmux.config_path.clone(),
            socket_dir: settings.socket_dir.clone(),
            timeout: settings.command_timeout(),
        }
    }
}

impl<R: CommandRunner> TmuxBackend<R> {
    pub fn with_runner(runner: R, binary: impl Into<PathBuf>, socket_name: &str) -> Self {
        Self {
            runner,
            binary: Some(binary.into()),
            socket_name: socket_name.to_string(),
            config_path: None,
            socket_dir: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-L".to_string(), self.socket_name.clone()];
        if let Some(config) = &self.config_path {
            args.push("-f".to_string());
            args.push(config.to_string_lossy().to_string());
        }
        args
    }

    fn child_env(&self) -> Vec<(String, String)> {
        self.socket_dir
            .iter()
            .map(|dir| (SOCKET_DIR_ENV.to_string(), dir.to_string_lossy().to_string()))
            .collect()
    }

    async fn run_tmux(&self, args: &[&str]) -> Result<CommandOutput, SessionError> {
        let Some(program) = &self.binary else {
            return Err(SessionError::BackendUnavailable {
                backend: BackendKind::Tmux.to_string(),
            });
        };

        let mut all_args = self.base_args();
        all_args.extend(args.iter().map(|arg| arg.to_string()));
        let request = CommandRequest {
            program: program.clone(),
            args: all_args,
            env: self.child_env(),
            timeout: self.timeout,
        };

        self.runner
            .run(&request)
            .await
            .map_err(|err| err.into_session_error(&request))
    }

    /// Where tmux puts the `-L` socket: `$TMUX_TMPDIR/tmux-<uid>/<name>`.
    pub fn socket_path(&self) -> PathBuf {
        let base = self
            .socket_dir
            .clone()
            .or_else(|| std::env::var_os(SOCKET_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        base.join(format!("tmux-{}", current_uid()))
            .join(&self.socket_name)
    }

    async fn has_session(&self, id: &str) -> Result<bool, SessionError> {
        let output = self.run_tmux(&["has-session", "-t", id]).await?;
        Ok(output.success())
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

fn is_already_gone(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    ALREADY_GONE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[async_trait]
impl<R: CommandRunner> SessionBackend for TmuxBackend<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Tmux
    }

    fn creates_on_attach(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    fn socket_exists(&self) -> bool {
        self.socket_path().exists()
    }

    async fn create_pane_session(
        &self,
        repo: &RepoRef,
        worktree: &WorktreeRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError> {
        let handle = SessionHandle::for_pane(repo, worktree, pane_id);
        let id = handle.id.as_str();
        let working_dir = handle.working_directory.to_string_lossy().to_string();

        let output = self
            .run_tmux(&["new-session", "-d", "-s", id, "-c", &working_dir])
            .await?;

        if output.success() {
            info!("[TmuxBackend] Created session {id} in {working_dir}");
            return Ok(handle);
        }
        if output.stderr.contains("duplicate session") {
            debug!("[TmuxBackend] Session {id} already exists, adopting it");
            return Ok(handle);
        }

        warn!(
            "[TmuxBackend] new-session for {id} failed with {:?}: {}",
            output.status,
            output.stderr.trim()
        );
        Err(SessionError::operation_failed(
            "new-session",
            output.stderr.trim(),
        ))
    }

    async fn session_exists(&self, handle: &SessionHandle) -> bool {
        match self.has_session(handle.id.as_str()).await {
            Ok(exists) => exists,
            Err(err) => {
                debug!("[TmuxBackend] has-session for {} failed: {err}", handle.id);
                false
            }
        }
    }

    async fn health_check(&self, handle: &SessionHandle) -> bool {
        match self.has_session(handle.id.as_str()).await {
            Ok(alive) => alive,
            Err(err) => {
                warn!("[TmuxBackend] Health check for {} failed: {err}", handle.id);
                false
            }
        }
    }

    async fn destroy_session_by_id(&self, id: &str) -> Result<(), SessionError> {
        let output = self.run_tmux(&["kill-session", "-t", id]).await?;
        if output.success() {
            info!("[TmuxBackend] Killed session {id}");
            return Ok(());
        }
        if is_already_gone(&output.stderr) {
            debug!("[TmuxBackend] Session {id} was already gone");
            return Ok(());
        }
        Err(SessionError::operation_failed(
            "kill-session",
            output.stderr.trim(),
        ))
    }

    async fn discover_orphan_sessions(
        &self,
        excluding: &HashSet<String>,
    ) -> Result<Vec<String>, SessionError> {
        let output = self
            .run_tmux(&["list-sessions", "-F", "#{session_name}"])
            .await?;
        if !output.success() {
            if is_already_gone(&output.stderr) {
                return Ok(Vec::new());
            }
            return Err(SessionError::operation_failed(
                "list-sessions",
                output.stderr.trim(),
            ));
        }

        Ok(filter_orphans(output.stdout.lines(), excluding))
    }

    fn attach_command(&self, handle: &SessionHandle) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = &self.socket_dir {
            parts.push("env".to_string());
            parts.push(format!("{SOCKET_DIR_ENV}={}", dir.to_string_lossy()));
        }
        parts.push(
            self.binary
                .as_ref()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_else(|| TMUX_COMMAND.to_string()),
        );
        parts.extend(self.base_args());
        parts.extend([
            "new-session".to_string(),
            "-A".to_string(),
            "-s".to_string(),
            handle.id.to_string(),
            "-c".to_string(),
            handle.working_directory.to_string_lossy().to_string(),
        ]);
        quote_command(&parts)
    }
}
