use super::runner::{CommandRequest, CommandRunner, SystemCommandRunner};
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

const ZMX_COMMAND: &str = "zmx";
const SOCKET_DIR_ENV: &str = "ZMX_DIR";

/// Backend for multiplexers that create a session the first time a client
/// attaches. Creation is a pure computation; the terminal surface running
/// `attach_command` brings the session into existence.
pub struct AutoAttachBackend<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    binary: Option<PathBuf>,
    socket_dir: Option<PathBuf>,
    timeout: Duration,
}

impl AutoAttachBackend<SystemCommandRunner> {
    pub fn from_settings(settings: &KeeperSettings) -> Self {
        let binary = resolve_binary(ZMX_COMMAND, settings.zmx.binary.as_deref());
        if binary.is_none() {
            debug!("[AutoAttachBackend] zmx binary not found");
        }
        Self {
            runner: SystemCommandRunner,
            binary,
            socket_dir: settings.socket_dir.clone(),
            timeout: settings.command_timeout(),
        }
    }
}

impl<R: CommandRunner> AutoAttachBackend<R> {
    pub fn with_runner(runner: R, binary: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            binary: Some(binary.into()),
            socket_dir: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    fn request(&self, args: &[&str]) -> Result<CommandRequest, SessionError> {
        let Some(program) = &self.binary else {
            return Err(SessionError::BackendUnavailable {
                backend: BackendKind::Zmx.to_string(),
            });
        };
        Ok(CommandRequest {
            program: program.clone(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            env: self
                .socket_dir
                .iter()
                .map(|dir| (SOCKET_DIR_ENV.to_string(), dir.to_string_lossy().to_string()))
                .collect(),
            timeout: self.timeout,
        })
    }

    async fn list_sessions(&self) -> Result<Vec<String>, SessionError> {
        let request = self.request(&["list"])?;
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|err| err.into_session_error(&request))?;
        if !output.success() {
            return Err(SessionError::operation_failed("list", output.stderr.trim()));
        }
        Ok(output
            .stdout
            .lines()
            .filter_map(parse_list_line)
            .collect())
    }

    async fn is_listed(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.list_sessions().await?.iter().any(|name| name == id))
    }
}

/// `zmx list` prints one session per line, either bare or as
/// `session_name=<name>` followed by tab separated attributes.
fn parse_list_line(line: &str) -> Option<String> {
    let first = line.split_whitespace().next()?;
    let name = first
        .strip_prefix("session_name=")
        .or_else(|| first.strip_prefix("name="))
        .unwrap_or(first);
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl<R: CommandRunner> SessionBackend for AutoAttachBackend<R> {
    fn kind(&self) -> BackendKind {
        BackendKind::Zmx
    }

    fn creates_on_attach(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    fn socket_exists(&self) -> bool {
        match &self.socket_dir {
            Some(dir) => dir.is_dir(),
            None => self.binary.is_some(),
        }
    }

    async fn create_pane_session(
        &self,
        repo: &RepoRef,
        worktree: &WorktreeRef,
        pane_id: Uuid,
    ) -> Result<SessionHandle, SessionError> {
        let handle = SessionHandle::for_pane(repo, worktree, pane_id);
        debug!(
            "[AutoAttachBackend] Prepared session {} (created on attach)",
            handle.id
        );
        Ok(handle)
    }

    async fn session_exists(&self, handle: &SessionHandle) -> bool {
        match self.is_listed(handle.id.as_str()).await {
            Ok(listed) => listed,
            Err(err) => {
                debug!("[AutoAttachBackend] list failed for {}: {err}", handle.id);
                false
            }
        }
    }

    async fn health_check(&self, handle: &SessionHandle) -> bool {
        match self.is_listed(handle.id.as_str()).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(
                    "[AutoAttachBackend] Health check for {} failed: {err}",
                    handle.id
                );
                false
            }
        }
    }

    async fn destroy_session_by_id(&self, id: &str) -> Result<(), SessionError> {
        let request = self.request(&["kill", id])?;
        let output = self
            .runner
            .run(&request)
            .await
            .map_err(|err| err.into_session_error(&request))?;
        if output.success() {
            info!("[AutoAttachBackend] Killed session {id}");
            return Ok(());
        }
        let stderr = output.stderr.to_ascii_lowercase();
        if stderr.contains("not found") || stderr.contains("no such session") {
            debug!("[AutoAttachBackend] Session {id} was already gone");
            return Ok(());
        }
        Err(SessionError::operation_failed("kill", output.stderr.trim()))
    }

    async fn discover_orphan_sessions(
        &self,
        excluding: &HashSet<String>,
    ) -> Result<Vec<String>, SessionError> {
        let names = self.list_sessions().await?;
        Ok(filter_orphans(names.iter().map(String::as_str), excluding))
    }

    fn attach_command(&self, handle: &SessionHandle) -> String {
        let mut attach = Vec::new();
        if let Some(dir) = &self.socket_dir {
            attach.push("env".to_string());
            attach.push(format!("{SOCKET_DIR_ENV}={}", dir.to_string_lossy()));
        }
        attach.push(
            self.binary
                .as_ref()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_else(|| ZMX_COMMAND.to_string()),
        );
        attach.push("attach".to_string());
        attach.push(handle.id.to_string());

        let cd = quote_command(&[
            "cd".to_string(),
            handle.working_directory.to_string_lossy().to_string(),
        ]);
        format!("{cd} && {}", quote_command(&attach))
    }
}

#[cfg(test)]
mod tests {
    use super::super::runner::{CommandOutput, MockRunner, RunError};
    use super::*;

    fn handle() -> SessionHandle {
        let repo = RepoRef::new(Uuid::from_u128(1), "/projects/beta");
        let worktree = WorktreeRef::new(Uuid::from_u128(2), repo.id, "/projects/beta feature");
        SessionHandle::for_pane(&repo, &worktree, Uuid::from_u128(3))
    }

    #[tokio::test]
    async fn create_runs_no_command() {
        let runner = MockRunner::default();
        let zmx = AutoAttachBackend::with_runner(runner.clone(), "/usr/local/bin/zmx");
        let repo = RepoRef::new(Uuid::from_u128(1), "/projects/beta");
        let worktree = WorktreeRef::new(Uuid::from_u128(2), repo.id, "/projects/beta");

        let created = zmx
            .create_pane_session(&repo, &worktree, Uuid::from_u128(3))
            .await
            .unwrap();

        assert!(runner.calls().is_empty());
        assert!(zmx.creates_on_attach());
        assert_eq!(created.working_directory, PathBuf::from("/projects/beta"));
    }

    #[tokio::test]
    async fn health_check_looks_for_the_session_in_list_output() {
        let runner = MockRunner::default();
        let handle = handle();
        runner.push_response(Ok(CommandOutput::ok(format!(
            "session_name={}\tpid=42\tclients=1\nsession_name=other\n",
            handle.id
        ))));
        runner.push_response(Ok(CommandOutput::ok("session_name=other\n")));
        runner.push_response(Err(RunError::TimedOut(Duration::from_secs(5))));
        let zmx = AutoAttachBackend::with_runner(runner.clone(), "/usr/local/bin/zmx")
            .with_socket_dir("/run/zmx");

        assert!(zmx.health_check(&handle).await);
        assert!(!zmx.health_check(&handle).await);
        assert!(!zmx.session_exists(&handle).await);

        let calls = runner.calls();
        assert_eq!(calls[0].args, vec!["list"]);
        assert_eq!(
            calls[0].env,
            vec![("ZMX_DIR".to_string(), "/run/zmx".to_string())]
        );
    }

    #[tokio::test]
    async fn destroy_kills_by_name_and_tolerates_missing() {
        let runner = MockRunner::default();
        runner.push_response(Ok(CommandOutput::ok("")));
        runner.push_response(Ok(CommandOutput::failed(1, "session not found")));
        let zmx = AutoAttachBackend::with_runner(runner.clone(), "/usr/local/bin/zmx");

        assert!(zmx.destroy_session_by_id("pk--x").await.is_ok());
        assert!(zmx.destroy_session_by_id("pk--x").await.is_ok());
        assert_eq!(runner.calls()[0].args, vec!["kill", "pk--x"]);
    }

    #[tokio::test]
    async fn discovers_orphans_from_list() {
        let runner = MockRunner::default();
        runner.push_response(Ok(CommandOutput::ok("pk--A\npk--B\tpid=1\nuser-other\n")));
        let zmx = AutoAttachBackend::with_runner(runner, "/usr/local/bin/zmx");
        let excluding: HashSet<String> = ["pk--A".to_string()].into_iter().collect();

        assert_eq!(
            zmx.discover_orphan_sessions(&excluding).await.unwrap(),
            vec!["pk--B".to_string()]
        );
    }

    #[test]
    fn attach_command_changes_directory_first() {
        let zmx = AutoAttachBackend::with_runner(MockRunner::default(), "/usr/local/bin/zmx")
            .with_socket_dir("/run/zmx");
        let handle = handle();

        let line = zmx.attach_command(&handle);
        let words = shell_words::split(&line).unwrap();
        assert_eq!(
            words,
            vec![
                "cd",
                "/projects/beta feature",
                "&&",
                "env",
                "ZMX_DIR=/run/zmx",
                "/usr/local/bin/zmx",
                "attach",
                handle.id.as_str(),
            ]
        );
    }

    #[test]
    fn parses_bare_and_keyed_list_lines() {
        assert_eq!(parse_list_line("pk--a"), Some("pk--a".to_string()));
        assert_eq!(
            parse_list_line("session_name=pk--b\tpid=3"),
            Some("pk--b".to_string())
        );
        assert_eq!(parse_list_line("   "), None);
    }
}
