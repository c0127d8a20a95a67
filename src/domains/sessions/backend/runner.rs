use crate::errors::SessionError;
use async_trait::async_trait;
use log::{debug, warn};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// One subprocess invocation. `env` is applied on top of the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug)]
pub enum RunError {
    NotFound,
    TimedOut(Duration),
    Io(io::Error),
}

impl RunError {
    pub fn into_session_error(self, request: &CommandRequest) -> SessionError {
        match self {
            RunError::TimedOut(duration) => SessionError::TimedOut {
                command: request.display(),
                seconds: duration.as_secs(),
            },
            RunError::NotFound => SessionError::operation_failed(
                "spawn",
                format!("{} not found", request.program.display()),
            ),
            RunError::Io(err) => SessionError::operation_failed("spawn", err),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunError>;
}

pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                RunError::NotFound
            } else {
                RunError::Io(err)
            }
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                debug!(
                    "Command `{}` exited with {:?} (stdout_len={}, stderr_len={})",
                    request.display(),
                    result.status,
                    result.stdout.len(),
                    result.stderr.len()
                );
                Ok(result)
            }
            Ok(Err(err)) => Err(RunError::Io(err)),
            Err(_) => {
                warn!(
                    "Command `{}` timed out after {}s and was killed",
                    request.display(),
                    request.timeout.as_secs()
                );
                Err(RunError::TimedOut(request.timeout))
            }
        }
    }
}

/// Scripted runner: answers from a queue and records every request.
#[cfg(test)]
#[derive(Default, Clone)]
pub(crate) struct MockRunner {
    calls: std::sync::Arc<std::sync::Mutex<Vec<CommandRequest>>>,
    responses: std::sync::Arc<
        std::sync::Mutex<std::collections::VecDeque<Result<CommandOutput, RunError>>>,
    >,
}

#[cfg(test)]
impl MockRunner {
    pub(crate) fn push_response(&self, response: Result<CommandOutput, RunError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, RunError> {
        self.calls.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("no response configured")
    }
}
