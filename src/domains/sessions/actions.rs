use super::backend::SessionHandle;
use super::registry::SessionRegistry;
use super::status::SessionStatus;
use super::workspace::{RepoRef, WorktreeRef};
use crate::errors::SessionError;
use crate::shared::session_id::SessionId;
use log::debug;
use uuid::Uuid;

/// Signals coming from the terminal surface.
#[derive(Debug, Clone)]
pub enum SurfaceAction {
    CreateSession {
        repo: RepoRef,
        worktree: WorktreeRef,
        pane_id: Uuid,
    },
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    Focus {
        session_id: SessionId,
    },
    ProcessExited {
        session_id: SessionId,
        exit_code: Option<i32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Created {
        handle: SessionHandle,
        attach_command: String,
    },
    Status(SessionStatus),
    Ignored,
}

#[derive(Clone)]
pub struct ActionRouter {
    registry: SessionRegistry,
}

impl ActionRouter {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, action: SurfaceAction) -> Result<ActionOutcome, SessionError> {
        match action {
            SurfaceAction::CreateSession {
                repo,
                worktree,
                pane_id,
            } => {
                let handle = self
                    .registry
                    .get_or_create_pane_session(&worktree, &repo, pane_id)
                    .await?;
                let attach_command = self.registry.backend().attach_command(&handle);
                Ok(ActionOutcome::Created {
                    handle,
                    attach_command,
                })
            }
            SurfaceAction::Resize {
                session_id,
                cols,
                rows,
            } => {
                // The multiplexer follows the attached client's size.
                debug!("Resize of {session_id} to {cols}x{rows} needs no session work");
                Ok(ActionOutcome::Ignored)
            }
            SurfaceAction::Focus { session_id } => {
                let status = self.registry.status(&session_id).await.ok_or_else(|| {
                    SessionError::SessionNotFound {
                        session_id: session_id.to_string(),
                    }
                })?;
                match status {
                    SessionStatus::Dead | SessionStatus::Failed(_) => self
                        .registry
                        .retry_session(&session_id)
                        .await
                        .map(ActionOutcome::Status),
                    _ => Ok(ActionOutcome::Ignored),
                }
            }
            SurfaceAction::ProcessExited {
                session_id,
                exit_code,
            } => {
                debug!("Process in {session_id} exited with {exit_code:?}");
                self.registry
                    .report_process_exited(&session_id)
                    .await
                    .map(ActionOutcome::Status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::sessions::test_support::{Fixture, MockBackend};
    use crate::domains::settings::KeeperSettings;
    use crate::infrastructure::events::RecordingEventSink;
    use std::sync::Arc;

    fn router(backend: &Arc<MockBackend>, settings: KeeperSettings) -> ActionRouter {
        ActionRouter::new(SessionRegistry::new(
            backend.clone(),
            settings,
            Arc::new(RecordingEventSink::new()),
        ))
    }

    #[tokio::test]
    async fn create_returns_handle_and_attach_command() {
        let fx = Fixture::new();
        let backend = Arc::new(MockBackend::new());
        let router = router(&backend, fx.settings());

        let outcome = router
            .dispatch(SurfaceAction::CreateSession {
                repo: fx.repo.clone(),
                worktree: fx.worktree.clone(),
                pane_id: Uuid::from_u128(7),
            })
            .await
            .unwrap();

        let ActionOutcome::Created {
            handle,
            attach_command,
        } = outcome
        else {
            panic!("expected created outcome");
        };
        assert_eq!(attach_command, format!("mock attach {}", handle.id));
    }

    #[tokio::test]
    async fn resize_is_ignored() {
        let fx = Fixture::new();
        let backend = Arc::new(MockBackend::new());
        let router = router(&backend, fx.settings());
        let id = SessionId::for_pane(&fx.repo.path, &fx.worktree.path, Uuid::from_u128(7));

        let outcome = router
            .dispatch(SurfaceAction::Resize {
                session_id: id,
                cols: 120,
                rows: 40,
            })
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Ignored);
    }

    #[tokio::test]
    async fn exit_then_focus_retries_dead_session() {
        let fx = Fixture::new();
        let backend = Arc::new(MockBackend::new());
        let settings = KeeperSettings {
            auto_recover: false,
            ..fx.settings()
        };
        let router = router(&backend, settings);
        let ActionOutcome::Created { handle, .. } = router
            .dispatch(SurfaceAction::CreateSession {
                repo: fx.repo.clone(),
                worktree: fx.worktree.clone(),
                pane_id: Uuid::from_u128(7),
            })
            .await
            .unwrap()
        else {
            panic!("expected created outcome");
        };

        let exited = router
            .dispatch(SurfaceAction::ProcessExited {
                session_id: handle.id.clone(),
                exit_code: Some(0),
            })
            .await
            .unwrap();
        assert_eq!(exited, ActionOutcome::Status(SessionStatus::Dead));

        let focused = router
            .dispatch(SurfaceAction::Focus {
                session_id: handle.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(focused, ActionOutcome::Status(SessionStatus::Alive));

        let focused_again = router
            .dispatch(SurfaceAction::Focus {
                session_id: handle.id,
            })
            .await
            .unwrap();
        assert_eq!(focused_again, ActionOutcome::Ignored);
    }

    #[tokio::test]
    async fn focus_on_unknown_session_is_not_found() {
        let fx = Fixture::new();
        let backend = Arc::new(MockBackend::new());
        let router = router(&backend, fx.settings());
        let id = SessionId::for_pane(&fx.repo.path, &fx.worktree.path, Uuid::from_u128(9));

        assert!(matches!(
            router.dispatch(SurfaceAction::Focus { session_id: id }).await,
            Err(SessionError::SessionNotFound { .. })
        ));
    }
}
