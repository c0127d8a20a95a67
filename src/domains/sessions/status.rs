use super::state_machine::{MachineDefinition, StateMachine, Transition};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum SessionStatus {
    Unknown,
    Verifying,
    Alive,
    Dead,
    Recovering,
    Failed(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unknown => "unknown",
            SessionStatus::Verifying => "verifying",
            SessionStatus::Alive => "alive",
            SessionStatus::Dead => "dead",
            SessionStatus::Recovering => "recovering",
            SessionStatus::Failed(_) => "failed",
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, SessionStatus::Alive)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Create,
    Verify,
    SocketFound,
    SocketMissing,
    SessionDetected,
    SessionNotDetected,
    HealthCheckFailed,
    AttemptRecovery,
    RecoverySucceeded,
    RecoveryFailed(String),
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEffect {
    CheckSocket,
    CheckSessionExists,
    CreateSession,
    DestroySession,
    ScheduleHealthCheck,
    CancelHealthCheck,
    AttemptRecovery,
    NotifyAlive,
    NotifyDead,
    NotifyFailed(String),
}

pub struct SessionStatusMachine;

pub type SessionMachine = StateMachine<SessionStatusMachine>;

impl MachineDefinition for SessionStatusMachine {
    type State = SessionStatus;
    type Event = StatusEvent;
    type Effect = StatusEffect;

    fn transition(
        state: &SessionStatus,
        event: &StatusEvent,
    ) -> Option<Transition<SessionStatus, StatusEffect>> {
        use SessionStatus as S;
        use StatusEffect as F;
        use StatusEvent as E;

        let transition = match (state, event) {
            (S::Unknown, E::Create) => Transition::with(S::Verifying, vec![F::CreateSession]),
            (S::Unknown | S::Dead, E::Verify) => {
                Transition::with(S::Verifying, vec![F::CheckSocket])
            }
            (S::Verifying, E::SocketFound) => {
                Transition::with(S::Verifying, vec![F::CheckSessionExists])
            }
            (S::Verifying, E::SocketMissing | E::SessionNotDetected) => {
                Transition::with(S::Dead, vec![F::NotifyDead])
            }
            (S::Verifying, E::SessionDetected) | (S::Recovering, E::RecoverySucceeded) => {
                Transition::with(S::Alive, vec![F::ScheduleHealthCheck, F::NotifyAlive])
            }
            (S::Alive, E::HealthCheckFailed) => {
                Transition::with(S::Dead, vec![F::CancelHealthCheck, F::NotifyDead])
            }
            (S::Dead | S::Failed(_), E::AttemptRecovery) => {
                Transition::with(S::Recovering, vec![F::AttemptRecovery])
            }
            (S::Recovering, E::RecoveryFailed(reason)) => Transition::with(
                S::Failed(reason.clone()),
                vec![F::NotifyFailed(reason.clone())],
            ),
            (S::Alive | S::Dead | S::Failed(_), E::Destroy) => Transition::with(
                S::Unknown,
                vec![F::CancelHealthCheck, F::DestroySession],
            ),
            _ => return None,
        };
        Some(transition)
    }
}

pub fn new_session_machine(initial: SessionStatus, max_queue_depth: usize) -> SessionMachine {
    StateMachine::with_max_queue_depth(initial, max_queue_depth)
}
