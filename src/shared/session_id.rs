use super::stable_key::{StableKey, is_stable_key};
use crate::errors::SessionError;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

pub const SESSION_ID_PREFIX: &str = "pk";
pub const SEGMENT_SEPARATOR: &str = "--";
const KEY_SEGMENTS: usize = 3;

/// Name of an external multiplexer session owned by this application.
///
/// Values only come from [`SessionId::compute`] or [`SessionId::parse`], so a
/// `SessionId` is always `pk--<repo>--<worktree>--<pane>` with three 16-char
/// lowercase hex keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn compute(repo_key: &StableKey, worktree_key: &StableKey, pane_key: &StableKey) -> Self {
        SessionId(format!(
            "{SESSION_ID_PREFIX}{SEGMENT_SEPARATOR}{repo_key}{SEGMENT_SEPARATOR}{worktree_key}{SEGMENT_SEPARATOR}{pane_key}"
        ))
    }

    pub fn for_pane(repo_path: &Path, worktree_path: &Path, pane_id: Uuid) -> Self {
        Self::compute(
            &StableKey::for_path(repo_path),
            &StableKey::for_path(worktree_path),
            &pane_key(pane_id),
        )
    }

    pub fn parse(candidate: &str) -> Result<Self, SessionError> {
        if validate(candidate) {
            Ok(SessionId(candidate.to_string()))
        } else {
            Err(SessionError::InvalidIdentity {
                session_id: candidate.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn pane_key(pane_id: Uuid) -> StableKey {
    StableKey::for_str(&pane_id.hyphenated().to_string())
}

pub fn validate(candidate: &str) -> bool {
    let Some(rest) = candidate
        .strip_prefix(SESSION_ID_PREFIX)
        .and_then(|rest| rest.strip_prefix(SEGMENT_SEPARATOR))
    else {
        return false;
    };

    let segments: Vec<&str> = rest.split(SEGMENT_SEPARATOR).collect();
    segments.len() == KEY_SEGMENTS && segments.iter().all(|segment| is_stable_key(segment))
}

/// Whether a session name follows this application's naming convention, valid or not.
pub fn has_app_prefix(name: &str) -> bool {
    name.strip_prefix(SESSION_ID_PREFIX)
        .is_some_and(|rest| rest.starts_with(SEGMENT_SEPARATOR))
}
