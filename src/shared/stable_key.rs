use crate::utils::path_utils::resolve_identity_path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

pub const STABLE_KEY_BYTES: usize = 8;
pub const STABLE_KEY_LEN: usize = STABLE_KEY_BYTES * 2;

/// Short deterministic key derived from a canonical path or a pane id.
///
/// Keys survive database id churn: the same resolved path always yields the
/// same key, no matter which UUID the workspace layer currently assigns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableKey(String);

impl StableKey {
    pub fn for_path(path: &Path) -> Self {
        let resolved = resolve_identity_path(path);
        Self::for_str(&resolved.to_string_lossy())
    }

    pub fn for_str(value: &str) -> Self {
        let digest = Sha256::digest(value.as_bytes());
        let hex = digest[..STABLE_KEY_BYTES]
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        StableKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_stable_key(candidate: &str) -> bool {
    candidate.len() == STABLE_KEY_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
