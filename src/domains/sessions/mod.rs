pub mod actions;
pub mod backend;
pub mod checkpoint;
pub mod registry;
pub mod restore;
pub mod state_machine;
pub mod status;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::{ActionOutcome, ActionRouter, SurfaceAction};
pub use backend::{BackendKind, SessionBackend, SessionHandle, build_backend};
pub use checkpoint::{Checkpoint, CheckpointEntry, CheckpointStore, LoadOutcome};
pub use registry::{RegistryEntry, SessionRegistry, SessionSnapshot};
pub use restore::{RestoreReport, RestoreSource};
pub use status::{SessionStatus, StatusEffect, StatusEvent};
pub use workspace::{InMemoryWorkspace, RepoRef, WorkspaceLookup, WorktreeRef};
