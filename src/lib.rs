pub mod domains;
pub mod errors;
pub mod infrastructure;
pub mod shared;
pub mod utils;

pub use domains::sessions::{SessionBackend, SessionHandle, SessionRegistry, SessionStatus};
pub use domains::settings::{KeeperSettings, SettingsService};
pub use errors::SessionError;
pub use shared::session_id::SessionId;
pub use shared::stable_key::StableKey;
