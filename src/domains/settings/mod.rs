pub mod service;
pub mod types;

pub use service::SettingsService;
pub use types::*;
