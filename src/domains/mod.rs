pub mod sessions;
pub mod settings;
