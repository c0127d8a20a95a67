pub mod binary_utils;
pub mod env_adapter;
pub mod path_utils;
