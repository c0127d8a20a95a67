pub mod session_id;
pub mod stable_key;
