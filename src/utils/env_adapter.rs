use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serialized access to process environment mutation (unsafe under edition 2024).
pub struct EnvAdapter;

impl EnvAdapter {
    pub fn set_var(key: &str, value: &str) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        unsafe {
            std::env::set_var(key, value);
        }
    }

    pub fn remove_var(key: &str) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        unsafe {
            std::env::remove_var(key);
        }
    }

    /// Set `key` until the returned guard drops, then restore the previous value.
    pub fn scoped(key: &str, value: &str) -> ScopedVar {
        let previous = std::env::var(key).ok();
        Self::set_var(key, value);
        ScopedVar {
            key: key.to_string(),
            previous,
        }
    }
}

pub struct ScopedVar {
    key: String,
    previous: Option<String>,
}

impl Drop for ScopedVar {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => EnvAdapter::set_var(&self.key, value),
            None => EnvAdapter::remove_var(&self.key),
        }
    }
}
