use std::sync::{Mutex, OnceLock};

/// Global lock for environment and runtime-path modifications in tests.
/// Tests that touch HOME or `runtime::init*` should hold this lock so parallel
/// test threads do not observe each other's directories.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
