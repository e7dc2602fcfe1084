//! Runtime paths for state, logs and configuration.
use std::{
    env,
    path::{Path, PathBuf},
    sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Clone)]
struct RuntimeContext {
    state_dir: PathBuf,
    log_dir: PathBuf,
    config_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| RwLock::new(RuntimeContext::from_env()))
}

fn read_context() -> RwLockReadGuard<'static, RuntimeContext> {
    context_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_context() -> RwLockWriteGuard<'static, RuntimeContext> {
    context_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RuntimeContext {
    fn from_env() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::from_home(&home)
    }

    fn from_home(home: &Path) -> Self {
        let state_dir = home.join(".local/share/mnpp");
        let log_dir = state_dir.join("logs");
        let config_dir = home.join(".config/mnpp");

        Self {
            state_dir,
            log_dir,
            config_dir,
        }
    }
}

/// Re-reads `$HOME` and recomputes every runtime path.
pub fn init() {
    *write_context() = RuntimeContext::from_env();
}

/// Points every runtime path below `home`.
pub fn init_with_home(home: &Path) {
    *write_context() = RuntimeContext::from_home(home);
}

/// State dir (preferences, control socket, supervisor PID).
pub fn state_dir() -> PathBuf {
    read_context().state_dir.clone()
}

/// Directory holding captured service output.
pub fn log_dir() -> PathBuf {
    read_context().log_dir.clone()
}

/// Directory searched for `mnpp.yaml` when no config path is given.
pub fn config_dir() -> PathBuf {
    read_context().config_dir.clone()
}
