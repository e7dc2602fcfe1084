//! Error handling for mnpp.
use std::time::Duration;

use thiserror::Error;

/// Defines all possible errors raised by the registry, runners and supervisor.
#[derive(Debug, Error)]
pub enum ProcessManagerError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Configuration parsed but describes something unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A service name was looked up that the registry does not know.
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    /// A descriptor was registered under a name that is already taken.
    #[error("Service '{0}' is already registered")]
    DuplicateName(String),

    /// The runner already owns a live process for this service.
    #[error("Service '{0}' already has a live process")]
    AlreadyRunning(String),

    /// Error spawning a service process, or the process died during startup.
    #[error("Failed to launch service '{service}': {reason}")]
    LaunchError {
        /// The service that failed to launch.
        service: String,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The process survived both graceful and forced termination.
    #[error("Service '{service}' did not exit within {timeout:?} after SIGKILL")]
    StopTimeoutError {
        /// The service that could not be reaped.
        service: String,
        /// How long the forced-termination phase waited.
        timeout: Duration,
    },

    /// Error signalling a service process.
    #[error("Failed to stop service '{service}': {source}")]
    ServiceStopError {
        /// The service name that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The supervisor has been shut down and refuses new work.
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),

    /// Error from the preference store while resolving a variant.
    #[error("Preference error: {0}")]
    PreferenceError(#[from] PreferenceError),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ProcessManagerError`.
impl<T> From<std::sync::PoisonError<T>> for ProcessManagerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ProcessManagerError::MutexPoisonError(err.to_string())
    }
}

/// Error type for preference store operations.
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// The key is not one the store knows how to validate.
    #[error("Unknown preference key '{0}'")]
    UnknownKey(String),

    /// The value is outside the key's legal set.
    #[error("Invalid value '{value}' for preference '{key}' (expected one of: {expected})")]
    InvalidValue {
        /// The preference key.
        key: String,
        /// The rejected value.
        value: String,
        /// Comma separated list of accepted values.
        expected: String,
    },

    /// The backing store could not be written.
    #[error("Failed to persist preferences: {0}")]
    PersistError(#[source] std::io::Error),

    /// The backing store could not be read.
    #[error("Failed to read preferences: {0}")]
    ReadError(#[from] std::io::Error),

    /// The backing store holds malformed JSON.
    #[error("Failed to parse preferences: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

impl<T> From<std::sync::PoisonError<T>> for PreferenceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PreferenceError::MutexPoisonError(err.to_string())
    }
}

/// Error type for log file operations.
#[derive(Debug, Error)]
pub enum LogsManagerError {
    /// No log file exists for the requested service.
    #[error("No {kind} log found for service '{service}'")]
    LogUnavailable {
        /// The service whose log was requested.
        service: String,
        /// Which stream was requested.
        kind: String,
    },

    /// Error while reading a log file.
    #[error("Log read failed: {0}")]
    LogReadError(#[from] std::io::Error),
}
