//! mnpp supervises a local web development stack (nginx, MySQL and PHP-FPM)
//! as a set of named services. It starts, stops and tracks each service as its
//! own process group, persists the user's PHP version preference, and exposes
//! a small CLI that talks to a resident supervisor over a Unix socket.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants.
pub mod constants;

/// Error handling.
pub mod error;

/// IPC helpers for communicating with the resident supervisor.
pub mod ipc;

/// Logs management.
pub mod logs;

/// Persisted preferences.
pub mod preferences;

/// Service descriptors and the registry.
pub mod registry;

/// Child process control.
pub mod runner;

/// Runtime directory resolution.
pub mod runtime;

/// Resident control server.
pub mod server;

/// Status rendering.
pub mod status;

/// Service supervisor.
pub mod supervisor;

#[doc(hidden)]
pub mod test_utils;
