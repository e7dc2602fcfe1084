//! Constants and default values shared across mnpp.
//!
//! Timing values, file names and preference keys live here so the runner,
//! supervisor and control server agree on them.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Default configuration file name, looked up in the working directory and
/// then in the runtime config directory.
pub const CONFIG_FILE_NAME: &str = "mnpp.yaml";

/// Name of the preferences file stored in the state directory.
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

/// Lock file suffix guarding concurrent preference writers.
pub const PREFERENCES_LOCK_SUFFIX: &str = ".lock";

/// Unix socket the resident supervisor listens on.
pub const CONTROL_SOCKET_NAME: &str = "control.sock";

/// File recording the PID of the resident supervisor.
pub const SUPERVISOR_PID_FILE_NAME: &str = "mnpp.pid";

/// Root of the bundled MNPP installation used by the built-in layout.
pub const DEFAULT_INSTALL_ROOT: &str = "/Applications/MNPP";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between liveness checks while waiting on a child process.
pub const PROCESS_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Window after spawn during which an exit is treated as a launch failure.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Time a service gets to exit after SIGTERM before SIGKILL is sent.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the kernel to reap a process after SIGKILL.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the whole shutdown sequence.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// How long the control server waits for a connected client to send its command.
pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval of the background monitor that detects external termination.
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Preferences
// ============================================================================

/// Preference key selecting the PHP runtime variant.
pub const PHP_VERSION_KEY: &str = "phpVersion";

/// PHP variants shipped with the stack.
pub const PHP_VERSIONS: &[&str] = &["52", "53"];

/// PHP variant used when no preference has been saved.
pub const DEFAULT_PHP_VERSION: &str = "53";

/// Placeholder substituted with the resolved variant in executables and args.
pub const VARIANT_PLACEHOLDER: &str = "{variant}";
