//! Command-line interface for mnpp.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::logs::LogKind;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for mnpp.
#[derive(Parser)]
#[command(name = "mnpp", version, author)]
#[command(about = "Supervises a local nginx, MySQL and PHP-FPM stack", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the configuration file (defaults to `mnpp.yaml`, then the
    /// per-user config directory, then the built-in layout).
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mnpp.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the resident supervisor in the foreground.
    Run {
        /// Do not start every service on launch.
        #[arg(long)]
        no_autostart: bool,
    },

    /// Start one service, or all of them, through the running supervisor.
    Start {
        /// Name of the service to start (optional).
        service: Option<String>,
    },

    /// Stop one service, or all of them, through the running supervisor.
    Stop {
        /// Name of the service to stop (optional).
        service: Option<String>,
    },

    /// Show the status of the managed services.
    Status {
        /// Optionally specify a service name to check its status.
        service: Option<String>,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output.
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// Show logs for a specific service.
    Logs {
        /// The name of the service whose logs should be displayed.
        service: String,

        /// Number of lines to show (default: 50).
        #[arg(short, long, default_value = "50")]
        lines: usize,

        /// Kind of logs to show: stdout or stderr (default: stderr).
        #[arg(short = 'k', long, default_value_t = LogKind::default())]
        kind: LogKind,
    },

    /// Read or change persisted preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Stop every service and shut the supervisor down.
    Exit,
}

/// Preference sub-commands.
#[derive(Subcommand)]
pub enum PrefsAction {
    /// Print the current value of a preference.
    Get {
        /// Preference key, e.g. `phpVersion`.
        key: String,
    },
    /// Validate and store a new value.
    Set {
        /// Preference key, e.g. `phpVersion`.
        key: String,
        /// New value, e.g. `52`.
        value: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
