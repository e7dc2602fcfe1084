//! Human-readable rendering of service status and batch reports.
use chrono::{DateTime, Utc};

use crate::supervisor::{BatchReport, ServiceState, ServiceStatus, TransitionOutcome};

const GREEN_BOLD: &str = "\x1b[1;32m"; // Bright Green
const RED_BOLD: &str = "\x1b[1;31m"; // Bright Red
const YELLOW_BOLD: &str = "\x1b[1;33m"; // Yellow/Gold
const RESET: &str = "\x1b[0m"; // Reset color

fn state_color(state: &ServiceState) -> &'static str {
    match state {
        ServiceState::Running => GREEN_BOLD,
        ServiceState::Failed(_) => RED_BOLD,
        ServiceState::Starting | ServiceState::Stopping => YELLOW_BOLD,
        ServiceState::Stopped => "",
    }
}

fn outcome_color(outcome: &TransitionOutcome) -> &'static str {
    match outcome {
        TransitionOutcome::Started | TransitionOutcome::Stopped => GREEN_BOLD,
        TransitionOutcome::AlreadyRunning | TransitionOutcome::AlreadyStopped => YELLOW_BOLD,
        TransitionOutcome::Failed(_) => RED_BOLD,
    }
}

fn paint(color: &str, text: &str, colored: bool) -> String {
    if colored && !color.is_empty() {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Formats the time since `started_at` relative to `now`.
pub fn format_uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total_seconds = now
        .signed_duration_since(started_at)
        .to_std()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    format_elapsed(total_seconds)
}

fn format_elapsed(total_seconds: u64) -> String {
    match total_seconds {
        0..=59 => format!("{total_seconds}s"),
        60..=3_599 => format!("{}m {}s", total_seconds / 60, total_seconds % 60),
        3_600..=86_399 => format!(
            "{}h {}m",
            total_seconds / 3_600,
            (total_seconds % 3_600) / 60
        ),
        _ => format!(
            "{}d {}h",
            total_seconds / 86_400,
            (total_seconds % 86_400) / 3_600
        ),
    }
}

/// Renders a status table. Column widths adapt to the longest service name.
pub fn render_table(entries: &[ServiceStatus], now: DateTime<Utc>, colored: bool) -> String {
    if entries.is_empty() {
        return "No managed services.\n".to_string();
    }

    let name_width = entries
        .iter()
        .map(|entry| entry.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!(
        "{:<name_width$}  {:<10}  {:<8}  {:<7}  {}\n",
        "NAME", "STATE", "PID", "VARIANT", "UPTIME"
    );

    for entry in entries {
        let state_label = match &entry.state {
            ServiceState::Failed(_) => "failed".to_string(),
            other => other.to_string(),
        };
        let state_cell = paint(
            state_color(&entry.state),
            &format!("{state_label:<10}"),
            colored,
        );
        let pid = entry.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".into());
        let variant = entry.variant.as_deref().unwrap_or("-");
        let uptime = match (&entry.state, entry.started_at) {
            (ServiceState::Running, Some(started_at)) => format_uptime(started_at, now),
            _ => "-".to_string(),
        };

        out.push_str(&format!(
            "{:<name_width$}  {state_cell}  {pid:<8}  {variant:<7}  {uptime}\n",
            entry.name
        ));

        if let ServiceState::Failed(reason) = &entry.state {
            out.push_str(&format!("{:<name_width$}  └─ {reason}\n", ""));
        }
    }

    out
}

/// Renders one line per service outcome.
pub fn render_report(report: &BatchReport, colored: bool) -> String {
    if report.outcomes.is_empty() {
        return "No managed services.\n".to_string();
    }

    report
        .outcomes
        .iter()
        .map(|entry| {
            format!(
                "● {} - {}\n",
                entry.service,
                paint(outcome_color(&entry.outcome), &entry.outcome.to_string(), colored)
            )
        })
        .collect()
}

/// Status entries for services of a configuration when no supervisor is running.
pub fn offline_entries<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<ServiceStatus> {
    names
        .into_iter()
        .map(|name| ServiceStatus {
            name: name.to_string(),
            state: ServiceState::Stopped,
            pid: None,
            variant: None,
            started_at: None,
        })
        .collect()
}
