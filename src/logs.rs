//! Capture and display of service output.
use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
    thread,
};

use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::{error::LogsManagerError, runtime};

/// Which output stream of a service a log file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
}

/// Path of the log file for `service`'s `kind` stream.
pub fn resolve_log_path(service: &str, kind: LogKind) -> PathBuf {
    runtime::log_dir().join(format!("{service}_{}.log", kind.as_ref()))
}

fn open_log_sink(service: &str, kind: LogKind, path: &Path) -> Box<dyn Write + Send> {
    if let Some(dir) = path.parent()
        && let Err(err) = fs::create_dir_all(dir)
    {
        warn!("Failed to create log directory for '{service}': {err}; discarding {kind} output");
        return Box::new(io::sink());
    }

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Box::new(file),
        Err(err) => {
            warn!("Failed to open {kind} log for '{service}': {err}; discarding output");
            Box::new(io::sink())
        }
    }
}

/// Copies output from `reader` into the service's log file on a background
/// thread until the stream closes.
///
/// Bytes are copied unchanged and the pipe is drained to EOF even when the
/// log cannot be written, so the service never sees a closed pipe.
pub fn spawn_log_writer<R>(service: &str, reader: R, kind: LogKind)
where
    R: Read + Send + 'static,
{
    let path = resolve_log_path(service, kind);
    let service = service.to_string();

    thread::spawn(move || {
        let mut sink = open_log_sink(&service, kind, &path);
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(err) = sink.write_all(&line) {
                        warn!("Failed to write {kind} log for '{service}': {err}; discarding output");
                        sink = Box::new(io::sink());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Failed to read {kind} stream of '{service}': {err}");
                    break;
                }
            }
        }

        debug!("{kind} stream for '{service}' closed");
    });
}

/// Returns the last `lines` lines of a service's log.
pub fn tail_log(
    service: &str,
    kind: LogKind,
    lines: usize,
) -> Result<Vec<String>, LogsManagerError> {
    let path = resolve_log_path(service, kind);
    if !path.exists() {
        return Err(LogsManagerError::LogUnavailable {
            service: service.to_string(),
            kind: kind.to_string(),
        });
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut tail = VecDeque::with_capacity(lines.min(1024));
    let mut buf = Vec::new();
    while lines > 0 && reader.read_until(b'\n', &mut buf)? > 0 {
        if tail.len() == lines {
            tail.pop_front();
        }
        let text = String::from_utf8_lossy(&buf);
        tail.push_back(text.trim_end_matches(['\n', '\r']).to_string());
        buf.clear();
    }
    Ok(tail.into())
}

/// Prints the last `lines` lines of a service's log to stdout.
pub fn show_logs(service: &str, kind: LogKind, lines: usize) -> Result<(), LogsManagerError> {
    for line in tail_log(service, kind, lines)? {
        println!("{line}");
    }
    Ok(())
}
