//! Launching, stopping and polling of a single service process.
use std::{
    fmt,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{FORCE_KILL_TIMEOUT, PROCESS_CHECK_INTERVAL},
    error::ProcessManagerError,
    logs::{LogKind, spawn_log_writer},
    registry::LaunchSpec,
};

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal, when the process was killed.
    pub signal: Option<i32>,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Result of a non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPoll {
    Running,
    Exited(ExitOutcome),
}

/// The runner's reference to a live OS process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    variant: Option<String>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Variant the process was launched with, if any.
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }
}

/// Wait for a child process with a timeout, returning `Ok(None)` on timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                thread::sleep(PROCESS_CHECK_INTERVAL);
            }
        }
    }
}

fn errno_to_io(err: Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(err as i32)
}

/// Manages exactly one OS process for one service. The process runs as the
/// leader of its own process group so the whole tree can be signalled.
#[derive(Debug)]
pub struct ProcessRunner {
    service: String,
    handle: Option<ProcessHandle>,
    kill_signal: Signal,
    force_kill_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handle: None,
            kill_signal: Signal::SIGKILL,
            force_kill_timeout: FORCE_KILL_TIMEOUT,
        }
    }

    /// Replaces the escalation signal and how long to wait for it to land.
    #[cfg(test)]
    pub(crate) fn set_escalation(&mut self, signal: Signal, wait: Duration) {
        self.kill_signal = signal;
        self.force_kill_timeout = wait;
    }

    /// The live handle, if any. Does not check liveness.
    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Launches the process described by `launch`.
    ///
    /// Fails with [`ProcessManagerError::AlreadyRunning`] while a previous
    /// process is still alive, and with [`ProcessManagerError::LaunchError`]
    /// when the executable cannot be spawned or exits within its startup grace.
    pub fn start(&mut self, launch: &LaunchSpec) -> Result<&ProcessHandle, ProcessManagerError> {
        if let Some(ProcessPoll::Running) = self.poll() {
            return Err(ProcessManagerError::AlreadyRunning(self.service.clone()));
        }

        debug!(
            "Launching service '{}': {} {:?}",
            self.service, launch.program, launch.args
        );

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &launch.working_dir {
            cmd.current_dir(dir);
        }

        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|err| {
            error!("Failed to start service '{}': {err}", self.service);
            let reason = if err.kind() == std::io::ErrorKind::NotFound {
                format!("executable not found: {}", launch.program)
            } else {
                err.to_string()
            };
            ProcessManagerError::LaunchError {
                service: self.service.clone(),
                reason,
            }
        })?;

        let pid = child.id();
        if let Some(out) = child.stdout.take() {
            spawn_log_writer(&self.service, out, LogKind::Stdout);
        }
        if let Some(err) = child.stderr.take() {
            spawn_log_writer(&self.service, err, LogKind::Stderr);
        }

        match wait_with_timeout(&mut child, launch.startup_grace) {
            Ok(None) => {}
            Ok(Some(status)) => {
                let outcome = ExitOutcome::from_status(status);
                warn!(
                    "Service '{}' (PID {pid}) exited during startup with {outcome}",
                    self.service
                );
                return Err(ProcessManagerError::LaunchError {
                    service: self.service.clone(),
                    reason: format!("exited during startup with {outcome}"),
                });
            }
            Err(err) => {
                warn!("Failed to observe '{}' during startup: {err}", self.service);
            }
        }

        info!("Service '{}' started with PID {pid}", self.service);
        Ok(&*self.handle.insert(ProcessHandle {
            child,
            pid,
            started_at: Utc::now(),
            variant: launch.variant.clone(),
        }))
    }

    /// Non-blocking liveness check. An exited process is reaped and its
    /// handle released. Returns `None` when no handle is held.
    pub fn poll(&mut self) -> Option<ProcessPoll> {
        let handle = self.handle.as_mut()?;
        match handle.child.try_wait() {
            Ok(None) => Some(ProcessPoll::Running),
            Ok(Some(status)) => {
                let outcome = ExitOutcome::from_status(status);
                debug!(
                    "Service '{}' (PID {}) exited with {outcome}",
                    self.service, handle.pid
                );
                self.handle = None;
                Some(ProcessPoll::Exited(outcome))
            }
            Err(err) => {
                warn!("Failed to poll service '{}': {err}", self.service);
                Some(ProcessPoll::Running)
            }
        }
    }

    /// Requests graceful termination, waits up to `timeout`, then escalates to
    /// SIGKILL. Returns `None` when there was no process to stop.
    ///
    /// If the process cannot be reaped even after SIGKILL the handle is kept
    /// and [`ProcessManagerError::StopTimeoutError`] is returned.
    pub fn stop(&mut self, timeout: Duration) -> Result<Option<ExitOutcome>, ProcessManagerError> {
        if let Some(ProcessPoll::Exited(outcome)) = self.poll() {
            return Ok(Some(outcome));
        }
        let Some(mut handle) = self.handle.take() else {
            return Ok(None);
        };

        match self.terminate(&mut handle, timeout) {
            Ok(status) => {
                // Sweep anything the leader left behind in its group.
                let _ = signal::killpg(Pid::from_raw(handle.pid as i32), Signal::SIGKILL);

                let outcome = ExitOutcome::from_status(status);
                debug!("Service '{}' stopped with {outcome}", self.service);
                Ok(Some(outcome))
            }
            Err(err) => {
                self.handle = Some(handle);
                Err(err)
            }
        }
    }

    fn terminate(
        &self,
        handle: &mut ProcessHandle,
        timeout: Duration,
    ) -> Result<ExitStatus, ProcessManagerError> {
        let pid = handle.pid;
        let io_error = |source| ProcessManagerError::ServiceStopError {
            service: self.service.clone(),
            source,
        };

        debug!("Stopping service '{}' (PID {pid})", self.service);
        signal_tree(&self.service, pid, Signal::SIGTERM)?;

        if let Some(status) = wait_with_timeout(&mut handle.child, timeout).map_err(io_error)? {
            return Ok(status);
        }

        warn!(
            "Service '{}' did not exit within {timeout:?} after SIGTERM; sending {}",
            self.service, self.kill_signal
        );
        signal_tree(&self.service, pid, self.kill_signal)?;

        match wait_with_timeout(&mut handle.child, self.force_kill_timeout).map_err(io_error)? {
            Some(status) => Ok(status),
            None => {
                error!(
                    "Service '{}' (PID {pid}) survived {}",
                    self.service, self.kill_signal
                );
                Err(ProcessManagerError::StopTimeoutError {
                    service: self.service.clone(),
                    timeout: self.force_kill_timeout,
                })
            }
        }
    }
}

/// Sends `sig` to the service's process group, falling back to the leader
/// alone when the group cannot be signalled.
fn signal_tree(service: &str, pid: u32, sig: Signal) -> Result<(), ProcessManagerError> {
    let pid = Pid::from_raw(pid as i32);

    match signal::killpg(pid, sig) {
        Ok(()) => return Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Process group for service '{service}' missing; falling back to direct signal");
        }
        Err(Errno::EPERM) => {
            warn!(
                "Insufficient permissions to signal process group {pid} for '{service}'. Falling back to direct signal"
            );
        }
        Err(err) => {
            return Err(ProcessManagerError::ServiceStopError {
                service: service.to_string(),
                source: errno_to_io(err),
            });
        }
    }

    match signal::kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(ProcessManagerError::ServiceStopError {
            service: service.to_string(),
            source: errno_to_io(err),
        }),
    }
}

impl Drop for ProcessRunner {
    fn drop(&mut self) {
        if let Some(ProcessPoll::Running) = self.poll() {
            warn!(
                "Runner for '{}' dropped with a live process; killing it",
                self.service
            );
            if let Some(handle) = self.handle.as_mut() {
                let _ = signal_tree(&self.service, handle.pid, Signal::SIGKILL);
                let _ = wait_with_timeout(&mut handle.child, FORCE_KILL_TIMEOUT);
            }
        }
    }
}
