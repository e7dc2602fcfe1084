//! Resident control server: keeps a [`ServiceSupervisor`] alive and executes
//! commands sent by short-lived CLI invocations over the control socket.
//!
//! Every connection is served on its own thread, so a slow stop or an idle
//! client never holds up other requests.
use std::{
    fs, io,
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    constants::CONTROL_READ_TIMEOUT,
    ipc::{self, ControlCommand, ControlError, ControlResponse},
    supervisor::{BatchReport, ServiceOutcome, ServiceSupervisor},
};

/// Errors emitted by the resident control server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Listens on the control socket and dispatches commands to the supervisor.
pub struct ControlServer {
    supervisor: ServiceSupervisor,
    listener: UnixListener,
    socket_path: PathBuf,
    stopping: Arc<AtomicBool>,
}

impl ControlServer {
    /// Binds the control socket, replacing a stale one, and records our PID.
    pub fn bind(supervisor: ServiceSupervisor) -> Result<Self, ServerError> {
        ipc::cleanup_runtime()?;
        let socket_path = ipc::socket_path()?;
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        ipc::write_supervisor_pid(std::process::id())?;
        info!("mnpp supervisor listening on {:?}", socket_path);

        Ok(Self {
            supervisor,
            listener,
            socket_path,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Serves commands until a `Shutdown` command has been handled.
    pub fn serve(&self) -> Result<(), ServerError> {
        while !self.stopping.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    self.spawn_connection(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Control listener error: {err}");
                    self.supervisor.shutdown();
                    break;
                }
            }
        }

        ipc::cleanup_runtime()?;
        debug!("Control server on {:?} stopped", self.socket_path);
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let supervisor = self.supervisor.clone();
        let stopping = Arc::clone(&self.stopping);
        let socket_path = self.socket_path.clone();

        thread::spawn(move || {
            if handle_connection(&supervisor, stream) {
                stopping.store(true, Ordering::SeqCst);
                // Wake the accept loop so it observes the flag.
                let _ = UnixStream::connect(&socket_path);
            }
        });
    }
}

/// Serves one client. Returns `true` when it asked the server to exit.
fn handle_connection(supervisor: &ServiceSupervisor, mut stream: UnixStream) -> bool {
    if let Err(err) = stream.set_read_timeout(Some(CONTROL_READ_TIMEOUT)) {
        warn!("Failed to set control read timeout: {err}");
    }

    let command = match ipc::read_command(&mut stream) {
        Ok(command) => command,
        Err(err) => {
            warn!("Invalid control command: {err}");
            let _ = ipc::write_response(&mut stream, &ControlResponse::Error(err.to_string()));
            return false;
        }
    };

    debug!("Supervisor received command: {:?}", command);
    let should_shutdown = matches!(command, ControlCommand::Shutdown);
    let response = handle_command(supervisor, command);
    if let Err(err) = ipc::write_response(&mut stream, &response) {
        warn!("Failed to reply to control client: {err}");
    }
    should_shutdown
}

/// Executes one command against the supervisor.
pub fn handle_command(supervisor: &ServiceSupervisor, command: ControlCommand) -> ControlResponse {
    let single = |service: &str, outcome| {
        ControlResponse::Report(BatchReport {
            outcomes: vec![ServiceOutcome {
                service: service.to_string(),
                outcome,
            }],
        })
    };

    let result = match command {
        ControlCommand::Start { service: Some(name) } => supervisor
            .start_service(&name)
            .map(|outcome| single(&name, outcome)),
        ControlCommand::Start { service: None } => {
            supervisor.start_all().map(ControlResponse::Report)
        }
        ControlCommand::Stop { service: Some(name) } => supervisor
            .stop_service(&name)
            .map(|outcome| single(&name, outcome)),
        ControlCommand::Stop { service: None } => {
            Ok(ControlResponse::Report(supervisor.stop_all()))
        }
        ControlCommand::Status { service: Some(name) } => supervisor
            .status(&name)
            .and_then(|_| supervisor.snapshot())
            .map(|entries| {
                ControlResponse::Status(
                    entries
                        .into_iter()
                        .filter(|entry| entry.name == name)
                        .collect(),
                )
            }),
        ControlCommand::Status { service: None } => {
            supervisor.snapshot().map(ControlResponse::Status)
        }
        ControlCommand::GetPreference { key } => {
            return match supervisor.get_preference(&key) {
                Ok(value) => ControlResponse::Preference { key, value },
                Err(err) => ControlResponse::Error(err.to_string()),
            };
        }
        ControlCommand::SetPreference { key, value } => {
            return match supervisor.set_preference(&key, &value) {
                Ok(()) => ControlResponse::Preference { key, value },
                Err(err) => ControlResponse::Error(err.to_string()),
            };
        }
        ControlCommand::Shutdown => {
            let report = supervisor.shutdown();
            return if report.completed {
                ControlResponse::Message("Supervisor shutting down".into())
            } else {
                ControlResponse::Message(
                    "Supervisor shutting down; some services did not stop in time".into(),
                )
            };
        }
    };

    result.unwrap_or_else(|err| ControlResponse::Error(err.to_string()))
}
