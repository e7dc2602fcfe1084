use chrono::Utc;
use nix::{sys::signal, unistd::Pid};
use std::{error::Error, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mnpp::{
    cli::{Cli, Commands, PrefsAction, parse_args},
    config::load_config,
    constants::MONITOR_INTERVAL,
    ipc::{self, ControlCommand, ControlError, ControlResponse},
    logs::show_logs,
    preferences::{FilePreferenceStore, PreferenceKey, PreferenceStore},
    runtime,
    server::ControlServer,
    status::{offline_entries, render_report, render_table},
    supervisor::{ServiceStatus, ServiceSupervisor},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);
    runtime::init();

    match args.command {
        Commands::Run { no_autostart } => {
            if supervisor_running() {
                warn!("mnpp supervisor already running; aborting duplicate start");
                return Ok(());
            }
            run_supervisor(args.config.as_deref(), !no_autostart)?;
        }
        Commands::Start { service } => {
            let response = send_control_command(ControlCommand::Start { service })?;
            print_response(response, true);
        }
        Commands::Stop { service } => {
            if supervisor_running() {
                let response = send_control_command(ControlCommand::Stop { service })?;
                print_response(response, true);
            } else {
                warn!("No running mnpp supervisor found; nothing to stop");
            }
        }
        Commands::Status {
            service,
            json,
            no_color,
        } => {
            let entries = if supervisor_running() {
                match send_control_command(ControlCommand::Status { service })? {
                    ControlResponse::Status(entries) => entries,
                    other => {
                        print_response(other, !no_color);
                        return Ok(());
                    }
                }
            } else {
                offline_status(args.config.as_deref(), service.as_deref())?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", render_table(&entries, Utc::now(), !no_color));
            }
        }
        Commands::Logs {
            service,
            lines,
            kind,
        } => {
            info!("Fetching {kind} logs for service: {service}");
            show_logs(&service, kind, lines)?;
        }
        Commands::Prefs { action } => run_prefs(action)?,
        Commands::Exit => {
            if supervisor_running() {
                let response = send_control_command(ControlCommand::Shutdown)?;
                print_response(response, true);
            } else {
                warn!("No running mnpp supervisor found; nothing to shut down");
                let _ = ipc::cleanup_runtime();
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_supervisor(config_path: Option<&str>, autostart: bool) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    let preferences: Arc<dyn PreferenceStore> = Arc::new(FilePreferenceStore::load()?);
    let supervisor = ServiceSupervisor::from_config(&config, preferences)?;
    supervisor.spawn_monitor(MONITOR_INTERVAL)?;

    let server = ControlServer::bind(supervisor.clone())?;
    register_signal_handler(supervisor.clone())?;

    if autostart {
        let report = supervisor.start_all()?;
        print!("{}", render_report(&report, true));
    }

    if let Err(err) = server.serve() {
        error!("Supervisor exited with error: {err}");
        supervisor.shutdown();
        let _ = ipc::cleanup_runtime();
        return Err(err.into());
    }

    Ok(())
}

fn offline_status(
    config_path: Option<&str>,
    service: Option<&str>,
) -> Result<Vec<ServiceStatus>, Box<dyn Error>> {
    let config = load_config(config_path)?;
    let names = config
        .services
        .iter()
        .map(|svc| svc.name.as_str())
        .filter(|name| service.is_none_or(|wanted| wanted == *name));
    let entries = offline_entries(names);

    if let Some(wanted) = service
        && entries.is_empty()
    {
        return Err(format!("unknown service '{wanted}'").into());
    }
    Ok(entries)
}

fn run_prefs(action: PrefsAction) -> Result<(), Box<dyn Error>> {
    let running = supervisor_running();

    match action {
        PrefsAction::Get { key } => {
            let value = if running {
                match send_control_command(ControlCommand::GetPreference { key })? {
                    ControlResponse::Preference { value, .. } => value,
                    other => return Err(format!("unexpected response: {other:?}").into()),
                }
            } else {
                FilePreferenceStore::load()?.get(PreferenceKey::parse(&key)?)?
            };
            println!("{value}");
        }
        PrefsAction::Set { key, value } => {
            if running {
                send_control_command(ControlCommand::SetPreference {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            } else {
                FilePreferenceStore::load()?.set(PreferenceKey::parse(&key)?, &value)?;
            }
            println!("{key}={value}");
        }
    }

    Ok(())
}

fn supervisor_running() -> bool {
    match ipc::read_supervisor_pid() {
        Ok(Some(pid)) => {
            let target = Pid::from_raw(pid);
            match signal::kill(target, None) {
                Ok(_) => true,
                Err(err) => {
                    if err == nix::Error::from(nix::errno::Errno::ESRCH) {
                        let _ = ipc::cleanup_runtime();
                    } else {
                        warn!("Failed to query supervisor pid {pid}: {err}");
                    }
                    false
                }
            }
        }
        Ok(None) | Err(_) => false,
    }
}

fn send_control_command(command: ControlCommand) -> Result<ControlResponse, Box<dyn Error>> {
    match ipc::send_command(&command) {
        Ok(response) => Ok(response),
        Err(ControlError::NotAvailable) => {
            let _ = ipc::cleanup_runtime();
            Err("no running mnpp supervisor found; start one with `mnpp run`".into())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_response(response: ControlResponse, colored: bool) {
    match response {
        ControlResponse::Message(message) => println!("{message}"),
        ControlResponse::Report(report) => print!("{}", render_report(&report, colored)),
        ControlResponse::Status(entries) => {
            print!("{}", render_table(&entries, Utc::now(), colored))
        }
        ControlResponse::Preference { key, value } => println!("{key}={value}"),
        ControlResponse::Error(message) => eprintln!("{message}"),
    }
}

fn register_signal_handler(supervisor: ServiceSupervisor) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        eprintln!("mnpp is shutting down... stopping services");
        supervisor.shutdown();
        let _ = ipc::cleanup_runtime();
        std::process::exit(0);
    })?;

    Ok(())
}
