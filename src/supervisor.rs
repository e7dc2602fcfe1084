//! Service supervisor: the authoritative run state of every registered service.
//!
//! Each service owns one [`ProcessRunner`] behind its own mutex, so start and
//! stop requests for the same service are serialised while different services
//! proceed independently. The state map is the only structure shared between
//! services; it is written while holding the service's runner lock and read
//! without it, so status queries never wait on an in-flight transition.
//!
//! Lock order: a runner lock may be held while taking the state map lock,
//! never the reverse.
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, TryLockError, Weak,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    constants::SHUTDOWN_TIMEOUT,
    error::{PreferenceError, ProcessManagerError},
    preferences::{PreferenceKey, PreferenceStore},
    registry::{LaunchSpec, ServiceDescriptor, ServiceRegistry},
    runner::{ProcessPoll, ProcessRunner},
};

/// Run state of a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed(String),
}

impl ServiceState {
    /// `Starting` and `Stopping` are transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What a start or stop request did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Failed(String),
}

impl TransitionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Stopped => write!(f, "stopped"),
            Self::AlreadyStopped => write!(f, "already stopped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of one service within an aggregate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub outcome: TransitionOutcome,
}

/// Per-service outcomes of `start_all`/`stop_all`, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<ServiceOutcome>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|entry| !entry.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes.iter().filter(|entry| entry.outcome.is_failure())
    }

    pub fn outcome_for(&self, service: &str) -> Option<&TransitionOutcome> {
        self.outcomes
            .iter()
            .find(|entry| entry.service == service)
            .map(|entry| &entry.outcome)
    }
}

/// Result of [`ServiceSupervisor::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `false` when the total timeout elapsed before every stop finished.
    pub completed: bool,
    /// Per-service outcomes when the stop sequence completed in time.
    pub report: Option<BatchReport>,
}

/// Display-oriented view of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StateEntry {
    state: ServiceState,
    pid: Option<u32>,
    variant: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

impl StateEntry {
    fn bare(state: ServiceState) -> Self {
        Self {
            state,
            pid: None,
            variant: None,
            started_at: None,
        }
    }
}

struct ServiceSlot {
    descriptor: Arc<ServiceDescriptor>,
    runner: Mutex<ProcessRunner>,
}

struct Inner {
    registry: ServiceRegistry,
    slots: HashMap<String, ServiceSlot>,
    states: Mutex<HashMap<String, StateEntry>>,
    preferences: Arc<dyn PreferenceStore>,
    closed: AtomicBool,
    monitor_running: Arc<AtomicBool>,
    monitor_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Starts, stops and tracks the services of a [`ServiceRegistry`].
///
/// Cloning is cheap and every clone drives the same services.
#[derive(Clone)]
pub struct ServiceSupervisor {
    inner: Arc<Inner>,
}

impl ServiceSupervisor {
    /// Creates a supervisor with every service `Stopped`.
    ///
    /// Fails with [`ProcessManagerError::InvalidConfig`] when a descriptor
    /// names a variant key the preference store does not understand.
    pub fn new(
        registry: ServiceRegistry,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, ProcessManagerError> {
        let mut slots = HashMap::new();
        let mut states = HashMap::new();

        for descriptor in registry.iter() {
            if let Some(key) = &descriptor.variant_key {
                PreferenceKey::parse(key).map_err(|err| {
                    ProcessManagerError::InvalidConfig(format!(
                        "service '{}': {err}",
                        descriptor.name
                    ))
                })?;
            }

            slots.insert(
                descriptor.name.clone(),
                ServiceSlot {
                    descriptor: Arc::clone(descriptor),
                    runner: Mutex::new(ProcessRunner::new(descriptor.name.clone())),
                },
            );
            states.insert(
                descriptor.name.clone(),
                StateEntry::bare(ServiceState::Stopped),
            );
        }

        debug!("Supervisor initialised with {} service(s)", registry.len());

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                slots,
                states: Mutex::new(states),
                preferences,
                closed: AtomicBool::new(false),
                monitor_running: Arc::new(AtomicBool::new(false)),
                monitor_handle: Mutex::new(None),
            }),
        })
    }

    /// Builds the registry from `config` and creates a supervisor over it.
    pub fn from_config(
        config: &Config,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, ProcessManagerError> {
        let registry = ServiceRegistry::from_descriptors(config.descriptors()?)?;
        Self::new(registry, preferences)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    fn slot(&self, name: &str) -> Result<&ServiceSlot, ProcessManagerError> {
        self.inner
            .slots
            .get(name)
            .ok_or_else(|| ProcessManagerError::UnknownService(name.to_string()))
    }

    fn states(&self) -> Result<MutexGuard<'_, HashMap<String, StateEntry>>, ProcessManagerError> {
        Ok(self.inner.states.lock()?)
    }

    fn current_state(&self, name: &str) -> Result<ServiceState, ProcessManagerError> {
        self.states()?
            .get(name)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| ProcessManagerError::UnknownService(name.to_string()))
    }

    fn set_entry(&self, name: &str, entry: StateEntry) -> Result<(), ProcessManagerError> {
        debug!("Service '{name}' -> {}", entry.state);
        self.states()?.insert(name.to_string(), entry);
        Ok(())
    }

    fn set_state(&self, name: &str, state: ServiceState) -> Result<(), ProcessManagerError> {
        self.set_entry(name, StateEntry::bare(state))
    }

    fn resolve_launch(&self, descriptor: &ServiceDescriptor) -> Result<LaunchSpec, PreferenceError> {
        let variant = match &descriptor.variant_key {
            Some(key) => Some(self.inner.preferences.get(PreferenceKey::parse(key)?)?),
            None => None,
        };
        Ok(descriptor.resolve(variant.as_deref()))
    }

    /// Folds an externally observed exit into the state map. Caller holds the
    /// service's runner lock.
    fn reconcile(&self, name: &str, runner: &mut ProcessRunner) -> Result<(), ProcessManagerError> {
        let Some(ProcessPoll::Exited(outcome)) = runner.poll() else {
            return Ok(());
        };

        if self.current_state(name)? != ServiceState::Running {
            return Ok(());
        }

        if outcome.success() {
            info!("Service '{name}' exited on its own with {outcome}");
            self.set_state(name, ServiceState::Stopped)
        } else {
            warn!("Service '{name}' exited unexpectedly with {outcome}");
            self.set_state(
                name,
                ServiceState::Failed(format!("exited unexpectedly with {outcome}")),
            )
        }
    }

    /// Starts `name`. Launch failures are recorded as `Failed(reason)` and
    /// reported through the returned outcome rather than as an error.
    pub fn start_service(&self, name: &str) -> Result<TransitionOutcome, ProcessManagerError> {
        let slot = self.slot(name)?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ProcessManagerError::ShuttingDown);
        }
        if self.current_state(name)? == ServiceState::Starting {
            return Ok(TransitionOutcome::AlreadyRunning);
        }

        let mut runner = slot.runner.lock()?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ProcessManagerError::ShuttingDown);
        }

        self.reconcile(name, &mut runner)?;
        if self.current_state(name)? == ServiceState::Running {
            debug!("Service '{name}' already running");
            return Ok(TransitionOutcome::AlreadyRunning);
        }

        info!("Starting service '{name}'");
        self.set_state(name, ServiceState::Starting)?;

        let launch = match self.resolve_launch(&slot.descriptor) {
            Ok(launch) => launch,
            Err(err) => {
                let reason = format!("cannot resolve variant: {err}");
                error!("Service '{name}' {reason}");
                self.set_state(name, ServiceState::Failed(reason.clone()))?;
                return Ok(TransitionOutcome::Failed(reason));
            }
        };

        match runner.start(&launch) {
            Ok(handle) => {
                let entry = StateEntry {
                    state: ServiceState::Running,
                    pid: Some(handle.pid()),
                    variant: handle.variant().map(str::to_string),
                    started_at: Some(handle.started_at()),
                };
                self.set_entry(name, entry)?;
                Ok(TransitionOutcome::Started)
            }
            Err(err) => {
                let reason = match &err {
                    ProcessManagerError::LaunchError { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                error!("Service '{name}' failed to start: {reason}");
                self.set_state(name, ServiceState::Failed(reason.clone()))?;
                Ok(TransitionOutcome::Failed(reason))
            }
        }
    }

    /// Stops `name`. Waits for any in-flight start of the same service first.
    pub fn stop_service(&self, name: &str) -> Result<TransitionOutcome, ProcessManagerError> {
        let slot = self.slot(name)?;
        if self.current_state(name)? == ServiceState::Stopping {
            return Ok(TransitionOutcome::AlreadyStopped);
        }

        let mut runner = slot.runner.lock()?;
        self.reconcile(name, &mut runner)?;

        let state = self.current_state(name)?;
        if state == ServiceState::Stopped && runner.handle().is_none() {
            debug!("Service '{name}' already stopped");
            return Ok(TransitionOutcome::AlreadyStopped);
        }

        info!("Stopping service '{name}'");
        self.set_state(name, ServiceState::Stopping)?;

        match runner.stop(slot.descriptor.stop_timeout) {
            Ok(outcome) => {
                if let Some(outcome) = outcome {
                    debug!("Service '{name}' exited with {outcome}");
                }
                self.set_state(name, ServiceState::Stopped)?;
                Ok(TransitionOutcome::Stopped)
            }
            Err(err) => {
                let reason = err.to_string();
                error!("Service '{name}' failed to stop: {reason}");
                self.set_state(name, ServiceState::Failed(reason.clone()))?;
                Ok(TransitionOutcome::Failed(reason))
            }
        }
    }

    fn fan_out<F>(&self, action: F) -> BatchReport
    where
        F: Fn(&str) -> Result<TransitionOutcome, ProcessManagerError> + Sync,
    {
        let action = &action;
        let outcomes: Vec<ServiceOutcome> = thread::scope(|scope| {
            let workers: Vec<_> = self
                .inner
                .registry
                .names()
                .map(|name| (name, scope.spawn(move || action(name))))
                .collect();

            workers
                .into_iter()
                .map(|(name, worker)| {
                    let outcome = match worker.join() {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(err)) => TransitionOutcome::Failed(err.to_string()),
                        Err(_) => TransitionOutcome::Failed("worker panicked".into()),
                    };
                    ServiceOutcome {
                        service: name.to_string(),
                        outcome,
                    }
                })
                .collect()
        });

        BatchReport { outcomes }
    }

    /// Starts every registered service in parallel. One failure never
    /// prevents the others from being attempted.
    pub fn start_all(&self) -> Result<BatchReport, ProcessManagerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ProcessManagerError::ShuttingDown);
        }

        let report = self.fan_out(|name| self.start_service(name));
        for failure in report.failures() {
            warn!("Service '{}' {}", failure.service, failure.outcome);
        }
        Ok(report)
    }

    /// Stops every registered service in parallel.
    pub fn stop_all(&self) -> BatchReport {
        let report = self.fan_out(|name| self.stop_service(name));
        for failure in report.failures() {
            warn!("Service '{}' {}", failure.service, failure.outcome);
        }
        report
    }

    pub fn status(&self, name: &str) -> Result<ServiceState, ProcessManagerError> {
        self.slot(name)?;
        self.current_state(name)
    }

    pub fn status_all(&self) -> Result<BTreeMap<String, ServiceState>, ProcessManagerError> {
        Ok(self
            .states()?
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.clone()))
            .collect())
    }

    /// Status entries with process details, in registration order.
    pub fn snapshot(&self) -> Result<Vec<ServiceStatus>, ProcessManagerError> {
        let states = self.states()?;
        Ok(self
            .inner
            .registry
            .names()
            .filter_map(|name| {
                states.get(name).map(|entry| ServiceStatus {
                    name: name.to_string(),
                    state: entry.state.clone(),
                    pid: entry.pid,
                    variant: entry.variant.clone(),
                    started_at: entry.started_at,
                })
            })
            .collect())
    }

    /// Polls the process of `name` and records an external exit.
    pub fn refresh(&self, name: &str) -> Result<ServiceState, ProcessManagerError> {
        let slot = self.slot(name)?;
        let mut runner = slot.runner.lock()?;
        self.reconcile(name, &mut runner)?;
        self.current_state(name)
    }

    /// Like [`refresh`](Self::refresh) for every service, skipping any that is
    /// mid-transition.
    fn refresh_idle(&self) {
        for name in self.inner.registry.names() {
            let Ok(slot) = self.slot(name) else { continue };
            let mut runner = match slot.runner.try_lock() {
                Ok(runner) => runner,
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            if let Err(err) = self.reconcile(name, &mut runner) {
                warn!("Failed to refresh '{name}': {err}");
            }
        }
    }

    /// Starts a background thread that polls every service each `interval`
    /// so external exits show up in status queries. The thread ends when
    /// [`shutdown`](Self::shutdown) runs or the last supervisor clone drops.
    pub fn spawn_monitor(&self, interval: Duration) -> Result<(), ProcessManagerError> {
        let mut handle_slot = self.inner.monitor_handle.lock()?;
        if handle_slot
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return Ok(());
        }

        debug!("Starting service monitor thread...");
        let running = Arc::clone(&self.inner.monitor_running);
        running.store(true, Ordering::SeqCst);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        *handle_slot = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(interval);
                let Some(inner) = weak.upgrade() else { break };
                ServiceSupervisor { inner }.refresh_idle();
            }
            debug!("Service monitor thread exiting");
        }));
        Ok(())
    }

    /// Signals the monitor thread to exit and waits for it.
    pub fn stop_monitor(&self) {
        self.inner.monitor_running.store(false, Ordering::SeqCst);
        let handle = match self.inner.monitor_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// [`shutdown_within`](Self::shutdown_within) with the default total timeout.
    pub fn shutdown(&self) -> ShutdownReport {
        self.shutdown_within(SHUTDOWN_TIMEOUT)
    }

    /// Refuses further starts, stops every service and returns once all have
    /// stopped or `total` has elapsed, whichever comes first.
    pub fn shutdown_within(&self, total: Duration) -> ShutdownReport {
        info!("Shutting down supervisor");
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stop_monitor();

        let (tx, rx) = mpsc::channel();
        let supervisor = self.clone();
        thread::spawn(move || {
            let _ = tx.send(supervisor.stop_all());
        });

        match rx.recv_timeout(total) {
            Ok(report) => {
                info!("All services stopped");
                ShutdownReport {
                    completed: true,
                    report: Some(report),
                }
            }
            Err(_) => {
                error!("Shutdown did not finish within {total:?}; giving up on remaining services");
                ShutdownReport {
                    completed: false,
                    report: None,
                }
            }
        }
    }

    /// Reads a preference through the supervisor's store.
    pub fn get_preference(&self, key: &str) -> Result<String, PreferenceError> {
        self.inner.preferences.get(PreferenceKey::parse(key)?)
    }

    /// Validates and persists a preference. Running services keep their
    /// current variant until they are restarted.
    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let key = PreferenceKey::parse(key)?;
        self.inner.preferences.set(key, value)?;

        let affected: Vec<&str> = self
            .inner
            .registry
            .iter()
            .filter(|descriptor| descriptor.variant_key.as_deref() == Some(key.as_ref()))
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        if !affected.is_empty() {
            info!("{key}={value} applies to {affected:?} on next start");
        }
        Ok(())
    }
}
