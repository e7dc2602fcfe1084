//! Static service definitions and the registry that holds them.
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use crate::{constants::VARIANT_PLACEHOLDER, error::ProcessManagerError};

/// Static definition of a supervisable service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique name within the registry.
    pub name: String,
    /// Program to execute; may contain `{variant}`.
    pub executable: String,
    /// Program arguments; may contain `{variant}`.
    pub args: Vec<String>,
    /// Preference key resolved at launch time to fill `{variant}`.
    pub variant_key: Option<String>,
    /// Extra environment variables for the process.
    pub env: BTreeMap<String, String>,
    /// Working directory, inherited from the supervisor when unset.
    pub working_dir: Option<PathBuf>,
    /// Graceful-stop window before SIGKILL.
    pub stop_timeout: Duration,
    /// Early exits inside this window count as launch failures.
    pub startup_grace: Duration,
}

impl ServiceDescriptor {
    /// Builds a descriptor with default timings and no variant.
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
            variant_key: None,
            env: BTreeMap::new(),
            working_dir: None,
            stop_timeout: crate::constants::DEFAULT_STOP_TIMEOUT,
            startup_grace: crate::constants::DEFAULT_STARTUP_GRACE,
        }
    }

    /// Sets the preference key used to pick the variant.
    pub fn with_variant_key(mut self, key: impl Into<String>) -> Self {
        self.variant_key = Some(key.into());
        self
    }

    /// Overrides the graceful-stop window.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Overrides the startup grace window.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Produces the concrete launch parameters for `variant`.
    pub fn resolve(&self, variant: Option<&str>) -> LaunchSpec {
        let substitute = |value: &str| match variant {
            Some(variant) => value.replace(VARIANT_PLACEHOLDER, variant),
            None => value.to_string(),
        };

        LaunchSpec {
            service: self.name.clone(),
            program: substitute(&self.executable),
            args: self.args.iter().map(|arg| substitute(arg)).collect(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
            startup_grace: self.startup_grace,
            variant: variant.map(str::to_string),
        }
    }
}

/// A descriptor with its variant already substituted; what the runner spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub service: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub startup_grace: Duration,
    pub variant: Option<String>,
}

/// Ordered set of descriptors, keyed by unique name.
#[derive(Debug, Default, Clone)]
pub struct ServiceRegistry {
    services: Vec<Arc<ServiceDescriptor>>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from descriptors, failing on the first duplicate.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ServiceDescriptor>,
    ) -> Result<Self, ProcessManagerError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Adds a descriptor. Names are unique.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<(), ProcessManagerError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(ProcessManagerError::DuplicateName(descriptor.name));
        }

        self.index
            .insert(descriptor.name.clone(), self.services.len());
        self.services.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<ServiceDescriptor>, ProcessManagerError> {
        self.index
            .get(name)
            .map(|&position| &self.services[position])
            .ok_or_else(|| ProcessManagerError::UnknownService(name.to_string()))
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|descriptor| descriptor.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
