//! Configuration management for mnpp.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::{
    constants::{
        CONFIG_FILE_NAME, DEFAULT_INSTALL_ROOT, DEFAULT_STARTUP_GRACE,
        DEFAULT_STOP_TIMEOUT, PHP_VERSION_KEY,
    },
    error::ProcessManagerError,
    registry::ServiceDescriptor,
    runtime,
};

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Services in the order they should be listed and started.
    pub services: Vec<ServiceConfig>,
    /// Root directory from which relative paths are resolved.
    #[serde(default)]
    pub project_dir: Option<String>,
}

/// Configuration for an individual service.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unique service name (`web`, `database`, `php`, ...).
    pub name: String,
    /// Program to execute. May contain `{variant}`.
    pub executable: String,
    /// Arguments passed to the program. May contain `{variant}`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Preference key whose value is substituted for `{variant}`.
    #[serde(default)]
    pub variant_key: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Grace period after SIGTERM, e.g. `5s`.
    #[serde(default)]
    pub stop_timeout: Option<String>,
    /// Window during which an early exit is a launch failure, e.g. `250ms`.
    #[serde(default)]
    pub startup_grace: Option<String>,
}

impl ServiceConfig {
    fn bare(name: &str, executable: String, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            executable,
            args: args.iter().map(|arg| arg.to_string()).collect(),
            variant_key: None,
            env: BTreeMap::new(),
            working_dir: None,
            stop_timeout: None,
            startup_grace: None,
        }
    }
}

impl Config {
    /// The stack bundled with the MNPP application: nginx, MySQL and PHP-FPM,
    /// with the PHP binary chosen by the `phpVersion` preference.
    pub fn default_layout() -> Self {
        let library = format!("{DEFAULT_INSTALL_ROOT}/Library");

        let web = ServiceConfig::bare(
            "web",
            format!("{library}/nginx/sbin/nginx"),
            &["-g", "daemon off;"],
        );

        let datadir = format!("--datadir={library}/mysql/data");
        let mut database = ServiceConfig::bare(
            "database",
            format!("{library}/mysql/bin/mysqld"),
            &[],
        );
        database.args.push(datadir);
        database.stop_timeout = Some("15s".into());

        let mut php = ServiceConfig::bare(
            "php",
            format!("{library}/php{{variant}}/sbin/php-fpm"),
            &["--nodaemonize"],
        );
        php.variant_key = Some(PHP_VERSION_KEY.into());

        Self {
            version: "1".into(),
            services: vec![web, database, php],
            project_dir: Some(DEFAULT_INSTALL_ROOT.into()),
        }
    }

    /// Directory that relative working directories resolve against.
    pub fn project_root(&self) -> PathBuf {
        self.project_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Converts every service entry into a descriptor, in file order.
    pub fn descriptors(&self) -> Result<Vec<ServiceDescriptor>, ProcessManagerError> {
        let root = self.project_root();
        self.services
            .iter()
            .map(|service| Self::descriptor_for(service, &root))
            .collect()
    }

    fn descriptor_for(
        service: &ServiceConfig,
        root: &Path,
    ) -> Result<ServiceDescriptor, ProcessManagerError> {
        if service.name.trim().is_empty() {
            return Err(ProcessManagerError::InvalidConfig(
                "service name cannot be empty".into(),
            ));
        }
        if service.executable.trim().is_empty() {
            return Err(ProcessManagerError::InvalidConfig(format!(
                "service '{}' has no executable",
                service.name
            )));
        }

        let stop_timeout = match &service.stop_timeout {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_STOP_TIMEOUT,
        };
        let startup_grace = match &service.startup_grace {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_STARTUP_GRACE,
        };

        let working_dir = service.working_dir.as_ref().map(|dir| {
            let path = Path::new(dir);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            }
        });

        Ok(ServiceDescriptor {
            name: service.name.clone(),
            executable: service.executable.clone(),
            args: service.args.clone(),
            variant_key: service.variant_key.clone(),
            env: service.env.clone(),
            working_dir,
            stop_timeout,
            startup_grace,
        })
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ProcessManagerError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ProcessManagerError::InvalidConfig(
            "Duration value cannot be empty".into(),
        ));
    }

    let invalid =
        || ProcessManagerError::InvalidConfig(format!("Invalid duration value: '{raw}'"));

    if let Some(stripped) = value.strip_suffix("ms") {
        let amount: u64 = stripped.trim().parse().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(amount));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().map_err(|_| invalid())?;
    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands `$VAR` and `${VAR}` references within a string. Whole-line YAML
/// comments are left untouched and an unclosed `${` is kept literally.
fn expand_env_vars(input: &str) -> Result<String, ProcessManagerError> {
    let re = Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .map_err(|err| ProcessManagerError::InvalidConfig(err.to_string()))?;

    let mut missing = None;
    let mut result = String::with_capacity(input.len());
    for line in input.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            continue;
        }

        let expanded = re.replace_all(line, |caps: &regex::Captures| {
            let var_name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |name| name.as_str());
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            }
        });
        result.push_str(&expanded);
    }

    match missing {
        Some(var_name) => Err(ProcessManagerError::InvalidConfig(format!(
            "Missing environment variable: {var_name}"
        ))),
        None => Ok(result),
    }
}

/// Finds the config file to use: the explicit path, `./mnpp.yaml`, or the
/// runtime config directory. `None` means the built-in layout applies.
pub fn resolve_config_path(config_path: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = config_path {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    let user = runtime::config_dir().join(CONFIG_FILE_NAME);
    user.exists().then_some(user)
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ProcessManagerError> {
    let Some(config_path) = resolve_config_path(config_path) else {
        debug!("No config file found; using built-in MNPP layout");
        return Ok(Config::default_layout());
    };

    let content = fs::read_to_string(&config_path).map_err(|e| {
        ProcessManagerError::ConfigReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let mut config: Config = serde_yaml::from_str(&expanded_content)
        .map_err(ProcessManagerError::ConfigParseError)?;

    if config.project_dir.is_none() {
        let base_path = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.project_dir = Some(base_path.to_string_lossy().to_string());
    }

    debug!(
        "Loaded {} service(s) from {}",
        config.services.len(),
        config_path.display()
    );
    Ok(config)
}
