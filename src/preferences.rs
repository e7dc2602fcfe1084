//! Persisted user preferences.
//!
//! The only preference today is `phpVersion`, which selects the PHP runtime
//! variant launched by the supervisor. Values are validated against the
//! key's legal set before anything is written.
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use fs2::FileExt;
use serde_json::Value;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

use crate::{
    constants::{
        DEFAULT_PHP_VERSION, PHP_VERSIONS, PREFERENCES_FILE_NAME, PREFERENCES_LOCK_SUFFIX,
    },
    error::PreferenceError,
    runtime,
};

/// Keys the store understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr, Display, EnumIter, EnumString,
)]
pub enum PreferenceKey {
    /// PHP runtime variant (`52` or `53`).
    #[strum(serialize = "phpVersion")]
    PhpVersion,
}

impl PreferenceKey {
    /// Parses a key name, mapping failures to [`PreferenceError::UnknownKey`].
    pub fn parse(raw: &str) -> Result<Self, PreferenceError> {
        Self::from_str(raw.trim()).map_err(|_| PreferenceError::UnknownKey(raw.to_string()))
    }

    pub fn legal_values(&self) -> &'static [&'static str] {
        match self {
            Self::PhpVersion => PHP_VERSIONS,
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Self::PhpVersion => DEFAULT_PHP_VERSION,
        }
    }

    pub fn validate(&self, value: &str) -> Result<(), PreferenceError> {
        if self.legal_values().contains(&value) {
            Ok(())
        } else {
            Err(PreferenceError::InvalidValue {
                key: self.to_string(),
                value: value.to_string(),
                expected: self.legal_values().join(", "),
            })
        }
    }
}

/// Key/value persistence consulted by the supervisor at launch time.
pub trait PreferenceStore: Send + Sync {
    /// Current value for `key`, or its default when unset.
    fn get(&self, key: PreferenceKey) -> Result<String, PreferenceError>;

    /// Validates and durably stores `value`. On failure the previous value is kept.
    fn set(&self, key: PreferenceKey, value: &str) -> Result<(), PreferenceError>;
}

fn value_or_default(values: &BTreeMap<PreferenceKey, String>, key: PreferenceKey) -> String {
    match values.get(&key) {
        Some(value) if key.validate(value).is_ok() => value.clone(),
        Some(value) => {
            warn!("Ignoring stored value '{value}' for '{key}'; using default");
            key.default_value().to_string()
        }
        None => key.default_value().to_string(),
    }
}

/// Volatile store, used when embedding the supervisor and in tests.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<PreferenceKey, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: PreferenceKey) -> Result<String, PreferenceError> {
        let values = self.values.lock()?;
        Ok(value_or_default(&values, key))
    }

    fn set(&self, key: PreferenceKey, value: &str) -> Result<(), PreferenceError> {
        key.validate(value)?;
        self.values.lock()?.insert(key, value.to_string());
        Ok(())
    }
}

/// JSON file store in the runtime state directory.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<PreferenceKey, String>>,
}

impl FilePreferenceStore {
    /// Default location: `<state_dir>/preferences.json`.
    pub fn default_path() -> PathBuf {
        runtime::state_dir().join(PREFERENCES_FILE_NAME)
    }

    /// Opens the store at the default location.
    pub fn load() -> Result<Self, PreferenceError> {
        Self::open(Self::default_path())
    }

    /// Opens the store at `path`, reading any existing values.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let values = Self::read(&path)?;
        debug!("Loaded {} preference(s) from {}", values.len(), path.display());
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<BTreeMap<PreferenceKey, String>, PreferenceError> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let raw: BTreeMap<String, Value> = serde_json::from_str(&contents)?;
        let mut values = BTreeMap::new();
        for key in PreferenceKey::iter() {
            let stored = raw.get(key.as_ref()).and_then(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            });
            if let Some(stored) = stored {
                values.insert(key, stored);
            }
        }

        if !values.contains_key(&PreferenceKey::PhpVersion)
            && let Some(version) = Self::legacy_php_version(&raw)
        {
            info!("Migrating legacy php{version} flag to phpVersion={version}");
            values.insert(PreferenceKey::PhpVersion, version.to_string());
        }

        Ok(values)
    }

    /// Older installs stored one integer flag per PHP version (`php53: 1`).
    fn legacy_php_version(raw: &BTreeMap<String, Value>) -> Option<&'static str> {
        PHP_VERSIONS.iter().rev().copied().find(|version| {
            raw.get(&format!("php{version}"))
                .and_then(Value::as_i64)
                .is_some_and(|flag| flag == 1)
        })
    }

    fn write(&self, values: &BTreeMap<PreferenceKey, String>) -> Result<(), PreferenceError> {
        let persist = PreferenceError::PersistError;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(persist)?;
        }

        let mut lock_path = self.path.clone().into_os_string();
        lock_path.push(PREFERENCES_LOCK_SUFFIX);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(persist)?;
        lock_file.lock_exclusive().map_err(persist)?;

        let serialisable: BTreeMap<&str, &str> = values
            .iter()
            .map(|(key, value)| (key.as_ref(), value.as_str()))
            .collect();
        let payload = serde_json::to_string_pretty(&serialisable)?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let result = fs::write(&staging, payload)
            .and_then(|_| fs::rename(&staging, &self.path))
            .map_err(persist);

        let _ = lock_file.unlock();
        result
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: PreferenceKey) -> Result<String, PreferenceError> {
        let values = self.values.lock()?;
        Ok(value_or_default(&values, key))
    }

    fn set(&self, key: PreferenceKey, value: &str) -> Result<(), PreferenceError> {
        key.validate(value)?;

        let mut guard = self.values.lock()?;
        let mut updated = guard.clone();
        updated.insert(key, value.to_string());
        self.write(&updated)?;
        *guard = updated;

        info!("Saved preference {key}={value}");
        Ok(())
    }
}
