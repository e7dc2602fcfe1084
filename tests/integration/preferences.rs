#[path = "common/mod.rs"]
mod common;

use std::{fs, sync::Arc};

use common::HomeEnvGuard;
use mnpp::{
    error::PreferenceError,
    preferences::{FilePreferenceStore, PreferenceKey, PreferenceStore},
    registry::ServiceRegistry,
    supervisor::ServiceSupervisor,
};
use tempfile::tempdir;

#[test]
fn php_version_round_trips_through_the_default_location() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());

    let store = FilePreferenceStore::load().unwrap();
    assert!(store.path().starts_with(temp.path()));
    assert_eq!(store.get(PreferenceKey::PhpVersion).unwrap(), "53");

    store.set(PreferenceKey::PhpVersion, "52").unwrap();
    store.set(PreferenceKey::PhpVersion, "53").unwrap();

    let reloaded = FilePreferenceStore::load().unwrap();
    assert_eq!(reloaded.get(PreferenceKey::PhpVersion).unwrap(), "53");
}

#[test]
fn invalid_value_leaves_disk_untouched() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());

    let store = FilePreferenceStore::load().unwrap();
    store.set(PreferenceKey::PhpVersion, "52").unwrap();
    let before = fs::read_to_string(store.path()).unwrap();

    let err = store.set(PreferenceKey::PhpVersion, "99").unwrap_err();
    match err {
        PreferenceError::InvalidValue { key, value, expected } => {
            assert_eq!(key, "phpVersion");
            assert_eq!(value, "99");
            assert!(expected.contains("52") && expected.contains("53"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    assert_eq!(store.get(PreferenceKey::PhpVersion).unwrap(), "52");
}

#[test]
fn supervisor_rejects_unknown_keys() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());

    let store: Arc<dyn PreferenceStore> = Arc::new(FilePreferenceStore::load().unwrap());
    let supervisor = ServiceSupervisor::new(ServiceRegistry::new(), store).unwrap();

    assert!(matches!(
        supervisor.get_preference("mysqlVersion"),
        Err(PreferenceError::UnknownKey(_))
    ));
    assert!(matches!(
        supervisor.set_preference("phpVersion", "5.3"),
        Err(PreferenceError::InvalidValue { .. })
    ));
    assert_eq!(supervisor.get_preference("phpVersion").unwrap(), "53");
}
