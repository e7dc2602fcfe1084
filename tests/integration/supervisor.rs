#[path = "common/mod.rs"]
mod common;

use std::{
    collections::BTreeSet,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{HomeEnvGuard, is_process_alive, sleeper, supervisor_with, wait_for_process_exit};
use mnpp::{
    logs::{LogKind, resolve_log_path},
    preferences::{FilePreferenceStore, PreferenceStore},
    registry::{ServiceDescriptor, ServiceRegistry},
    supervisor::{ServiceState, ServiceSupervisor, TransitionOutcome},
};
use tempfile::tempdir;

fn stack() -> ServiceSupervisor {
    supervisor_with(vec![sleeper("web"), sleeper("database"), sleeper("php")])
}

#[test]
fn web_database_php_lifecycle() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = stack();

    let report = supervisor.start_all().unwrap();
    assert!(report.is_success());
    let names: Vec<_> = report.outcomes.iter().map(|o| o.service.as_str()).collect();
    assert_eq!(names, ["web", "database", "php"]);

    let snapshot = supervisor.snapshot().unwrap();
    assert!(snapshot.iter().all(|entry| entry.state == ServiceState::Running));
    let database_pid = snapshot[1].pid.unwrap();

    assert_eq!(
        supervisor.stop_service("database").unwrap(),
        TransitionOutcome::Stopped
    );
    wait_for_process_exit(database_pid);

    let states = supervisor.status_all().unwrap();
    assert_eq!(states["web"], ServiceState::Running);
    assert_eq!(states["database"], ServiceState::Stopped);
    assert_eq!(states["php"], ServiceState::Running);

    let pids: Vec<u32> = supervisor
        .snapshot()
        .unwrap()
        .iter()
        .filter_map(|entry| entry.pid)
        .collect();

    let shutdown = supervisor.shutdown_within(Duration::from_secs(10));
    assert!(shutdown.completed);
    for state in supervisor.status_all().unwrap().values() {
        assert_eq!(*state, ServiceState::Stopped);
    }
    for pid in pids {
        wait_for_process_exit(pid);
    }
}

#[test]
fn concurrent_start_and_stop_never_duplicates_a_process() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = supervisor_with(vec![sleeper("web")]);

    let observed = Arc::new(std::sync::Mutex::new(BTreeSet::new()));
    thread::scope(|scope| {
        for worker in 0..6 {
            let supervisor = supervisor.clone();
            let observed = Arc::clone(&observed);
            scope.spawn(move || {
                for round in 0..4 {
                    if (worker + round) % 2 == 0 {
                        let _ = supervisor.start_service("web");
                    } else {
                        let _ = supervisor.stop_service("web");
                    }
                    if let Some(pid) = supervisor.snapshot().unwrap()[0].pid {
                        observed.lock().unwrap().insert(pid);
                    }
                }
            });
        }
    });

    // Whatever interleaving happened, at most one recorded process is still alive.
    let alive: Vec<u32> = observed
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|pid| is_process_alive(*pid))
        .collect();
    assert!(alive.len() <= 1, "multiple live processes: {alive:?}");

    let state = supervisor.status("web").unwrap();
    assert!(!state.is_transient());
    if state == ServiceState::Running {
        assert_eq!(alive.len(), 1);
    }

    supervisor.stop_service("web").unwrap();
    for pid in alive {
        wait_for_process_exit(pid);
    }
}

#[test]
fn start_all_then_stop_all_leaves_nothing_running() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = stack();

    supervisor.start_all().unwrap();
    let pids: Vec<u32> = supervisor
        .snapshot()
        .unwrap()
        .iter()
        .filter_map(|entry| entry.pid)
        .collect();
    assert_eq!(pids.len(), 3);

    let report = supervisor.stop_all();
    assert!(report.is_success());
    for state in supervisor.status_all().unwrap().values() {
        assert_ne!(*state, ServiceState::Running);
    }
    for pid in pids {
        wait_for_process_exit(pid);
    }
}

#[test]
fn one_failing_service_does_not_block_the_others() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = supervisor_with(vec![
        sleeper("web"),
        ServiceDescriptor::new("database", "/nonexistent/mnpp/bin/mysqld", Vec::<String>::new()),
        sleeper("php"),
    ]);

    let report = supervisor.start_all().unwrap();
    assert!(!report.is_success());
    assert_eq!(report.outcome_for("web"), Some(&TransitionOutcome::Started));
    assert_eq!(report.outcome_for("php"), Some(&TransitionOutcome::Started));
    assert!(report.outcome_for("database").unwrap().is_failure());

    assert!(supervisor.status("database").unwrap().is_failed());
    assert_eq!(supervisor.status("web").unwrap(), ServiceState::Running);

    supervisor.stop_all();
}

#[test]
fn php_variant_follows_persisted_preference() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());

    let prefs: Arc<dyn PreferenceStore> = Arc::new(FilePreferenceStore::load().unwrap());
    let registry = ServiceRegistry::from_descriptors([ServiceDescriptor::new(
        "php",
        "sh",
        ["-c", "echo php{variant}; sleep 30"],
    )
    .with_variant_key("phpVersion")
    .with_startup_grace(Duration::from_millis(100))])
    .unwrap();
    let supervisor = ServiceSupervisor::new(registry, prefs).unwrap();

    supervisor.set_preference("phpVersion", "52").unwrap();
    supervisor.start_service("php").unwrap();
    assert_eq!(supervisor.snapshot().unwrap()[0].variant.as_deref(), Some("52"));

    let log = resolve_log_path("php", LogKind::Stdout);
    let lines = common::wait_for_lines(&log, 1);
    assert_eq!(lines[0], "php52");

    // A new preference only applies on the next start.
    supervisor.set_preference("phpVersion", "53").unwrap();
    assert_eq!(supervisor.snapshot().unwrap()[0].variant.as_deref(), Some("52"));

    supervisor.stop_service("php").unwrap();
    supervisor.start_service("php").unwrap();
    assert_eq!(supervisor.snapshot().unwrap()[0].variant.as_deref(), Some("53"));

    let lines = common::wait_for_lines(&log, 2);
    assert_eq!(lines[1], "php53");
    supervisor.stop_service("php").unwrap();
}

#[test]
fn shutdown_is_bounded_by_its_timeout() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = supervisor_with(vec![
        ServiceDescriptor::new("database", "sh", ["-c", "trap '' TERM; sleep 30"])
            .with_startup_grace(Duration::from_millis(200))
            .with_stop_timeout(Duration::from_secs(3)),
    ]);
    supervisor.start_service("database").unwrap();
    let pid = supervisor.snapshot().unwrap()[0].pid.unwrap();

    let started = Instant::now();
    let report = supervisor.shutdown_within(Duration::from_millis(500));
    assert!(!report.completed);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The background stop still escalates to SIGKILL.
    wait_for_process_exit(pid);
}

#[test]
fn non_utf8_output_does_not_kill_a_running_service() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let supervisor = supervisor_with(vec![
        ServiceDescriptor::new(
            "web",
            "sh",
            [
                "-c",
                "printf 'ok\\n\\377\\376\\n'; sleep 0.5; while true; do echo tick; sleep 0.1; done",
            ],
        )
        .with_startup_grace(Duration::from_millis(100))
        .with_stop_timeout(Duration::from_secs(2)),
    ]);
    supervisor.start_service("web").unwrap();

    let log = resolve_log_path("web", LogKind::Stdout);
    let lines = common::wait_for_lines(&log, 6);
    assert_eq!(lines[0], "ok");
    assert!(lines.iter().skip(2).any(|line| line == "tick"));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(supervisor.refresh("web").unwrap(), ServiceState::Running);

    supervisor.stop_service("web").unwrap();
}
