#[path = "common/mod.rs"]
mod common;

use std::{fs, thread, time::Duration};

use common::{HomeEnvGuard, is_process_alive, wait_for_path, wait_for_process_exit};
use mnpp::{
    registry::ServiceDescriptor,
    runner::{ProcessPoll, ProcessRunner},
};
use tempfile::tempdir;

#[test]
fn stop_kills_the_whole_process_tree() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let pid_file = temp.path().join("worker.pid");

    // The parent forks a worker, records its PID and then idles, like a
    // master/worker server such as nginx or php-fpm.
    let script = format!(
        "sleep 30 & echo $! > {}; wait",
        pid_file.display()
    );
    let launch = ServiceDescriptor::new("web", "sh", ["-c", script.as_str()])
        .with_startup_grace(Duration::from_millis(100))
        .resolve(None);

    let mut runner = ProcessRunner::new("web");
    let leader = runner.start(&launch).unwrap().pid();
    wait_for_path(&pid_file);
    let worker: u32 = fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_process_alive(worker));

    runner.stop(Duration::from_secs(2)).unwrap();
    wait_for_process_exit(leader);
    wait_for_process_exit(worker);
}

#[test]
fn orphaned_children_are_swept_after_leader_exits_on_term() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let pid_file = temp.path().join("child.pid");

    // The leader exits promptly on SIGTERM while its child ignores it.
    let script = format!(
        "sh -c \"trap '' TERM; sleep 30\" & echo $! > {}; trap 'exit 0' TERM; while true; do sleep 0.1; done",
        pid_file.display()
    );
    let launch = ServiceDescriptor::new("database", "sh", ["-c", script.as_str()])
        .with_startup_grace(Duration::from_millis(100))
        .resolve(None);

    let mut runner = ProcessRunner::new("database");
    runner.start(&launch).unwrap();
    wait_for_path(&pid_file);
    let child: u32 = fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let outcome = runner.stop(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(outcome.code, Some(0));
    wait_for_process_exit(child);
}

#[test]
fn dropping_a_runner_kills_its_process() {
    let temp = tempdir().unwrap();
    let _guard = HomeEnvGuard::set(temp.path());
    let launch = ServiceDescriptor::new("php", "sleep", ["30"])
        .with_startup_grace(Duration::from_millis(50))
        .resolve(None);

    let pid = {
        let mut runner = ProcessRunner::new("php");
        let pid = runner.start(&launch).unwrap().pid();
        assert_eq!(runner.poll(), Some(ProcessPoll::Running));
        pid
    };

    thread::sleep(Duration::from_millis(50));
    wait_for_process_exit(pid);
}
