#![allow(dead_code)]

use std::{
    env, fs,
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use mnpp::{
    preferences::MemoryPreferenceStore,
    registry::{ServiceDescriptor, ServiceRegistry},
    supervisor::ServiceSupervisor,
};
use sysinfo::{Pid, ProcessesToUpdate, System};

pub struct HomeEnvGuard {
    previous: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl HomeEnvGuard {
    pub fn set(home: &Path) -> Self {
        let lock = mnpp::test_utils::env_lock();
        let previous = env::var("HOME").ok();
        unsafe {
            env::set_var("HOME", home);
        }
        mnpp::runtime::init();
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for HomeEnvGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => unsafe {
                env::set_var("HOME", value);
            },
            None => unsafe {
                env::remove_var("HOME");
            },
        }
        mnpp::runtime::init();
    }
}

/// Long-running stand-in for a real server binary.
pub fn sleeper(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(name, "sleep", ["30"])
        .with_startup_grace(Duration::from_millis(100))
        .with_stop_timeout(Duration::from_secs(2))
}

pub fn supervisor_with(descriptors: Vec<ServiceDescriptor>) -> ServiceSupervisor {
    let registry = ServiceRegistry::from_descriptors(descriptors).expect("valid registry");
    ServiceSupervisor::new(registry, Arc::new(MemoryPreferenceStore::new()))
        .expect("supervisor")
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(bytes) = fs::read(path) {
            let content = String::from_utf8_lossy(&bytes);
            let lines: Vec<_> = content.lines().map(|line| line.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} lines in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system
        .process(target)
        .is_some_and(|process| !matches!(process.status(), sysinfo::ProcessStatus::Zombie))
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Process {pid} still alive after timeout");
}
