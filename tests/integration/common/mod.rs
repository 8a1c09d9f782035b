use std::{
    thread,
    time::{Duration, Instant},
};

use quartermaster::{
    config::load_config_str, manager::Manager, store::StatusStore, sys,
};
use tempfile::TempDir;

/// Builds a manager over an inline configuration and a store inside `dir`.
pub fn manager_with(dir: &TempDir, content: &str) -> Manager {
    let config = load_config_str(content).expect("configuration should load");
    let store =
        StatusStore::open(&dir.path().join("qm.status")).expect("store should open");
    Manager::with_store(config, store).expect("manager should build")
}

/// Configuration preamble pointing the scratch paths into `dir`.
pub fn scratch_paths(dir: &TempDir) -> String {
    format!(
        "dataPath = {0}/data\nlogPath = {0}/log\n",
        dir.path().display()
    )
}

pub fn is_process_alive(pid: u32) -> bool {
    sys::pid_alive(pid)
}

/// Polls a condition until it holds or the timeout expires.
pub fn wait_until<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}
