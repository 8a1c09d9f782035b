//! Platform adapter for process liveness, signalling and resource queries.
//!
//! Queries against a missing or vanished pid return the canonical "not
//! present" value (`false`, `None`, zero) instead of failing; genuine OS
//! failures during signalling surface as [`nix::errno::Errno`] values which
//! callers wrap into process errors.
use std::{fs, path::Path};

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
    unistd::{Pid, User, getuid},
};
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::debug;

/// Zombies hold a pid without running; a supervisor that never joins its
/// children must not count them as alive.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Returns true when a process with the given pid exists and is not a
/// zombie.
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => !is_zombie(pid),
        // EPERM means the pid exists but belongs to another user.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Returns the command line the OS reports for a pid, empty when unavailable.
pub fn command_line(pid: u32) -> Vec<String> {
    let mut system = System::new();
    system.refresh_processes(
        ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]),
        true,
    );
    system
        .process(SysPid::from_u32(pid))
        .map(|process| {
            process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Sends the graceful termination signal to a pid.
pub fn terminate(pid: u32) -> Result<(), Errno> {
    debug!(pid, "sending SIGTERM");
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
}

/// Sends the unconditional kill signal to a pid.
pub fn force_kill(pid: u32) -> Result<(), Errno> {
    debug!(pid, "sending SIGKILL");
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
}

/// Sends the interrupt signal to a pid.
pub fn interrupt(pid: u32) -> Result<(), Errno> {
    debug!(pid, "sending SIGINT");
    kill(Pid::from_raw(pid as i32), Signal::SIGINT)
}

/// Pins a process to the given cpu ids. Best effort; unsupported platforms
/// leave the affinity untouched.
#[cfg(target_os = "linux")]
pub fn set_affinity(pid: u32, cpus: &[usize]) -> Result<(), Errno> {
    use nix::sched::{CpuSet, sched_setaffinity};

    if cpus.is_empty() {
        return Ok(());
    }
    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)?;
    }
    sched_setaffinity(Pid::from_raw(pid as i32), &set)
}

/// Pins a process to the given cpu ids. Best effort; unsupported platforms
/// leave the affinity untouched.
#[cfg(not(target_os = "linux"))]
pub fn set_affinity(_pid: u32, cpus: &[usize]) -> Result<(), Errno> {
    if !cpus.is_empty() {
        debug!("cpu affinity is not supported on this platform");
    }
    Ok(())
}

/// Returns the name of the invoking OS user.
pub fn username() -> String {
    User::from_uid(getuid())
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "unknown".into()))
}

#[cfg(target_os = "linux")]
fn proc_stat_times(pid: u32) -> Option<(f64, f64)> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Fields after the parenthesised comm, which may itself contain spaces.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are fields 14 and 15 of the stat line; two leading
    // fields were consumed with the pid and comm.
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;
    let ticks = nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .unwrap_or(100) as f64;
    Some((utime / ticks, stime / ticks))
}

/// Returns the cpu time in user mode for a pid, in seconds.
#[cfg(target_os = "linux")]
pub fn cpu_user(pid: u32) -> f64 {
    proc_stat_times(pid).map(|(user, _)| user).unwrap_or(0.0)
}

/// Returns the cpu time in user mode for a pid, in seconds.
#[cfg(not(target_os = "linux"))]
pub fn cpu_user(_pid: u32) -> f64 {
    0.0
}

/// Returns the cpu time in system mode for a pid, in seconds.
#[cfg(target_os = "linux")]
pub fn cpu_system(pid: u32) -> f64 {
    proc_stat_times(pid).map(|(_, sys)| sys).unwrap_or(0.0)
}

/// Returns the cpu time in system mode for a pid, in seconds.
#[cfg(not(target_os = "linux"))]
pub fn cpu_system(_pid: u32) -> f64 {
    0.0
}

fn refreshed_process_system(pid: u32) -> System {
    let mut system = System::new();
    system.refresh_processes(
        ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]),
        true,
    );
    system
}

/// Returns the resident set size of a pid in bytes, zero when unavailable.
pub fn memory_rss(pid: u32) -> u64 {
    refreshed_process_system(pid)
        .process(SysPid::from_u32(pid))
        .map(|process| process.memory())
        .unwrap_or(0)
}

/// Returns the virtual memory size of a pid in bytes, zero when unavailable.
pub fn memory_vms(pid: u32) -> u64 {
    refreshed_process_system(pid)
        .process(SysPid::from_u32(pid))
        .map(|process| process.virtual_memory())
        .unwrap_or(0)
}

/// Returns the resident memory of a pid as a percentage of total memory.
pub fn memory_percent(pid: u32) -> f64 {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return 0.0;
    }
    memory_rss(pid) as f64 / total as f64 * 100.0
}

/// Returns the size of a file in bytes, zero for missing or non-file paths.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Returns true when a path is missing or is an empty regular file.
pub fn is_empty(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() == 0,
        Err(_) => true,
    }
}
