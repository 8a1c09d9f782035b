//! Process entity: the persisted runtime record and single-process
//! lifecycle operations.
use std::{
    collections::BTreeMap,
    env, fs,
    fs::File,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, warn};

use crate::{
    config::{ProcessConfiguration, ProcessKind},
    error::SupervisorError,
    logs, sys,
};

/// Timestamp format used in per-launch std stream file names.
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%dT%H.%M.%S";

/// Derived status of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessStatus {
    /// Alive with an empty stderr.
    Running,
    /// Alive but has written to stderr since launch.
    Disturbed,
    /// Not running and either never started or stopped on request.
    Stopped,
    /// Died without a stop request.
    Terminated,
    /// Terminated or disturbed with a workspace-full diagnostic (q only).
    Wsfull,
    /// Alive but no longer present in the configuration.
    Detached,
}

impl ProcessStatus {
    /// Statuses for which resource queries make sense.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Running | ProcessStatus::Disturbed | ProcessStatus::Detached
        )
    }
}

/// Splits a command line into tokens with non-posix semantics: a quote
/// opens a grouping region only at a token boundary, the token ends at the
/// matching quote, and the quote glyphs themselves are kept verbatim;
/// backslashes are literal. A quote in the middle of a token is an ordinary
/// character. Used both for building spawn argv and for comparing against
/// the OS-reported command line, so both sides of that comparison agree.
pub fn split_command(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in command.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                // The token ends at the closing quote.
                tokens.push(std::mem::take(&mut current));
                in_token = false;
                quote = None;
            }
        } else if c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
        } else if (c == '"' || c == '\'') && !in_token {
            quote = Some(c);
            current.push(c);
            in_token = true;
        } else {
            current.push(c);
            in_token = true;
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Persisted runtime state of a single managed process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    /// Component identifier.
    pub uid: String,
    /// Type tag recorded at creation; selects status semantics on reload.
    pub typeid: String,
    /// Pid of the launched process, absent when not running.
    pub pid: Option<u32>,
    /// Exact command line handed to the OS at launch.
    pub executed_cmd: Option<String>,
    /// Resolved application log file (q processes only).
    pub log: Option<PathBuf>,
    /// Per-launch stdout file.
    pub stdout: Option<PathBuf>,
    /// Per-launch stderr file.
    pub stderr: Option<PathBuf>,
    /// Per-launch environment dump file.
    pub stdenv: Option<PathBuf>,
    /// Launch timestamp (UTC).
    pub started: Option<DateTime<Utc>>,
    /// OS user who launched the process.
    pub started_by: Option<String>,
    /// Stop timestamp (UTC).
    pub stopped: Option<DateTime<Utc>>,
    /// OS user who stopped the process.
    pub stopped_by: Option<String>,
    /// Last lifecycle operation applied through the manager.
    pub last_operation: Option<String>,
}

impl ProcessRecord {
    /// Creates a record for a component that has never been launched.
    pub fn fresh(uid: &str, typeid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            typeid: typeid.to_string(),
            pid: None,
            executed_cmd: None,
            log: None,
            stdout: None,
            stderr: None,
            stdenv: None,
            started: None,
            started_by: None,
            stopped: None,
            stopped_by: None,
            last_operation: None,
        }
    }

    /// Returns true when the recorded pid is alive and the OS-reported
    /// command line matches the recorded one.
    ///
    /// An empty tokenisation on either side skips the cross-check: some
    /// platforms refuse to report command lines, and a missing recorded
    /// command has nothing to compare against.
    pub fn is_alive(&self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        if !sys::pid_alive(pid) {
            return false;
        }
        let recorded = self
            .executed_cmd
            .as_deref()
            .map(split_command)
            .unwrap_or_default();
        let reported = sys::command_line(pid);
        reported.is_empty() || recorded.is_empty() || reported == recorded
    }

    /// Recomputes the status from liveness, stderr and the timestamps.
    ///
    /// Side effect: a pid the OS no longer confirms is cleared before
    /// returning; callers persist the record afterwards.
    pub fn status(&mut self) -> ProcessStatus {
        let base = if self.is_alive() {
            let disturbed = self
                .stderr
                .as_deref()
                .map(|path| !sys::is_empty(path))
                .unwrap_or(false);
            if disturbed {
                ProcessStatus::Disturbed
            } else {
                ProcessStatus::Running
            }
        } else if self.started.is_none() || self.stopped.is_some() {
            self.pid = None;
            ProcessStatus::Stopped
        } else {
            self.pid = None;
            ProcessStatus::Terminated
        };

        match ProcessKind::from_typeid(&self.typeid) {
            Some(ProcessKind::Q) => self.q_status(base),
            Some(ProcessKind::QBatch) => {
                let status = self.q_status(base);
                // A batch is expected to complete; dying is not an anomaly.
                if status == ProcessStatus::Terminated {
                    ProcessStatus::Stopped
                } else {
                    status
                }
            }
            _ => base,
        }
    }

    fn q_status(&self, base: ProcessStatus) -> ProcessStatus {
        if matches!(base, ProcessStatus::Terminated | ProcessStatus::Disturbed)
            && let Some(stderr) = self.stderr.as_deref()
            && logs::has_wsfull_marker(stderr)
        {
            return ProcessStatus::Wsfull;
        }
        base
    }

    /// Stamps the launch metadata and derives the per-launch file paths.
    pub fn initialize(
        &mut self,
        configuration: &ProcessConfiguration,
        init_std_paths: bool,
    ) -> Result<(), SupervisorError> {
        self.started = Some(Utc::now());
        self.started_by = Some(sys::username());
        self.stopped = None;
        self.stopped_by = None;

        fs::create_dir_all(&configuration.data_path)
            .map_err(|e| SupervisorError::process(&self.uid, e))?;
        fs::create_dir_all(&configuration.log_path)
            .map_err(|e| SupervisorError::process(&self.uid, e))?;

        if init_std_paths {
            let tstamp = self
                .started
                .expect("started stamped above")
                .format(TIMESTAMP_FORMAT);
            let file = |suffix: &str| {
                configuration
                    .log_path
                    .join(format!("{}_{}.{}", self.uid, tstamp, suffix))
            };
            self.stdout = Some(file("out"));
            self.stderr = Some(file("err"));
            self.stdenv = Some(file("env"));
        }
        Ok(())
    }

    /// Builds the child environment: the supervisor environment overlaid
    /// with the configuration vars and exported entries.
    fn bootstrap_environment(
        &self,
        configuration: &ProcessConfiguration,
    ) -> Result<BTreeMap<String, String>, SupervisorError> {
        let mut child_env: BTreeMap<String, String> = env::vars().collect();
        child_env.extend(configuration.vars.clone());
        child_env.extend(configuration.env.clone());

        if let Some(q) = &configuration.q
            && let Some(q_path) = &q.q_path
        {
            let path = child_env.get("PATH").cloned().unwrap_or_default();
            child_env.insert("PATH".into(), format!("{q_path}:{path}"));
        }

        if let Some(stdenv) = &self.stdenv {
            let mut dump = String::new();
            for (key, value) in &child_env {
                dump.push_str(&format!("{key}: {value}\n"));
            }
            fs::write(stdenv, dump).map_err(|e| SupervisorError::process(&self.uid, e))?;
        }

        Ok(child_env)
    }

    fn check_u_file(
        &self,
        configuration: &ProcessConfiguration,
    ) -> Result<(), SupervisorError> {
        if let Some(q) = &configuration.q
            && let Some(u_file) = &q.u_file
            && !u_file.is_file()
        {
            return Err(SupervisorError::process(
                &self.uid,
                format!("cannot locate uFile: {}", u_file.display()),
            ));
        }
        Ok(())
    }

    /// Launches the process detached in the background with redirected std
    /// streams.
    pub fn execute(
        &mut self,
        configuration: &ProcessConfiguration,
    ) -> Result<(), SupervisorError> {
        self.check_u_file(configuration)?;

        let full_cmd = configuration.full_cmd();
        let argv = split_command(&full_cmd);
        if argv.is_empty() {
            return Err(SupervisorError::process(&self.uid, "empty command"));
        }

        let child_env = self.bootstrap_environment(configuration)?;
        let stdout = self.stdout.as_ref().ok_or_else(|| {
            SupervisorError::process(&self.uid, "component was not initialized")
        })?;
        let stderr = self.stderr.as_ref().ok_or_else(|| {
            SupervisorError::process(&self.uid, "component was not initialized")
        })?;
        let stdout_file = File::create(stdout)
            .map_err(|e| SupervisorError::process(&self.uid, e))?;
        let stderr_file = File::create(stderr)
            .map_err(|e| SupervisorError::process(&self.uid, e))?;

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&configuration.bin_path)
            .env_clear()
            .envs(&child_env)
            .stdin(Stdio::null())
            .stdout(stdout_file)
            .stderr(stderr_file);
        // Detach from the supervisor's signal delivery; same session.
        #[cfg(unix)]
        command.process_group(0);

        debug!(uid = %self.uid, cmd = %full_cmd, "spawning");
        let mut child = command.spawn().map_err(|e| {
            SupervisorError::process(
                &self.uid,
                format!("error while executing '{full_cmd}': {e}"),
            )
        })?;

        self.pid = Some(child.id());
        self.executed_cmd = Some(full_cmd);
        self.log = None;

        if !configuration.cpu_affinity.is_empty()
            && let Err(err) = sys::set_affinity(child.id(), &configuration.cpu_affinity)
        {
            warn!(uid = %self.uid, %err, "failed to set cpu affinity");
        }

        if configuration.start_wait > 0.0 {
            thread::sleep(Duration::from_secs_f64(configuration.start_wait));
            if let Ok(Some(status)) = child.try_wait() {
                self.pid = None;
                return Err(SupervisorError::process(
                    &self.uid,
                    format!(
                        "finished prematurely with code {}",
                        status.code().unwrap_or(-1)
                    ),
                ));
            }
        } else {
            let status = child
                .wait()
                .map_err(|e| SupervisorError::process(&self.uid, e))?;
            self.pid = None;
            self.stopped = Some(Utc::now());
            if !status.success() {
                return Err(SupervisorError::process(
                    &self.uid,
                    format!("finished with code {}", status.code().unwrap_or(-1)),
                ));
            }
        }

        Ok(())
    }

    /// Foreground variant of [`execute`](Self::execute): inherits the
    /// supervisor's stdio and waits for completion, with the logging
    /// environment switched to console debugging.
    pub fn interactive(
        &mut self,
        configuration: &ProcessConfiguration,
    ) -> Result<(), SupervisorError> {
        self.check_u_file(configuration)?;

        let full_cmd = configuration.full_cmd();
        let argv = split_command(&full_cmd);
        if argv.is_empty() {
            return Err(SupervisorError::process(&self.uid, "empty command"));
        }

        let mut child_env = self.bootstrap_environment(configuration)?;
        child_env.insert("EC_LOG_DEST".into(), "FILE,STDERR,CONSOLE".into());
        child_env.insert("EC_LOG_LEVEL".into(), "DEBUG".into());

        self.executed_cmd = Some(full_cmd.clone());

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&configuration.bin_path)
            .env_clear()
            .envs(&child_env)
            .spawn()
            .map_err(|e| {
                SupervisorError::process(
                    &self.uid,
                    format!("error while executing '{full_cmd}': {e}"),
                )
            })?;

        self.pid = Some(child.id());

        if !configuration.cpu_affinity.is_empty()
            && let Err(err) = sys::set_affinity(child.id(), &configuration.cpu_affinity)
        {
            warn!(uid = %self.uid, %err, "failed to set cpu affinity");
        }

        let status = child
            .wait()
            .map_err(|e| SupervisorError::process(&self.uid, e))?;
        self.pid = None;
        self.stopped = Some(Utc::now());

        if !status.success() {
            return Err(SupervisorError::process(
                &self.uid,
                format!(
                    "finished prematurely with code {}",
                    status.code().unwrap_or(-1)
                ),
            ));
        }
        Ok(())
    }

    /// Sends the termination signal. A graceful pass keeps the pid so the
    /// batch layer can escalate; a forced pass clears it.
    pub fn terminate(&mut self, force: bool) -> Result<(), SupervisorError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        let result = if force {
            sys::force_kill(pid)
        } else {
            sys::terminate(pid)
        };
        result.map_err(|errno| {
            SupervisorError::process(
                &self.uid,
                format!("failed attempt to terminate process with pid {pid}: {errno}"),
            )
        })?;

        self.stopped = Some(Utc::now());
        self.stopped_by = Some(sys::username());
        if force {
            self.pid = None;
        }
        Ok(())
    }

    /// Sends the interrupt signal. No state change.
    pub fn interrupt(&self) -> Result<(), SupervisorError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        sys::interrupt(pid).map_err(|errno| {
            SupervisorError::process(
                &self.uid,
                format!("failed attempt to interrupt process with pid {pid}: {errno}"),
            )
        })
    }

    /// Confirms a previously launched process survived its startup window.
    pub fn check_process(&mut self) -> Result<(), SupervisorError> {
        if self.is_alive() {
            return Ok(());
        }
        self.pid = None;
        Err(SupervisorError::process(
            &self.uid,
            "component is not running after startup",
        ))
    }

    /// Cpu time in user mode, seconds; zero when not running.
    pub fn cpu_user(&mut self) -> f64 {
        match (self.status().is_running(), self.pid) {
            (true, Some(pid)) => sys::cpu_user(pid),
            _ => 0.0,
        }
    }

    /// Cpu time in system mode, seconds; zero when not running.
    pub fn cpu_system(&mut self) -> f64 {
        match (self.status().is_running(), self.pid) {
            (true, Some(pid)) => sys::cpu_system(pid),
            _ => 0.0,
        }
    }

    /// Resident memory in KiB; zero when not running.
    pub fn mem_rss(&mut self) -> u64 {
        match (self.status().is_running(), self.pid) {
            (true, Some(pid)) => sys::memory_rss(pid) / 1024,
            _ => 0,
        }
    }

    /// Virtual memory in KiB; zero when not running.
    pub fn mem_vms(&mut self) -> u64 {
        match (self.status().is_running(), self.pid) {
            (true, Some(pid)) => sys::memory_vms(pid) / 1024,
            _ => 0,
        }
    }

    /// Resident memory as a percentage of total memory.
    pub fn mem_usage(&mut self) -> f64 {
        match (self.status().is_running(), self.pid) {
            (true, Some(pid)) => sys::memory_percent(pid),
            _ => 0.0,
        }
    }
}
