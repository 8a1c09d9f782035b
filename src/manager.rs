//! Batch orchestration of lifecycle operations over the managed fleet.
//!
//! The manager owns the loaded configuration, the dependency plan, the
//! status store and the runtime records. All mutations run on the calling
//! thread; the only suspension points are the start/stop waits.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    config::{Config, ProcessConfiguration, load_config},
    error::SupervisorError,
    logs, plan,
    process::{ProcessRecord, ProcessStatus},
    selector,
    store::StatusStore,
    sys,
};

/// Per-component outcome of a batch operation: `Ok(true)` when the
/// operation was applied, `Ok(false)` when there was nothing to do.
pub type Outcome = Result<bool, SupervisorError>;

/// Ordered per-component outcomes, in the order the caller supplied.
pub type BatchOutcome = Vec<(String, Outcome)>;

/// Invoked once a component's outcome is final.
pub type OutcomeCallback<'a> = &'a mut dyn FnMut(&str, &Outcome);

/// Invoked before the manager pauses for a startup or shutdown wait.
pub type PauseCallback<'a> = &'a mut dyn FnMut(f64);

/// Keeps track of all managed components and gateways every operation.
pub struct Manager {
    config: Config,
    plan: Vec<String>,
    store: StatusStore,
    records: HashMap<String, ProcessRecord>,
}

impl Manager {
    /// Loads the configuration and status files and builds the manager.
    pub fn new(config_path: &Path, status_path: &Path) -> Result<Self, SupervisorError> {
        let config = load_config(config_path)?;
        let store = StatusStore::open(status_path)?;
        Self::with_store(config, store)
    }

    /// Builds a manager over an already loaded configuration and store.
    pub fn with_store(config: Config, store: StatusStore) -> Result<Self, SupervisorError> {
        let plan = plan::compute_plan(&config)?;
        let mut manager = Self {
            config,
            plan,
            store,
            records: HashMap::new(),
        };
        manager.reload()?;
        Ok(manager)
    }

    /// Identifiers in dependency order.
    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    /// Declared groups and their members.
    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.config.groups
    }

    /// Distinct namespaces across all configured uids.
    pub fn namespaces(&self) -> &BTreeSet<String> {
        &self.config.namespaces
    }

    /// Launch configuration for a uid, absent for detached components.
    pub fn configuration(&self, uid: &str) -> Option<&ProcessConfiguration> {
        self.config.processes.get(uid)
    }

    /// Runtime record for a uid.
    pub fn record(&self, uid: &str) -> Option<&ProcessRecord> {
        self.records.get(uid)
    }

    /// Identifiers known only to the status store, i.e. processes whose
    /// configuration has been removed since they were launched.
    pub fn detached_uids(&self) -> Vec<String> {
        let mut detached: Vec<String> = self
            .records
            .keys()
            .filter(|uid| !self.config.processes.contains_key(*uid))
            .cloned()
            .collect();
        detached.sort();
        detached
    }

    /// Resolves selector tokens into an ordered component list.
    pub fn select(&self, tokens: &[String]) -> Result<Vec<String>, SupervisorError> {
        selector::resolve(tokens, &self.plan, &self.config.groups, &self.detached_uids())
    }

    /// Reloads records from the status store, creating fresh records for
    /// configured components the store has never seen.
    pub fn reload(&mut self) -> Result<(), SupervisorError> {
        self.records = self.store.load()?;
        for uid in &self.plan {
            let configuration = &self.config.processes[uid];
            self.records
                .entry(uid.clone())
                .or_insert_with(|| ProcessRecord::fresh(uid, &configuration.typeid));
        }
        Ok(())
    }

    /// Derives the status of a component, mapping alive-but-unconfigured
    /// records to `DETACHED` and persisting any pid cleared on the way.
    pub fn status_of(&mut self, uid: &str) -> Option<ProcessStatus> {
        let configured = self.config.processes.contains_key(uid);
        let record = self.records.get_mut(uid)?;
        let pid_before = record.pid;
        let mut status = record.status();
        if !configured
            && matches!(status, ProcessStatus::Running | ProcessStatus::Disturbed)
        {
            status = ProcessStatus::Detached;
        }
        if record.pid != pid_before {
            debug!(uid, "clearing stale pid");
            let _ = self.store.save(record);
        }
        Some(status)
    }

    /// Resolves the application log of a q component, following roll
    /// breadcrumbs, and caches the result on the record.
    pub fn resolve_log(&mut self, uid: &str) -> Option<PathBuf> {
        let record = self.records.get_mut(uid)?;
        let resolved = logs::resolve_log(record.stdout.as_deref(), record.log.as_deref());
        if resolved != record.log {
            record.log = resolved.clone();
            let _ = self.store.save(record);
        }
        resolved
    }

    fn validate_preconditions(
        &self,
        configuration: &ProcessConfiguration,
    ) -> Result<(), SupervisorError> {
        let user = sys::username();
        if !configuration.sys_user.is_empty() && !configuration.sys_user.contains(&user) {
            return Err(SupervisorError::UserNotAllowed {
                uid: configuration.uid.clone(),
                user,
            });
        }

        for requirement in &configuration.requires {
            match self.records.get(requirement) {
                Some(required) if required.is_alive() => {}
                Some(_) => {
                    return Err(SupervisorError::RequirementNotRunning {
                        uid: configuration.uid.clone(),
                        requirement: requirement.clone(),
                    });
                }
                None => {
                    return Err(SupervisorError::UnknownRequirement {
                        uid: configuration.uid.clone(),
                        requirement: requirement.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Starts multiple components, batching startup waits into waves.
    ///
    /// Consecutive components with no `requires` edges among themselves are
    /// launched back to back and share a single pause of the wave's maximum
    /// `start_wait`; a component depending on a member of the running wave
    /// first flushes it. Outcomes are reported in input order; the store is
    /// updated before the next component is processed.
    pub fn start(
        &mut self,
        components: &[String],
        callback: OutcomeCallback<'_>,
        pause_callback: PauseCallback<'_>,
        arguments: Option<&str>,
    ) -> BatchOutcome {
        info!(user = %sys::username(), ?components, "starting components");

        let mut outcomes: BatchOutcome = Vec::with_capacity(components.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut check_list: Vec<String> = Vec::new();
        let mut start_wait = 0.0f64;

        for uid in components {
            let wave_dependency = self
                .config
                .processes
                .get(uid)
                .map(|configuration| {
                    configuration
                        .requires
                        .iter()
                        .any(|dep| check_list.contains(dep))
                        && configuration
                            .requires
                            .iter()
                            .any(|dep| components.contains(dep))
                })
                .unwrap_or(false);

            if wave_dependency {
                self.flush_wave(
                    &check_list,
                    start_wait,
                    &mut outcomes,
                    &positions,
                    callback,
                    pause_callback,
                );
                check_list.clear();
                start_wait = 0.0;
            }

            positions.insert(uid.clone(), outcomes.len());
            check_list.push(uid.clone());
            if let Some(configuration) = self.config.processes.get(uid) {
                start_wait = start_wait.max(configuration.start_wait);
            }

            let outcome = self.start_one(uid, arguments);
            outcomes.push((uid.clone(), outcome));
        }

        self.flush_wave(
            &check_list,
            start_wait,
            &mut outcomes,
            &positions,
            callback,
            pause_callback,
        );
        outcomes
    }

    /// Pauses for the wave's startup window, then re-verifies every member
    /// that reported a successful launch.
    fn flush_wave(
        &mut self,
        check_list: &[String],
        start_wait: f64,
        outcomes: &mut BatchOutcome,
        positions: &HashMap<String, usize>,
        callback: OutcomeCallback<'_>,
        pause_callback: PauseCallback<'_>,
    ) {
        let any_started = check_list
            .iter()
            .any(|uid| matches!(outcomes[positions[uid]].1, Ok(true)));

        if start_wait > 0.0 && any_started {
            pause_callback(start_wait);
            thread::sleep(Duration::from_secs_f64(start_wait));
        }

        for uid in check_list {
            let position = positions[uid];
            if matches!(outcomes[position].1, Ok(true))
                && let Some(record) = self.records.get_mut(uid)
                && let Err(err) = record.check_process()
            {
                let _ = self.store.save(record);
                outcomes[position].1 = Err(err);
            }
            callback(uid, &outcomes[position].1);
        }
    }

    fn start_one(&mut self, uid: &str, arguments: Option<&str>) -> Outcome {
        let Some(configuration) = self.config.processes.get(uid) else {
            return Err(SupervisorError::process(
                uid,
                "detached component cannot be started",
            ));
        };

        if self.records.get(uid).is_some_and(|record| record.is_alive()) {
            return Ok(false);
        }

        self.validate_preconditions(configuration)?;

        // The override applies to a per-launch copy, so the loaded
        // configuration is untouched on every exit path.
        let mut configuration = configuration.clone();
        if let Some(arguments) = arguments {
            configuration.command_args = Some(arguments.to_string());
        }

        let record = self
            .records
            .get_mut(uid)
            .expect("reload creates records for configured components");
        record.last_operation = Some("start".into());

        let result = record
            .initialize(&configuration, true)
            .and_then(|()| record.execute(&configuration));
        let saved = self.store.save(record);

        result?;
        saved?;
        Ok(true)
    }

    /// Stops multiple components: a graceful pass, a shared pause of the
    /// batch's maximum `stop_wait`, then a kill pass over survivors.
    /// Callers normally supply `components` in reverse dependency order.
    pub fn stop(
        &mut self,
        components: &[String],
        callback: OutcomeCallback<'_>,
        pause_callback: PauseCallback<'_>,
        force: bool,
    ) -> BatchOutcome {
        let operation = if force { "kill" } else { "stop" };
        info!(user = %sys::username(), ?components, operation, "stopping components");

        let mut outcomes: BatchOutcome = Vec::with_capacity(components.len());
        let mut stop_wait = 0.0f64;

        for uid in components {
            if let Some(configuration) = self.config.processes.get(uid) {
                stop_wait = stop_wait.max(configuration.stop_wait);
            }
            let outcome = self.stop_one(uid, force, operation);
            outcomes.push((uid.clone(), outcome));
        }

        if stop_wait > 0.0 {
            pause_callback(stop_wait);
            thread::sleep(Duration::from_secs_f64(stop_wait));
        }

        for (position, uid) in components.iter().enumerate() {
            if self
                .records
                .get(uid.as_str())
                .is_some_and(|record| record.is_alive())
            {
                outcomes[position].1 = self.stop_one(uid, true, operation);
            }
            callback(uid, &outcomes[position].1);
        }

        outcomes
    }

    fn stop_one(&mut self, uid: &str, force: bool, operation: &str) -> Outcome {
        let Some(record) = self.records.get_mut(uid) else {
            return Ok(false);
        };

        if !record.is_alive() {
            return Ok(false);
        }

        record.last_operation = Some(operation.to_string());
        let result = record.terminate(force);
        let saved = self.store.save(record);

        result?;
        saved?;
        Ok(true)
    }

    /// Sends the interrupt signal to multiple components. Single pass, no
    /// pause.
    pub fn interrupt(
        &mut self,
        components: &[String],
        callback: OutcomeCallback<'_>,
    ) -> BatchOutcome {
        info!(user = %sys::username(), ?components, "interrupting components");

        let mut outcomes: BatchOutcome = Vec::with_capacity(components.len());
        for uid in components {
            let outcome = self.interrupt_one(uid);
            callback(uid, &outcome);
            outcomes.push((uid.clone(), outcome));
        }
        outcomes
    }

    fn interrupt_one(&mut self, uid: &str) -> Outcome {
        let Some(record) = self.records.get_mut(uid) else {
            return Ok(false);
        };

        if !record.is_alive() {
            return Ok(false);
        }

        record.last_operation = Some("interrupt".into());
        let result = record.interrupt();
        let saved = self.store.save(record);

        result?;
        saved?;
        Ok(true)
    }

    /// Starts a single component in the foreground with an attached
    /// console; returns once the process exits.
    pub fn console(&mut self, uid: &str, arguments: Option<&str>) -> Outcome {
        info!(user = %sys::username(), uid, "starting interactive console");

        let Some(configuration) = self.config.processes.get(uid) else {
            return Err(SupervisorError::process(
                uid,
                "detached component cannot be started",
            ));
        };

        if self.records.get(uid).is_some_and(|record| record.is_alive()) {
            return Ok(false);
        }

        self.validate_preconditions(configuration)?;

        let mut configuration = configuration.clone();
        if let Some(arguments) = arguments {
            configuration.command_args = Some(arguments.to_string());
        }

        let record = self
            .records
            .get_mut(uid)
            .expect("reload creates records for configured components");
        record.last_operation = Some("console".into());

        let result = record
            .initialize(&configuration, false)
            .and_then(|()| record.interactive(&configuration));
        let saved = self.store.save(record);

        result?;
        saved?;
        Ok(true)
    }
}
