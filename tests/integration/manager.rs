#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use common::{manager_with, scratch_paths, wait_until};
use quartermaster::{
    config::load_config_str, manager::Manager, process::ProcessStatus,
    store::StatusStore,
};
use tempfile::tempdir;

fn names(raw: &[&str]) -> Vec<String> {
    raw.iter().map(ToString::to_string).collect()
}

#[test]
fn child_environment_is_bootstrapped_and_dumped() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
eventDest = LOG,MONITOR
eventPath = /data/shared/events/

[group:core]
type = cmd
export = eventDest, eventPath
{}

[[core.hdb]]
command = /bin/sleep 60
startWait = 0.1
stopWait = 0.1
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let components = names(&["core.hdb"]);
    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);

    let stdenv = manager
        .record("core.hdb")
        .unwrap()
        .stdenv
        .clone()
        .expect("stdenv path derived on initialize");
    let dump = fs::read_to_string(stdenv).unwrap();
    assert!(dump.contains("EC_COMPONENT_ID: core.hdb"));
    assert!(dump.contains("EC_COMPONENT: hdb"));
    assert!(dump.contains("EC_GROUP: core"));
    assert!(dump.contains("EC_EVENT_DEST: LOG,MONITOR"));
    assert!(dump.contains("EC_EVENT_PATH: /data/shared/events/"));

    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, true);
}

#[test]
fn argument_override_applies_to_one_launch_only() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:core]
[[core.a]]
type = cmd
command = /bin/sleep
commandArgs = 60
startWait = 0.1
stopWait = 0.1
{}
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);
    let components = names(&["core.a"]);

    let outcomes =
        manager.start(&components, &mut |_, _| {}, &mut |_| {}, Some("45"));
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);

    assert_eq!(
        manager.record("core.a").unwrap().executed_cmd.as_deref(),
        Some("/bin/sleep 45")
    );
    // The loaded configuration keeps its own arguments.
    assert_eq!(
        manager
            .configuration("core.a")
            .unwrap()
            .command_args
            .as_deref(),
        Some("60")
    );

    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, true);
}

#[test]
fn records_are_rediscovered_by_a_fresh_manager() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:core]
[[core.a]]
type = cmd
command = /bin/sleep 60
startWait = 0.1
stopWait = 0.1
{}
"#,
        scratch_paths(&dir)
    );

    let pid = {
        let mut manager = manager_with(&dir, &content);
        let outcomes =
            manager.start(&names(&["core.a"]), &mut |_, _| {}, &mut |_| {}, None);
        assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
        manager.record("core.a").unwrap().pid.unwrap()
    };

    // A new supervisor over the same status store sees the running process
    // and can stop it.
    let mut manager = manager_with(&dir, &content);
    assert_eq!(manager.record("core.a").unwrap().pid, Some(pid));
    assert_eq!(manager.status_of("core.a"), Some(ProcessStatus::Running));

    let outcomes =
        manager.stop(&names(&["core.a"]), &mut |_, _| {}, &mut |_| {}, false);
    assert!(matches!(outcomes[0].1, Ok(true)));
    assert!(wait_until(
        || manager.status_of("core.a") == Some(ProcessStatus::Stopped),
        Duration::from_secs(2)
    ));
}

#[test]
fn removed_component_becomes_detached_and_can_be_stopped() {
    let dir = tempdir().unwrap();
    let full = format!(
        r#"
[group:core]
type = cmd
command = /bin/sleep 60
startWait = 0.1
stopWait = 0.1
{}

[[core.keep]]

[[core.gone]]
"#,
        scratch_paths(&dir)
    );

    {
        let mut manager = manager_with(&dir, &full);
        let outcomes =
            manager.start(&names(&["core.gone"]), &mut |_, _| {}, &mut |_| {}, None);
        assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
    }

    // Reload with a configuration that no longer defines core.gone.
    let trimmed = format!(
        r#"
[group:core]
type = cmd
command = /bin/sleep 60
stopWait = 0.1
{}

[[core.keep]]
"#,
        scratch_paths(&dir)
    );
    let config = load_config_str(&trimmed).unwrap();
    let store = StatusStore::open(&dir.path().join("qm.status")).unwrap();
    let mut manager = Manager::with_store(config, store).unwrap();

    assert_eq!(manager.detached_uids(), vec!["core.gone"]);
    assert_eq!(
        manager.status_of("core.gone"),
        Some(ProcessStatus::Detached)
    );

    // Detached components are addressable by exact uid and can be stopped,
    // but never started.
    let selected = manager.select(&names(&["core.gone"])).unwrap();
    assert_eq!(selected, vec!["core.gone"]);

    let outcomes = manager.start(&selected, &mut |_, _| {}, &mut |_| {}, None);
    assert!(outcomes[0].1.is_err());

    let outcomes = manager.stop(&selected, &mut |_, _| {}, &mut |_| {}, false);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
    assert!(wait_until(
        || manager.status_of("core.gone") == Some(ProcessStatus::Stopped),
        Duration::from_secs(2)
    ));
}

#[test]
fn last_operation_is_recorded_per_component() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:core]
[[core.a]]
type = cmd
command = /bin/sleep 60
startWait = 0.1
stopWait = 0.1
{}
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);
    let components = names(&["core.a"]);

    manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert_eq!(
        manager.record("core.a").unwrap().last_operation.as_deref(),
        Some("start")
    );

    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, false);
    assert_eq!(
        manager.record("core.a").unwrap().last_operation.as_deref(),
        Some("stop")
    );

    // The stamp survives a reload through the store.
    let mut manager = manager_with(&dir, &content);
    assert_eq!(
        manager.record("core.a").unwrap().last_operation.as_deref(),
        Some("stop")
    );
    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, true);
}

#[test]
fn disturbed_status_for_processes_writing_to_stderr() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("noisy.sh");
    fs::write(
        &script,
        "#!/bin/sh\necho 'grumble' >&2\nwhile true; do sleep 0.1; done\n",
    )
    .unwrap();
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();

    let content = format!(
        r#"
[group:core]
[[core.noisy]]
type = cmd
command = /bin/sh {script}
startWait = 0.2
stopWait = 0.1
{paths}
"#,
        script = script.display(),
        paths = scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);
    let components = names(&["core.noisy"]);

    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
    assert!(wait_until(
        || manager.status_of("core.noisy") == Some(ProcessStatus::Disturbed),
        Duration::from_secs(2)
    ));

    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, true);
}
