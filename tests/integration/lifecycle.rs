#[path = "common/mod.rs"]
mod common;

use std::{cell::RefCell, fs, os::unix::fs::PermissionsExt, time::Duration};

use common::{is_process_alive, manager_with, scratch_paths, wait_until};
use quartermaster::process::ProcessStatus;
use tempfile::tempdir;

fn names(raw: &[&str]) -> Vec<String> {
    raw.iter().map(ToString::to_string).collect()
}

#[test]
fn start_then_stop_leaves_every_component_stopped() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:core]
type = cmd
command = /bin/sleep 60
startWait = 0.2
stopWait = 0.2
{}

[[core.a]]

[[core.b]]
requires = a
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let components = names(&["core.a", "core.b"]);
    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
    assert!(matches!(outcomes[1].1, Ok(true)), "{:?}", outcomes[1].1);

    for uid in &components {
        assert_eq!(manager.status_of(uid), Some(ProcessStatus::Running));
        let record = manager.record(uid).unwrap();
        assert!(record.pid.is_some());
        assert!(record.executed_cmd.is_some());
        assert!(record.stdout.as_ref().unwrap().exists());
        assert!(record.stderr.as_ref().unwrap().exists());
        assert!(record.stdenv.as_ref().unwrap().exists());
    }

    let pids: Vec<u32> = components
        .iter()
        .map(|uid| manager.record(uid).unwrap().pid.unwrap())
        .collect();

    let mut reversed = components.clone();
    reversed.reverse();
    let outcomes = manager.stop(&reversed, &mut |_, _| {}, &mut |_| {}, false);
    assert!(outcomes.iter().all(|(_, o)| matches!(o, Ok(true))));

    for uid in &components {
        assert!(
            wait_until(
                || manager.status_of(uid) == Some(ProcessStatus::Stopped),
                Duration::from_secs(2)
            ),
            "{uid} should settle to STOPPED"
        );
    }
    for pid in pids {
        assert!(
            wait_until(|| !is_process_alive(pid), Duration::from_secs(2)),
            "pid {pid} should be gone"
        );
    }
}

#[test]
fn start_batches_independent_components_into_one_wave() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:core]
type = cmd
command = /bin/sleep 60
stopWait = 0.1
{}

[[core.a]]
startWait = 0.3

[[core.b]]
startWait = 0.1

[[core.c]]
startWait = 0.1
requires = b
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let events: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let components = names(&["core.a", "core.b", "core.c"]);
    let outcomes = manager.start(
        &components,
        &mut |uid, _| events.borrow_mut().push(format!("done:{uid}")),
        &mut |delay| events.borrow_mut().push(format!("pause:{delay}")),
        None,
    );
    assert!(outcomes.iter().all(|(_, o)| matches!(o, Ok(true))));

    // a and b share one wave paced by the larger startWait; c waits on its
    // own wave after b has settled.
    assert_eq!(
        events.into_inner(),
        vec![
            "pause:0.3",
            "done:core.a",
            "done:core.b",
            "pause:0.1",
            "done:core.c"
        ]
    );

    let mut reversed = components.clone();
    reversed.reverse();
    manager.stop(&reversed, &mut |_, _| {}, &mut |_| {}, true);
}

#[test]
fn stop_escalates_to_kill_for_term_resistant_processes() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("stubborn.sh");
    fs::write(&script, "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 0.1; done\n")
        .unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();

    let content = format!(
        r#"
[group:core]
[[core.stubborn]]
type = cmd
command = /bin/sh {script}
startWait = 0.2
stopWait = 0.3
{paths}
"#,
        script = script.display(),
        paths = scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let components = names(&["core.stubborn"]);
    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);
    let pid = manager.record("core.stubborn").unwrap().pid.unwrap();

    let outcomes = manager.stop(&components, &mut |_, _| {}, &mut |_| {}, false);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);

    assert!(
        wait_until(|| !is_process_alive(pid), Duration::from_secs(2)),
        "force kill should end a TERM-resistant process"
    );
    assert!(wait_until(
        || manager.status_of("core.stubborn") == Some(ProcessStatus::Stopped),
        Duration::from_secs(2)
    ));
}

#[test]
fn premature_exit_within_start_wait_is_an_error() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("flaky.sh");
    fs::write(&script, "#!/bin/sh\nexit 3\n").unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();

    let content = format!(
        r#"
[group:core]
[[core.flaky]]
type = cmd
command = /bin/sh {script}
startWait = 0.3
{paths}
"#,
        script = script.display(),
        paths = scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let outcomes =
        manager.start(&names(&["core.flaky"]), &mut |_, _| {}, &mut |_| {}, None);
    match &outcomes[0].1 {
        Err(err) => assert!(err.to_string().contains("prematurely"), "{err}"),
        other => panic!("expected premature exit error, got {other:?}"),
    }
    assert_eq!(manager.record("core.flaky").unwrap().pid, None);
}

#[test]
fn zero_start_wait_runs_to_completion() {
    let dir = tempdir().unwrap();
    let content = format!(
        r#"
[group:eod]
[[eod.report]]
type = b
command = /bin/sleep 0.1
startWait = 0
{}
"#,
        scratch_paths(&dir)
    );
    let mut manager = manager_with(&dir, &content);

    let outcomes =
        manager.start(&names(&["eod.report"]), &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)), "{:?}", outcomes[0].1);

    let record = manager.record("eod.report").unwrap();
    assert_eq!(record.pid, None);
    assert!(record.stopped.is_some());
    assert_eq!(manager.status_of("eod.report"), Some(ProcessStatus::Stopped));
}

#[test]
fn second_start_is_skipped_while_running() {
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

    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(true)));

    let outcomes = manager.start(&components, &mut |_, _| {}, &mut |_| {}, None);
    assert!(matches!(outcomes[0].1, Ok(false)));

    manager.stop(&components, &mut |_, _| {}, &mut |_| {}, true);
}
