use std::{path::Path, process};

use chrono::{DateTime, Utc};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use quartermaster::{
    cli::{Cli, Commands, parse_args},
    error::SupervisorError,
    logs,
    manager::{BatchOutcome, Manager, Outcome},
    sys,
};

const HLINE: &str = "--------------------------------------------------------------------------------";

fn main() {
    let args = parse_args();
    init_logging(&args);
    register_signal_handler();

    match run(args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            error!("{err}");
            eprintln!("{err}");
            process::exit(2);
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Keyboard interrupts are absorbed by the shell layer so that an impatient
/// Ctrl-C never abandons an in-flight batch operation; children live in
/// their own process groups and receive terminal signals directly.
fn register_signal_handler() {
    if let Err(err) = ctrlc::set_handler(|| {}) {
        debug!("failed to install interrupt handler: {err}");
    }
}

fn run(args: Cli) -> Result<i32, SupervisorError> {
    let mut manager = Manager::new(Path::new(&args.config), Path::new(&args.status))?;

    match args.command {
        Commands::Info {
            components,
            filter,
            json,
        } => cmd_info(&mut manager, &components, filter.as_deref(), json),
        Commands::Details { components } => cmd_details(&mut manager, &components),
        Commands::Start {
            components,
            arguments,
        } => {
            let selected = manager.select(&components)?;
            Ok(apply_start(&mut manager, &selected, arguments.as_deref()))
        }
        Commands::Stop { components } => {
            let mut selected = manager.select(&components)?;
            selected.reverse();
            Ok(apply_stop(&mut manager, &selected, false))
        }
        Commands::Kill { components } => {
            let mut selected = manager.select(&components)?;
            selected.reverse();
            Ok(apply_stop(&mut manager, &selected, true))
        }
        Commands::Restart {
            components,
            arguments,
        } => {
            let selected = manager.select(&components)?;
            let mut reversed = selected.clone();
            reversed.reverse();
            let code = apply_stop(&mut manager, &reversed, false);
            if code != 0 {
                return Ok(code);
            }
            Ok(apply_start(&mut manager, &selected, arguments.as_deref()))
        }
        Commands::Interrupt { components } => {
            let mut selected = manager.select(&components)?;
            selected.reverse();
            println!("Interrupting components...");
            let outcomes = manager.interrupt(&selected, &mut print_outcome);
            Ok(summarize(&manager, "interrupt", &outcomes))
        }
        Commands::Console {
            component,
            arguments,
        } => {
            let selected = manager.select(&[component])?;
            if selected.len() != 1 {
                return Err(SupervisorError::SelectorError(
                    "command 'console' can only be performed on a single component"
                        .into(),
                ));
            }
            println!("Starting interactive console...");
            match manager.console(&selected[0], arguments.as_deref()) {
                Ok(true) => Ok(0),
                Ok(false) => {
                    println!("\t{:<30}\tSkipped", selected[0]);
                    Ok(1)
                }
                Err(err) => {
                    eprintln!("{err}");
                    Ok(1)
                }
            }
        }
        Commands::Log { components } => cmd_show_files(&mut manager, &components, FileKind::Log),
        Commands::Out { components } => cmd_show_files(&mut manager, &components, FileKind::Out),
        Commands::Err { components } => cmd_show_files(&mut manager, &components, FileKind::Err),
    }
}

fn print_outcome(uid: &str, outcome: &Outcome) {
    match outcome {
        Ok(true) => println!("\t{uid:<30}\tOK"),
        Ok(false) => println!("\t{uid:<30}\tSkipped"),
        Err(_) => println!("\t{uid:<30}\tFailed"),
    }
}

fn print_pause(delay: f64) {
    if delay >= 1.0 {
        println!("  Waiting for: {delay}s");
    }
}

fn apply_start(manager: &mut Manager, components: &[String], arguments: Option<&str>) -> i32 {
    println!("Starting components...");
    let outcomes = manager.start(components, &mut print_outcome, &mut print_pause, arguments);
    summarize(manager, "start", &outcomes)
}

fn apply_stop(manager: &mut Manager, components: &[String], force: bool) -> i32 {
    let operation = if force { "kill" } else { "stop" };
    println!(
        "{}",
        if force {
            "Killing components..."
        } else {
            "Stopping components..."
        }
    );
    let outcomes = manager.stop(components, &mut print_outcome, &mut print_pause, force);
    summarize(manager, operation, &outcomes)
}

/// Prints failure details for every failed outcome, with the captured
/// stderr of the component, and derives the process exit code.
fn summarize(manager: &Manager, operation: &str, outcomes: &BatchOutcome) -> i32 {
    let mut failed = false;

    for (uid, outcome) in outcomes {
        if let Err(err) = outcome {
            failed = true;
            println!("{HLINE}");
            println!("Failed to {operation}: {uid}");
            println!("{err}");

            if let Some(stderr) = manager.record(uid).and_then(|r| r.stderr.clone()) {
                println!("\nCaptured stderr:");
                let _ = logs::show_file(&stderr);
            }
        }
    }

    if failed {
        println!("{HLINE}");
        1
    } else {
        0
    }
}

fn format_timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.format("%Y.%m.%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn cmd_info(
    manager: &mut Manager,
    components: &[String],
    filter: Option<&str>,
    json: bool,
) -> Result<i32, SupervisorError> {
    // An empty selector means the whole fleet.
    let selected = if components.is_empty() {
        manager.select(&["*".to_string()])?
    } else {
        manager.select(components)?
    };
    let mut selected = selected;
    selected.sort();

    let status_filter: Option<Vec<String>> = filter.map(|raw| {
        raw.split('#')
            .map(|token| token.trim().to_ascii_uppercase())
            .filter(|token| !token.is_empty())
            .collect()
    });

    let mut rows = Vec::new();
    for uid in &selected {
        let Some(status) = manager.status_of(uid) else {
            continue;
        };
        if let Some(allowed) = &status_filter
            && !allowed.contains(&status.to_string())
        {
            continue;
        }
        let record = manager.record(uid).expect("status derived from record");
        let port = manager
            .configuration(uid)
            .and_then(|c| c.q.as_ref())
            .map(|q| q.port);
        rows.push((
            uid.clone(),
            record.typeid.clone(),
            record.pid,
            port,
            status,
            format_timestamp(record.started),
            format_timestamp(record.stopped),
            record.last_operation.clone().unwrap_or_default(),
        ));
    }

    if json {
        let payload: Vec<serde_json::Value> = rows
            .iter()
            .map(|(uid, typeid, pid, port, status, started, stopped, last_operation)| {
                serde_json::json!({
                    "uid": uid,
                    "typeid": typeid,
                    "pid": pid,
                    "port": port,
                    "status": status.to_string(),
                    "started": started,
                    "stopped": stopped,
                    "lastOperation": last_operation,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "[]".into())
        );
        return Ok(0);
    }

    let header = format!(
        "{:<18} {:<5} {:>7} {:>7} {:<11} {:<19} {:<19} {:<10}",
        "uid", "type", "pid", "port", "status", "started", "stopped", "lastOp"
    );
    println!("{header}");
    println!("{}", "-".repeat(header.len()));
    for (uid, typeid, pid, port, status, started, stopped, last_operation) in rows {
        println!(
            "{:<18} {:<5} {:>7} {:>7} {:<11} {:<19} {:<19} {:<10}",
            uid,
            typeid,
            pid.map(|p| p.to_string()).unwrap_or_default(),
            port.map(|p| p.to_string()).unwrap_or_default(),
            status.to_string(),
            started,
            stopped,
            last_operation,
        );
    }
    Ok(0)
}

fn cmd_details(
    manager: &mut Manager,
    components: &[String],
) -> Result<i32, SupervisorError> {
    let mut selected = manager.select(components)?;
    selected.sort();

    println!("{HLINE}");
    for uid in &selected {
        let Some(status) = manager.status_of(uid) else {
            continue;
        };
        let record = manager.record(uid).expect("status derived from record");
        println!("Component: {uid}");
        println!("\t{:<20}\t{}", "typeid", record.typeid);
        println!("\t{:<20}\t{status}", "status");
        println!(
            "\t{:<20}\t{}",
            "pid",
            record.pid.map(|p| p.to_string()).unwrap_or_default()
        );
        println!(
            "\t{:<20}\t{}",
            "executedCmd",
            record.executed_cmd.clone().unwrap_or_default()
        );
        for (label, path) in [
            ("log", &record.log),
            ("stdout", &record.stdout),
            ("stderr", &record.stderr),
            ("stdenv", &record.stdenv),
        ] {
            println!(
                "\t{:<20}\t{}",
                label,
                path.as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
        }
        println!("\t{:<20}\t{}", "started", format_timestamp(record.started));
        println!(
            "\t{:<20}\t{}",
            "startedBy",
            record.started_by.clone().unwrap_or_default()
        );
        println!("\t{:<20}\t{}", "stopped", format_timestamp(record.stopped));
        println!(
            "\t{:<20}\t{}",
            "stoppedBy",
            record.stopped_by.clone().unwrap_or_default()
        );

        if status.is_running()
            && let Some(pid) = manager.record(uid).and_then(|r| r.pid)
        {
            println!("\t{:<20}\t{:.3}", "cpuUser", sys::cpu_user(pid));
            println!("\t{:<20}\t{:.3}", "cpuSys", sys::cpu_system(pid));
            println!("\t{:<20}\t{}", "memRss", sys::memory_rss(pid) / 1024);
            println!("\t{:<20}\t{}", "memVms", sys::memory_vms(pid) / 1024);
            println!("\t{:<20}\t{:.3}", "memUsage", sys::memory_percent(pid));
        }

        println!("\nConfiguration:");
        match manager.configuration(uid) {
            None => println!("\t<< Unavailable >>"),
            Some(configuration) => {
                println!("\t{:<20}\t{}", "command", configuration.command);
                println!(
                    "\t{:<20}\t{}",
                    "commandArgs",
                    configuration.command_args.clone().unwrap_or_default()
                );
                println!(
                    "\t{:<20}\t{}",
                    "requires",
                    configuration
                        .requires
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                println!(
                    "\t{:<20}\t{}",
                    "binPath",
                    configuration.bin_path.display()
                );
                println!(
                    "\t{:<20}\t{}",
                    "dataPath",
                    configuration.data_path.display()
                );
                println!("\t{:<20}\t{}", "logPath", configuration.log_path.display());
                println!(
                    "\t{:<20}\t{}",
                    "cpuAffinity",
                    configuration
                        .cpu_affinity
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                println!("\t{:<20}\t{}", "startWait", configuration.start_wait);
                println!("\t{:<20}\t{}", "stopWait", configuration.stop_wait);
                println!(
                    "\t{:<20}\t{}",
                    "sysUser",
                    configuration.sys_user.join(", ")
                );
                if let Some(q) = &configuration.q {
                    println!("\t{:<20}\t{}", "port", q.port);
                    println!("\t{:<20}\t{}", "multithreaded", q.multithreaded);
                    println!("\t{:<20}\t{}", "libs", q.libs.join(", "));
                    println!("\t{:<20}\t{}", "commonLibs", q.common_libs.join(", "));
                    println!(
                        "\t{:<20}\t{}",
                        "memCap",
                        q.mem_cap.map(|c| c.to_string()).unwrap_or_default()
                    );
                }
            }
        }
        println!("{HLINE}");
    }
    Ok(0)
}

enum FileKind {
    Log,
    Out,
    Err,
}

fn cmd_show_files(
    manager: &mut Manager,
    components: &[String],
    kind: FileKind,
) -> Result<i32, SupervisorError> {
    let mut selected = manager.select(components)?;
    selected.sort();

    for uid in &selected {
        let path = match kind {
            FileKind::Log => manager.resolve_log(uid),
            FileKind::Out => manager.record(uid).and_then(|r| r.stdout.clone()),
            FileKind::Err => manager.record(uid).and_then(|r| r.stderr.clone()),
        };

        match path {
            Some(path) => {
                let viewed = logs::show_file(&path).unwrap_or(false);
                println!(
                    "\t{:<30}\t{:<10}\t{}",
                    uid,
                    if viewed { "Viewed" } else { "Skipped" },
                    path.display()
                );
            }
            None => println!("\t{:<30}\t{:<10}", uid, "Skipped"),
        }
    }
    Ok(0)
}
