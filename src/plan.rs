//! Startup-order planning over the component dependency graph.
use std::collections::{HashMap, VecDeque};

use crate::config::Config;
use crate::error::SupervisorError;

/// Computes a startup order consistent with every `requires` edge.
///
/// Classic Kahn topological sort. The ready queue is seeded and drained in
/// configuration insertion order, which makes the result deterministic for a
/// given file; callers and tests rely on that.
pub fn compute_plan(config: &Config) -> Result<Vec<String>, SupervisorError> {
    let mut dependants: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut ready: VecDeque<&str> = VecDeque::new();

    for uid in &config.order {
        let process = &config.processes[uid];
        if process.requires.contains(uid) {
            return Err(SupervisorError::SelfDependency { uid: uid.clone() });
        }
        dependants.entry(uid.as_str()).or_default();
        pending.insert(uid.as_str(), process.requires.len());
    }

    for uid in &config.order {
        let process = &config.processes[uid];
        if process.requires.is_empty() {
            ready.push_back(uid.as_str());
        } else {
            for requirement in &process.requires {
                if !config.processes.contains_key(requirement) {
                    return Err(SupervisorError::UnknownRequirement {
                        uid: uid.clone(),
                        requirement: requirement.clone(),
                    });
                }
                dependants
                    .get_mut(requirement.as_str())
                    .expect("requirement seeded above")
                    .push(uid.as_str());
            }
        }
    }

    let mut ordered = Vec::with_capacity(config.order.len());
    while let Some(uid) = ready.pop_front() {
        ordered.push(uid.to_string());
        for &dependant in &dependants[uid] {
            let remaining = pending
                .get_mut(dependant)
                .expect("dependant seeded above");
            *remaining -= 1;
            if *remaining == 0 {
                ready.push_back(dependant);
            }
        }
    }

    if ordered.len() != config.order.len() {
        let stuck: Vec<&str> = config
            .order
            .iter()
            .map(String::as_str)
            .filter(|uid| pending[uid] > 0)
            .collect();
        return Err(SupervisorError::DependencyCycle {
            uids: stuck.join(", "),
        });
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    const SAMPLE: &str = r#"
[group:core]
type = cmd
command = run

[[core.hdb]]

[[core.rdb]]
requires = hdb

[[core.monitor]]
requires = rdb, hdb

[group:cep]
type = cmd
command = run

[[cep.cep_7]]
requires = core.rdb

[[cep.python]]
"#;

    #[test]
    fn plan_is_a_dependency_consistent_permutation() {
        let config = load_config_str(SAMPLE).unwrap();
        let plan = compute_plan(&config).unwrap();
        assert_eq!(plan.len(), config.order.len());

        for uid in &config.order {
            let position = plan.iter().position(|p| p == uid).unwrap();
            for requirement in &config.processes[uid].requires {
                let required_position = plan.iter().position(|p| p == requirement).unwrap();
                assert!(
                    required_position < position,
                    "{requirement} must precede {uid}"
                );
            }
        }
    }

    #[test]
    fn plan_follows_insertion_order_for_ties() {
        let config = load_config_str(SAMPLE).unwrap();
        let plan = compute_plan(&config).unwrap();
        assert_eq!(
            plan,
            vec![
                "core.hdb",
                "cep.python",
                "core.rdb",
                "core.monitor",
                "cep.cep_7"
            ]
        );
    }

    #[test]
    fn plan_is_deterministic_across_reloads() {
        let first = compute_plan(&load_config_str(SAMPLE).unwrap()).unwrap();
        let second = compute_plan(&load_config_str(SAMPLE).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let content = r#"
[group:core]
type = cmd
command = run

[[core.hdb]]
requires = hdb
"#;
        let config = load_config_str(content).unwrap();
        match compute_plan(&config) {
            Err(SupervisorError::SelfDependency { uid }) => assert_eq!(uid, "core.hdb"),
            other => panic!("expected self dependency error, got {other:?}"),
        }
    }

    #[test]
    fn cycle_names_participants() {
        let content = r#"
[group:a]
type = cmd
command = run

[[a.x]]
requires = y

[[a.y]]
requires = x
"#;
        let config = load_config_str(content).unwrap();
        match compute_plan(&config) {
            Err(SupervisorError::DependencyCycle { uids }) => {
                assert!(uids.contains("a.x"));
                assert!(uids.contains("a.y"));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn dangling_requirement_names_target() {
        let content = r#"
[group:core]
type = cmd
command = run

[[core.rdb]]
requires = does.notexist
"#;
        let config = load_config_str(content).unwrap();
        match compute_plan(&config) {
            Err(SupervisorError::UnknownRequirement { uid, requirement }) => {
                assert_eq!(uid, "core.rdb");
                assert_eq!(requirement, "does.notexist");
            }
            other => panic!("expected unknown requirement error, got {other:?}"),
        }
    }
}
