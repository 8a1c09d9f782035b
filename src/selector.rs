//! Translation of textual selectors into an ordered component list.
//!
//! Tokens are processed left to right: `*` selects everything, a bare
//! identifier selects a declared group or a namespace, a dotted identifier
//! selects a single component, and a `!` prefix moves the matched
//! components onto the ignore set instead. The result preserves dependency
//! order.
use std::collections::{BTreeMap, HashSet};

use crate::error::SupervisorError;

fn selector_error(message: impl Into<String>) -> SupervisorError {
    SupervisorError::SelectorError(message.into())
}

/// Resolves selector tokens against the dependency plan.
///
/// `detached` lists identifiers known only to the status store; they are
/// addressable by exact uid and appended after all configured selections.
pub fn resolve(
    tokens: &[String],
    plan: &[String],
    groups: &BTreeMap<String, Vec<String>>,
    detached: &[String],
) -> Result<Vec<String>, SupervisorError> {
    let mut included: HashSet<String> = HashSet::new();
    let mut ignored: HashSet<String> = HashSet::new();
    let mut detached_selected: Vec<String> = Vec::new();

    for token in tokens {
        let (negated, body) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };
        if body.is_empty() {
            return Err(selector_error(format!("malformed selector: '{token}'")));
        }

        let matched: Vec<String> = if body == "*" {
            plan.to_vec()
        } else {
            match body.split('.').count() {
                1 => {
                    // Declared group first, namespace match second.
                    let members: Vec<String> = match groups.get(body) {
                        Some(members) => members.clone(),
                        None => plan
                            .iter()
                            .filter(|uid| {
                                uid.split_once('.')
                                    .map(|(group, _)| group == body)
                                    .unwrap_or(false)
                            })
                            .cloned()
                            .collect(),
                    };
                    if members.is_empty() {
                        return Err(selector_error(format!(
                            "trying to refer unmanaged group: '{body}'"
                        )));
                    }
                    members
                }
                2 => {
                    if plan.iter().any(|uid| uid == body) {
                        vec![body.to_string()]
                    } else if detached.iter().any(|uid| uid == body) {
                        if negated {
                            ignored.insert(body.to_string());
                        } else if !detached_selected.iter().any(|uid| uid == body) {
                            detached_selected.push(body.to_string());
                        }
                        continue;
                    } else {
                        return Err(selector_error(format!(
                            "trying to refer unmanaged component: '{body}'"
                        )));
                    }
                }
                _ => {
                    return Err(selector_error(format!(
                        "malformed group/component identifier: '{body}'"
                    )));
                }
            }
        };

        if negated {
            ignored.extend(matched);
        } else {
            included.extend(matched);
        }
    }

    let mut result: Vec<String> = plan
        .iter()
        .filter(|uid| included.contains(*uid) && !ignored.contains(*uid))
        .cloned()
        .collect();
    result.extend(
        detached_selected
            .into_iter()
            .filter(|uid| !ignored.contains(uid)),
    );
    Ok(result)
}
