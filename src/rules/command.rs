//! Control-plane commands accepted by [`RuleRegistry::apply`].
//!
//! ```json
//! {"op": "add", "route_id": "r1", "subject": "events.user.*", "targets": [...]}
//! {"op": "add", "replace": true, "route_id": "r1", ...}
//! {"op": "update", "route_id": "r1", ...}
//! {"op": "remove", "route_id": "r1"}
//! ```
//!
//! [`RuleRegistry::apply`]: crate::rules::registry::RuleRegistry::apply

use serde::{Deserialize, Serialize};

use crate::rules::rule::RuleSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleCommand {
    Add {
        #[serde(flatten)]
        rule: RuleSpec,
        #[serde(default)]
        replace: bool,
    },
    Update {
        #[serde(flatten)]
        rule: RuleSpec,
    },
    Remove {
        route_id: String,
    },
}

impl RuleCommand {
    pub fn route_id(&self) -> &str {
        match self {
            RuleCommand::Add { rule, .. } | RuleCommand::Update { rule } => &rule.route_id,
            RuleCommand::Remove { route_id } => route_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Added { route_id: String, revision: u64 },
    Replaced { route_id: String, revision: u64 },
    Updated { route_id: String, revision: u64 },
    Removed { route_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_format() {
        let cmd: RuleCommand = serde_json::from_value(json!({
            "op": "add",
            "route_id": "r1",
            "subject": "a.*",
            "filter": {"payload.region": "eu"},
            "targets": [{"kind": "echo", "destination": "x"}],
            "ttl_secs": 30
        }))
        .unwrap();
        match &cmd {
            RuleCommand::Add { rule, replace } => {
                assert!(!replace);
                assert_eq!(rule.ttl_secs, Some(30));
                assert_eq!(rule.filter.get("payload.region"), Some(&json!("eu")));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cmd.route_id(), "r1");

        let cmd: RuleCommand = serde_json::from_value(json!({"op": "remove", "route_id": "r9"})).unwrap();
        assert_eq!(cmd, RuleCommand::Remove { route_id: "r9".into() });

        assert!(serde_json::from_value::<RuleCommand>(json!({"op": "drop", "route_id": "x"})).is_err());
    }

    #[test]
    fn test_outcome_serialization() {
        let out = CommandOutcome::Added {
            route_id: "r1".into(),
            revision: 4,
        };
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"result": "added", "route_id": "r1", "revision": 4})
        );
    }
}
