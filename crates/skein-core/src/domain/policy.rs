use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How tasks are handed to workers.
///
/// Neither variant affects result values: each task's stream is fixed by its
/// index. The policy only changes which worker runs a task and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    /// Pre-partition into one contiguous block per worker, sent up front.
    #[default]
    Static,

    /// Greedy pull: a worker gets the next pending task as soon as it reports.
    LoadBalanced,
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingPolicy::Static => f.write_str("static"),
            SchedulingPolicy::LoadBalanced => f.write_str("load_balanced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scheduling policy '{0}' (expected 'static' or 'load_balanced')")]
pub struct ParsePolicyError(String);

impl FromStr for SchedulingPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(SchedulingPolicy::Static),
            "load_balanced" | "load-balanced" | "loadbalanced" | "lb" => {
                Ok(SchedulingPolicy::LoadBalanced)
            }
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::static_("static", SchedulingPolicy::Static)]
    #[case::snake("load_balanced", SchedulingPolicy::LoadBalanced)]
    #[case::kebab("load-balanced", SchedulingPolicy::LoadBalanced)]
    #[case::short("LB", SchedulingPolicy::LoadBalanced)]
    fn parses_policy_names(#[case] input: &str, #[case] expected: SchedulingPolicy) {
        assert_eq!(input.parse::<SchedulingPolicy>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = "round_robin".parse::<SchedulingPolicy>().unwrap_err();
        assert!(err.to_string().contains("round_robin"));
    }

    #[test]
    fn display_roundtrips_through_serde_name() {
        for policy in [SchedulingPolicy::Static, SchedulingPolicy::LoadBalanced] {
            let json = serde_json::to_string(&policy).unwrap();
            assert_eq!(json, format!("\"{policy}\""));
        }
    }
}
