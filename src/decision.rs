//! Decision types shared across the gate, the matcher, and the evaluator.

use serde::{Deserialize, Serialize};

/// The three-way permission decision. Ordered so that a "worst decision
/// wins" comparison works: Allow < Ask < Deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Ask,
    Deny,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Ask => "ask",
            Decision::Deny => "deny",
        }
    }
}

/// Which layer produced a terminal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Allowlist,
    Denylist,
    SecondaryEvaluator,
    /// A recovered internal failure; the decision is the fail-open default.
    Error,
}

/// A terminal gate decision. The reason is always non-empty: a deny names
/// the rule or guardrail that triggered it, a fail-open allow names the
/// failure it recovered from.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub decision: Decision,
    pub reason: String,
    pub source: DecisionSource,
}
