//! cmdgate: a command security gate for AI coding agents.
//!
//! Every shell command an agent proposes passes through the gate, which
//! answers allow, ask, or deny. Static policy comes first: a denylist
//! checked against the full command and every segment of a compound
//! command, then an allowlist that every segment must independently
//! satisfy. Only when both miss does a bounded, structured-output AI
//! evaluation run — and any failure there falls open to allow, because
//! the gate must never be the thing that blocks legitimate work. Every
//! terminal decision lands in an append-only log that the offline
//! `promote` analyzer mines for new static rule proposals.
//!
//! # Architecture
//!
//! - **[`parse`]** — quote-aware segmentation of compound commands,
//!   tokenization, redirect-target extraction.
//! - **[`normalize`]** — canonical command rewriting (idempotent).
//! - **[`rules`]** — Allow/Deny rule sets: JSON artifacts with embedded
//!   default fallback, linear-time pattern matching.
//! - **[`matcher`]** — denylist (disjunctive) and allowlist (conjunctive)
//!   aggregation over segments.
//! - **[`guardrails`]** — tool, path, and module-boundary policy for
//!   non-shell tool calls and shell redirect targets.
//! - **[`evaluator`]** — the fail-open secondary AI evaluation.
//! - **[`logging`]** / **[`redact`]** — append-only NDJSON decision and
//!   suggestion logs, secret-redacted.
//! - **[`analyze`]** — offline promotion analysis over the logs.
//! - **[`gate`]** — the decision pipeline.

pub mod analyze;
pub mod decision;
pub mod evaluator;
pub mod gate;
pub mod guardrails;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod parse;
pub mod redact;
pub mod rules;

pub use decision::{Decision, DecisionSource, GateDecision};
pub use gate::Gate;

/// Match a command against the effective rule sets (external artifacts or
/// embedded defaults): deny first, then allow. `None` means neither list
/// resolved it and the full gate would consult the secondary evaluator.
///
/// This is the entry point for tests and static-only callers; it neither
/// logs nor evaluates.
pub fn match_static(command: &str) -> Option<GateDecision> {
    let deny = rules::load_deny_rules();
    if let Some(rule) = matcher::matches_denylist(command, &deny) {
        return Some(GateDecision {
            decision: Decision::Deny,
            reason: format!("{} [{}]", rule.reason, rule.id),
            source: DecisionSource::Denylist,
        });
    }
    let allow = rules::load_allow_rules();
    if let Some(rule) = matcher::matches_allowlist(command, &allow) {
        return Some(GateDecision {
            decision: Decision::Allow,
            reason: format!("{} [{}]", rule.reason, rule.id),
            source: DecisionSource::Allowlist,
        });
    }
    None
}
