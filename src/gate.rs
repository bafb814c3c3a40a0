//! The real-time gate: normalize → segment → deny → allow → secondary
//! evaluation, with every terminal decision logged.
//!
//! One gate evaluates one command per call; the rule sets are read-only
//! for the duration and no state is shared across calls, so any number of
//! agent sessions can evaluate concurrently.

use std::time::Instant;

use crate::decision::{Decision, DecisionSource, GateDecision};
use crate::evaluator::{EvaluatorTransport, HttpTransport, SecondaryEvaluator, fail_open};
use crate::logging::DecisionLog;
use crate::matcher;
use crate::parse;
use crate::rules::{self, RuleSet};

pub struct Gate<T> {
    allow: RuleSet,
    deny: RuleSet,
    evaluator: Option<SecondaryEvaluator<T>>,
    log: DecisionLog,
}

impl Gate<HttpTransport> {
    /// Build a gate from the environment: effective rule sets, the default
    /// log location, and an HTTP evaluator when an API key is configured.
    pub fn from_env() -> Self {
        let evaluator = HttpTransport::from_env().map(|transport| {
            let identity = transport.model().to_string();
            SecondaryEvaluator::new(transport, identity, crate::evaluator::EVALUATION_TIMEOUT)
        });
        Self {
            allow: rules::load_allow_rules(),
            deny: rules::load_deny_rules(),
            evaluator,
            log: DecisionLog::open_default(),
        }
    }
}

impl<T: EvaluatorTransport> Gate<T> {
    pub fn new(
        allow: RuleSet,
        deny: RuleSet,
        evaluator: Option<SecondaryEvaluator<T>>,
        log: DecisionLog,
    ) -> Self {
        Self {
            allow,
            deny,
            evaluator,
            log,
        }
    }

    /// Decide one proposed command. Deny is checked before Allow, and the
    /// secondary evaluator runs only when both static lists miss.
    pub async fn evaluate_command(&self, raw: &str, description: Option<&str>) -> GateDecision {
        let started = Instant::now();

        if let Some(rule) = matcher::matches_denylist(raw, &self.deny) {
            let decision = GateDecision {
                decision: Decision::Deny,
                reason: format!("{} [{}]", rule.reason, rule.id),
                source: DecisionSource::Denylist,
            };
            self.log
                .record(raw, description, &decision, started.elapsed(), "static:denylist", None);
            return decision;
        }

        if let Some(rule) = matcher::matches_allowlist(raw, &self.allow) {
            let decision = GateDecision {
                decision: Decision::Allow,
                reason: format!("{} [{}]", rule.reason, rule.id),
                source: DecisionSource::Allowlist,
            };
            self.log
                .record(raw, description, &decision, started.elapsed(), "static:allowlist", None);
            return decision;
        }

        let verdict = match &self.evaluator {
            Some(evaluator) => evaluator.evaluate(raw, description).await,
            None => fail_open(format!(
                "no static rule matched {} and no secondary evaluator is configured",
                parse::base_command(raw)
            )),
        };

        if let Some(rule) = &verdict.suggested_rule {
            self.log
                .record_suggestion(raw, verdict.decision.decision, std::slice::from_ref(rule));
        }
        self.log.record(
            raw,
            description,
            &verdict.decision,
            started.elapsed(),
            &verdict.evaluator,
            verdict.confidence,
        );
        verdict.decision
    }
}
