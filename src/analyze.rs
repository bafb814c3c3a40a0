//! Offline promotion analysis.
//!
//! Reads the decision log and the evaluator's suggestion stream, groups
//! evaluator decisions by a coarse command prefix, and proposes new static
//! rules for prefixes that have been judged consistently with high
//! confidence. Output is advisory only: it is written to separate
//! artifacts and never merged into the live rule sets by this code.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::decision::{Decision, DecisionSource};
use crate::logging::{DecisionRecord, SuggestionRecord};
use crate::parse;

/// A prefix must be observed at least this many times.
pub const MIN_OCCURRENCES: usize = 3;
/// ...and its average confidence must exceed this.
pub const MIN_AVG_CONFIDENCE: f64 = 0.8;

/// Tools whose first argument names the real operation, so grouping uses
/// two words (`docker rm`, `git push`).
const TWO_WORD_TOOLS: &[&str] = &[
    "git", "npm", "pnpm", "yarn", "docker", "cargo", "kubectl", "gh", "node", "npx",
];

/// The coarse grouping key: first token, or first two tokens for known
/// multi-word tools.
pub fn command_prefix(command: &str) -> String {
    let words = parse::tokenize(command);
    let Some(first) = words.first() else {
        return String::new();
    };
    if TWO_WORD_TOOLS.contains(&first.as_str()) {
        if let Some(second) = words.get(1).filter(|w| !w.starts_with('-')) {
            return format!("{first} {second}");
        }
    }
    first.clone()
}

/// Where a proposal's support came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    /// Repeated, unanimous, high-confidence log decisions.
    Evaluation,
    /// Repeated identical rule suggestions from the evaluator.
    Suggestion,
    /// Both streams agree — highest priority.
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposedRule {
    /// The command prefix the rule would match.
    pub pattern: String,
    pub count: usize,
    pub average_confidence: f64,
    pub reason: String,
    pub source: ProposalSource,
    pub high_priority: bool,
}

/// Per-prefix observation tallies, reported even when nothing qualifies.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixStats {
    pub prefix: String,
    pub count: usize,
    pub allowed: usize,
    pub asked: usize,
    pub denied: usize,
    pub average_confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub evaluations: usize,
    pub suggestions: usize,
    pub prefixes: usize,
    pub allowed: usize,
    pub asked: usize,
    pub denied: usize,
}

#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub summary: Summary,
    pub proposed_allow: Vec<ProposedRule>,
    pub proposed_deny: Vec<ProposedRule>,
    pub patterns: Vec<PrefixStats>,
}

/// Analyze historical evaluator decisions and suggestions.
///
/// Only records decided by the secondary evaluator count: static-rule
/// decisions already have rules, and fail-open records carry no judgment.
pub fn analyze(decisions: &[DecisionRecord], suggestions: &[SuggestionRecord]) -> AnalysisReport {
    let evaluations: Vec<&DecisionRecord> = decisions
        .iter()
        .filter(|r| r.source == DecisionSource::SecondaryEvaluator)
        .collect();

    let mut groups: BTreeMap<String, Vec<&DecisionRecord>> = BTreeMap::new();
    for &record in &evaluations {
        let prefix = command_prefix(&record.command);
        if prefix.is_empty() {
            continue;
        }
        groups.entry(prefix).or_default().push(record);
    }

    // Suggestion support, keyed by prefix: the suggested pattern's own
    // prefix and the triggering command's prefix both count (deduped, so
    // the common case where they coincide is one unit of support).
    let mut suggestion_support: BTreeMap<String, Vec<(&SuggestionRecord, &crate::evaluator::SuggestedRule)>> =
        BTreeMap::new();
    for record in suggestions {
        for rule in &record.suggestions {
            let keys: std::collections::BTreeSet<String> =
                [command_prefix(&rule.pattern), command_prefix(&record.command)]
                    .into_iter()
                    .filter(|k| !k.is_empty())
                    .collect();
            for key in keys {
                suggestion_support.entry(key).or_default().push((record, rule));
            }
        }
    }

    let mut proposed_allow = Vec::new();
    let mut proposed_deny = Vec::new();
    let mut patterns = Vec::new();

    for (prefix, records) in &groups {
        let stats = prefix_stats(prefix, records);
        let unanimous = unanimous_decision(records);
        patterns.push(stats.clone());

        let Some(decision) = unanimous else { continue };
        if records.len() < MIN_OCCURRENCES || stats.average_confidence <= MIN_AVG_CONFIDENCE {
            continue;
        }

        let corroborated = suggestion_support.contains_key(prefix);
        let source = if corroborated {
            ProposalSource::Both
        } else {
            ProposalSource::Evaluation
        };
        let proposal = ProposedRule {
            pattern: prefix.clone(),
            count: records.len(),
            average_confidence: stats.average_confidence,
            reason: format!(
                "promoted from {} unanimous {} evaluations (avg confidence {:.2})",
                records.len(),
                decision.as_str(),
                stats.average_confidence
            ),
            source,
            high_priority: corroborated,
        };
        match decision {
            Decision::Allow => proposed_allow.push(proposal),
            Decision::Deny => proposed_deny.push(proposal),
            // Two static lists cannot encode "ask"; the stats row records it
            Decision::Ask => {}
        }
    }

    // Suggestion-only proposals: the evaluator repeatedly proposed the same
    // rule for a prefix that never accumulated enough log decisions.
    for (prefix, support) in &suggestion_support {
        if support.len() < MIN_OCCURRENCES {
            continue;
        }
        if proposed_allow.iter().chain(&proposed_deny).any(|p| &p.pattern == prefix) {
            continue;
        }
        let decisions_here = groups.get(prefix).map(Vec::as_slice).unwrap_or(&[]);
        let suggested_decision = match unanimous_suggestion_decision(support) {
            Some(d) => d,
            None => continue,
        };
        // Observed log decisions, if any, must not contradict the suggestion
        match unanimous_decision(decisions_here) {
            Some(d) if d != suggested_decision => continue,
            None if !decisions_here.is_empty() => continue,
            _ => {}
        }
        let avg = average_confidence(decisions_here);
        let proposal = ProposedRule {
            pattern: prefix.clone(),
            count: support.len(),
            average_confidence: avg,
            reason: format!(
                "suggested {} times by the secondary evaluator",
                support.len()
            ),
            source: ProposalSource::Suggestion,
            high_priority: false,
        };
        match suggested_decision {
            Decision::Allow => proposed_allow.push(proposal),
            Decision::Deny => proposed_deny.push(proposal),
            Decision::Ask => {}
        }
    }

    let summary = Summary {
        evaluations: evaluations.len(),
        suggestions: suggestions.len(),
        prefixes: groups.len(),
        allowed: evaluations.iter().filter(|r| r.decision == Decision::Allow).count(),
        asked: evaluations.iter().filter(|r| r.decision == Decision::Ask).count(),
        denied: evaluations.iter().filter(|r| r.decision == Decision::Deny).count(),
    };

    AnalysisReport {
        summary,
        proposed_allow,
        proposed_deny,
        patterns,
    }
}

fn prefix_stats(prefix: &str, records: &[&DecisionRecord]) -> PrefixStats {
    PrefixStats {
        prefix: prefix.to_string(),
        count: records.len(),
        allowed: records.iter().filter(|r| r.decision == Decision::Allow).count(),
        asked: records.iter().filter(|r| r.decision == Decision::Ask).count(),
        denied: records.iter().filter(|r| r.decision == Decision::Deny).count(),
        average_confidence: average_confidence(records),
    }
}

fn average_confidence(records: &[&DecisionRecord]) -> f64 {
    let confidences: Vec<f64> = records.iter().filter_map(|r| r.confidence).collect();
    if confidences.is_empty() {
        return 0.0;
    }
    confidences.iter().sum::<f64>() / confidences.len() as f64
}

fn unanimous_decision(records: &[&DecisionRecord]) -> Option<Decision> {
    let first = records.first()?.decision;
    records.iter().all(|r| r.decision == first).then_some(first)
}

fn unanimous_suggestion_decision(
    support: &[(&SuggestionRecord, &crate::evaluator::SuggestedRule)],
) -> Option<Decision> {
    let first = support.first()?.0.decision;
    support.iter().all(|(r, _)| r.decision == first).then_some(first)
}

/// Human-readable report, in the shape of the summary the log-analysis
/// script prints: tallies, per-prefix patterns, proposals,
/// recommendations.
pub fn render_report(report: &AnalysisReport) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let s = &report.summary;
    let _ = writeln!(out, "DECISION LOG ANALYSIS");
    let _ = writeln!(out, "---------------------");
    let _ = writeln!(
        out,
        "{} evaluator decisions across {} prefixes ({} allow / {} ask / {} deny), {} suggestion records",
        s.evaluations, s.prefixes, s.allowed, s.asked, s.denied, s.suggestions
    );

    let _ = writeln!(out, "\nPATTERNS");
    for p in &report.patterns {
        let _ = writeln!(
            out,
            "  {:<24} {:>3}x  allow={} ask={} deny={}  avg_conf={:.2}",
            p.prefix, p.count, p.allowed, p.asked, p.denied, p.average_confidence
        );
    }

    for (title, proposals) in [
        ("PROPOSED ALLOW RULES", &report.proposed_allow),
        ("PROPOSED DENY RULES", &report.proposed_deny),
    ] {
        let _ = writeln!(out, "\n{title}");
        if proposals.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for p in proposals {
            let priority = if p.high_priority { "  [high priority]" } else { "" };
            let _ = writeln!(
                out,
                "  {:<24} {:>3}x  avg_conf={:.2}  {:?}{}",
                p.pattern, p.count, p.average_confidence, p.source, priority
            );
        }
    }

    let _ = writeln!(out, "\nRECOMMENDATIONS");
    if report.proposed_allow.is_empty() && report.proposed_deny.is_empty() {
        let _ = writeln!(out, "  Nothing qualifies yet; rerun after more decisions accumulate.");
    } else {
        let _ = writeln!(
            out,
            "  Review the proposals above and merge accepted ones into the allow/deny rule files."
        );
        let _ = writeln!(
            out,
            "  Run with --auto-suggest to write proposed-allowlist.json / proposed-denylist.json."
        );
    }
    out
}
