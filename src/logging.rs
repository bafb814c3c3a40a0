//! Append-only decision and suggestion logs.
//!
//! One JSON record per line. Logging is best-effort by contract: a failure
//! to append is reported as a warning and never reaches the decision
//! caller — the log must not become a reason to block a command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionSource, GateDecision};
use crate::evaluator::SuggestedRule;
use crate::redact::redact;

/// Directory override for the decision/suggestion logs.
pub const STATE_DIR_ENV: &str = "CMDGATE_STATE_DIR";

const DECISIONS_FILE: &str = "decisions.ndjson";
const SUGGESTIONS_FILE: &str = "suggestions.ndjson";

/// One terminal decision. Immutable once written; commands and
/// descriptions are secret-redacted before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub decision: Decision,
    pub source: DecisionSource,
    pub reasoning: String,
    pub duration_ms: u64,
    /// Who decided: `static:allowlist`, `static:denylist`, the evaluator
    /// model name, or `fallback`.
    pub evaluator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A rule suggestion emitted by the secondary evaluator alongside its
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub decision: Decision,
    pub suggestions: Vec<SuggestedRule>,
}

/// Handle on the append-only record store.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    dir: PathBuf,
}

impl DecisionLog {
    /// Resolve the log directory: `CMDGATE_STATE_DIR` if set, else
    /// `~/.local/share/cmdgate`.
    pub fn open_default() -> Self {
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            return Self::at(shellexpand::tilde(&dir).into_owned());
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::at(Path::new(&home).join(".local/share/cmdgate"))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The state directory holding the logs (and the analyzer's proposed
    /// rule artifacts).
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn decisions_path(&self) -> PathBuf {
        self.dir.join(DECISIONS_FILE)
    }

    pub fn suggestions_path(&self) -> PathBuf {
        self.dir.join(SUGGESTIONS_FILE)
    }

    /// Append one decision record.
    pub fn record(
        &self,
        command: &str,
        description: Option<&str>,
        decision: &GateDecision,
        elapsed: Duration,
        evaluator: &str,
        confidence: Option<f64>,
    ) {
        let record = DecisionRecord {
            timestamp: Utc::now(),
            command: redact(command),
            description: description.map(redact),
            decision: decision.decision,
            source: decision.source,
            reasoning: decision.reason.clone(),
            duration_ms: elapsed.as_millis() as u64,
            evaluator: evaluator.to_string(),
            confidence,
        };
        self.append(DECISIONS_FILE, &record);
    }

    /// Append one suggestion record.
    pub fn record_suggestion(
        &self,
        command: &str,
        decision: Decision,
        suggestions: &[SuggestedRule],
    ) {
        if suggestions.is_empty() {
            return;
        }
        let record = SuggestionRecord {
            timestamp: Utc::now(),
            command: redact(command),
            decision,
            suggestions: suggestions.to_vec(),
        };
        self.append(SUGGESTIONS_FILE, &record);
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("cmdgate: could not serialize log record: {e}");
                return;
            }
        };
        if let Err(e) = self.append_line(file, &line) {
            log::warn!("cmdgate: could not append to {file}: {e}");
        }
    }

    fn append_line(&self, file: &str, line: &str) -> std::io::Result<()> {
        use std::io::Write;

        std::fs::create_dir_all(&self.dir)?;
        let mut opts = std::fs::OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut f = opts.open(self.dir.join(file))?;
        // One write per record keeps concurrent appenders from
        // interleaving partial lines.
        f.write_all(format!("{line}\n").as_bytes())
    }

    /// Read all decision records, skipping unparsable lines.
    pub fn load_decisions(&self) -> Vec<DecisionRecord> {
        load_ndjson(&self.decisions_path())
    }

    /// Read all suggestion records, skipping unparsable lines.
    pub fn load_suggestions(&self) -> Vec<SuggestionRecord> {
        load_ndjson(&self.suggestions_path())
    }
}

/// Parse a newline-delimited JSON file, dropping lines that do not parse.
/// A missing file is an empty history, not an error.
fn load_ndjson<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match serde_json::from_str(l) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("cmdgate: skipping malformed record in {}: {e}", path.display());
                None
            }
        })
        .collect()
}
