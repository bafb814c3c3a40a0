//! cmdgate hook binary.
//!
//! Reads a tool-call JSON object on stdin, writes a permission decision to
//! stdout:
//!
//! - guardrail checks run for every tool (paths, tool allowlist, module
//!   boundaries); an error-severity violation denies the call outright
//! - shell commands then go through the full gate (rules, then the
//!   fail-open secondary evaluation)
//! - non-shell tools with no violations produce no output, which the
//!   orchestrator treats as "no opinion"

use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

use cmdgate::Gate;
use cmdgate::guardrails::{self, GuardrailPolicy, GuardrailViolation};

#[derive(Deserialize)]
struct HookInput {
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: serde_json::Value,
}

fn emit(decision: &str, reason: Option<String>) {
    let output = serde_json::json!({
        "hookSpecificOutput": {
            "hookEventName": "PreToolUse",
            "permissionDecision": decision,
            "permissionDecisionReason": reason,
        }
    });
    println!("{output}");
}

fn describe(v: &GuardrailViolation) -> String {
    let mut line = format!("[{}] {}", v.kind.key(), v.message);
    if !v.suggestions.is_empty() {
        line.push_str(&format!(" — try: {}", v.suggestions.join("; ")));
    }
    line
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = simplelog::TermLogger::init(
        simplelog::LevelFilter::Warn,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    let hook: HookInput = serde_json::from_str(&input).context("failed to parse hook input")?;

    let Some(tool_name) = hook.tool_name else {
        return Ok(());
    };

    let policy = GuardrailPolicy::load();
    let violations = guardrails::validate_tool_call(&tool_name, &hook.tool_input, &policy);

    let errors: Vec<String> = violations.iter().filter(|v| v.is_error()).map(describe).collect();
    if !errors.is_empty() {
        emit("deny", Some(errors.join("\n")));
        return Ok(());
    }
    let warnings: Vec<String> = violations.iter().map(describe).collect();

    if tool_name == "Bash" {
        let command = hook
            .tool_input
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if command.trim().is_empty() {
            return Ok(());
        }
        let description = hook.tool_input.get("description").and_then(|v| v.as_str());

        let gate = Gate::from_env();
        let decision = gate.evaluate_command(command, description).await;

        let mut reason = decision.reason;
        if !warnings.is_empty() {
            reason = format!("{reason}\n{}", warnings.join("\n"));
        }
        emit(decision.decision.as_str(), Some(reason));
        return Ok(());
    }

    // Read-only guardrail warnings on non-shell tools: allow, but surface them
    if !warnings.is_empty() {
        emit("allow", Some(warnings.join("\n")));
    }

    Ok(())
}
