//! Offline promotion analyzer.
//!
//! Reads the gate's decision and suggestion logs, groups evaluator
//! decisions by command prefix, and reports prefixes that qualify for
//! promotion to static rules. With `--auto-suggest`, qualifying proposals
//! are written as ready-to-merge rule-file artifacts next to the log.
//! Advisory only: nothing here touches the live rule configuration.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use serde_json::json;

use cmdgate::analyze::{self, AnalysisReport, ProposedRule};
use cmdgate::logging::DecisionLog;

#[derive(Parser)]
#[command(
    name = "promote",
    version,
    about = "Mine the cmdgate decision log for promotable static rules"
)]
struct Args {
    /// Only consider records at or after this date (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    since: Option<String>,

    /// Write proposed-allowlist.json / proposed-denylist.json artifacts
    #[arg(long)]
    auto_suggest: bool,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn parse_since(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("unrecognized --since date: {s}"))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn slug(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn write_artifact(
    log: &DecisionLog,
    name: &str,
    id_prefix: &str,
    proposals: &[ProposedRule],
) -> Result<()> {
    if proposals.is_empty() {
        return Ok(());
    }
    let rules: Vec<serde_json::Value> = proposals
        .iter()
        .map(|p| {
            json!({
                "id": format!("{id_prefix}-{}", slug(&p.pattern)),
                "kind": "prefix",
                "pattern": p.pattern,
                "reason": p.reason,
            })
        })
        .collect();
    let path = log.dir().join(name);
    let content = serde_json::to_string_pretty(&json!({ "rules": rules }))?;
    std::fs::create_dir_all(log.dir())?;
    std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    eprintln!("wrote {} ({} rules)", path.display(), proposals.len());
    Ok(())
}

fn run(args: &Args) -> Result<AnalysisReport> {
    let log = DecisionLog::open_default();
    let mut decisions = log.load_decisions();
    let mut suggestions = log.load_suggestions();

    if let Some(since) = &args.since {
        let cutoff = parse_since(since)?;
        decisions.retain(|r| r.timestamp >= cutoff);
        suggestions.retain(|r| r.timestamp >= cutoff);
    }

    let report = analyze::analyze(&decisions, &suggestions);

    if args.auto_suggest {
        write_artifact(&log, "proposed-allowlist.json", "auto-allow", &report.proposed_allow)?;
        write_artifact(&log, "proposed-denylist.json", "auto-deny", &report.proposed_deny)?;
    }

    Ok(report)
}

fn main() -> Result<()> {
    let _ = simplelog::TermLogger::init(
        simplelog::LevelFilter::Warn,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );

    let args = Args::parse();
    let report = run(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", analyze::render_report(&report));
    }
    Ok(())
}
