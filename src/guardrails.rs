//! Guardrail validation for proposed tool calls.
//!
//! Independent of the allow/deny command rules: these checks look at
//! *where* a tool call reaches (paths, tools, module boundaries) rather
//! than what command it runs. Each check produces a typed violation with a
//! stable reference key and suggested alternatives.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::parse;

const DEFAULT_POLICY: &str = include_str!("../guardrails.default.toml");

/// Path override for the guardrail policy overlay.
pub const GUARDRAILS_ENV: &str = "CMDGATE_GUARDRAILS";
const GUARDRAILS_PATH: &str = "~/.config/cmdgate/guardrails.toml";

const EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const SHELL_TOOLS: &[&str] = &["Bash"];
const SEARCH_TOOLS: &[&str] = &["Grep", "Glob"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Surfaced but not blocking (read-only operations).
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    ToolNotAllowed,
    ForbiddenPath,
    ModuleBoundary,
}

impl ViolationKind {
    /// Stable reference key for callers and logs.
    pub fn key(self) -> &'static str {
        match self {
            ViolationKind::ToolNotAllowed => "tool_not_allowed",
            ViolationKind::ForbiddenPath => "forbidden_path",
            ViolationKind::ModuleBoundary => "module_boundary",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailViolation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl GuardrailViolation {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Why a path is off-limits; drives the suggestion text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathCategory {
    Generated,
    Dependency,
    Lockfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleBoundary {
    pub root: String,
    pub cannot_import: Vec<String>,
}

// ── policy file shapes ──

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    tools: ToolsSection,
    #[serde(default)]
    paths: PathsSection,
    #[serde(default, rename = "boundary")]
    boundaries: Vec<ModuleBoundary>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsSection {
    #[serde(default)]
    allowed: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PathsSection {
    #[serde(default)]
    generated: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    lockfiles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyOverlay {
    #[serde(default)]
    tools: ToolsOverlay,
    #[serde(default)]
    paths: PathsOverlay,
    #[serde(default, rename = "boundary")]
    boundaries: Vec<ModuleBoundary>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    allowed: Vec<String>,
    #[serde(default)]
    remove_allowed: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PathsOverlay {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    generated: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    lockfiles: Vec<String>,
    #[serde(default)]
    remove_generated: Vec<String>,
    #[serde(default)]
    remove_dependencies: Vec<String>,
    #[serde(default)]
    remove_lockfiles: Vec<String>,
}

/// Merge a user list into a default list: replace wholesale, or remove
/// then extend (deduped).
fn merge_list(base: &mut Vec<String>, add: Vec<String>, remove: &[String], replace: bool) {
    if replace {
        *base = add;
    } else {
        base.retain(|item| !remove.contains(item));
        for item in add {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    }
}

// ── effective policy ──

#[derive(Debug)]
pub struct GuardrailPolicy {
    pub allowed_tools: Vec<String>,
    pub boundaries: Vec<ModuleBoundary>,
    generated_patterns: Vec<String>,
    dependency_patterns: Vec<String>,
    lockfile_patterns: Vec<String>,
    generated: GlobSet,
    dependencies: GlobSet,
    lockfiles: GlobSet,
}

impl GuardrailPolicy {
    /// The embedded default policy.
    pub fn default_policy() -> Self {
        let file: PolicyFile =
            toml::from_str(DEFAULT_POLICY).expect("embedded default guardrail policy must parse");
        Self::from_file(file)
    }

    /// Defaults merged with the user overlay, if one exists and parses.
    /// A broken overlay is warned about and ignored — the gate keeps
    /// running on defaults.
    pub fn load() -> Self {
        let mut policy = Self::default_policy();
        let path = std::env::var(GUARDRAILS_ENV).unwrap_or_else(|_| GUARDRAILS_PATH.to_string());
        let path = shellexpand::tilde(&path).into_owned();
        if let Ok(content) = std::fs::read_to_string(&path) {
            match toml::from_str::<PolicyOverlay>(&content) {
                Ok(overlay) => policy.apply_overlay(overlay),
                Err(e) => log::warn!("cmdgate: guardrail overlay at {path} ignored: {e}"),
            }
        }
        policy
    }

    fn from_file(file: PolicyFile) -> Self {
        let mut policy = Self {
            allowed_tools: file.tools.allowed,
            boundaries: file.boundaries,
            generated_patterns: file.paths.generated,
            dependency_patterns: file.paths.dependencies,
            lockfile_patterns: file.paths.lockfiles,
            generated: GlobSet::empty(),
            dependencies: GlobSet::empty(),
            lockfiles: GlobSet::empty(),
        };
        policy.compile();
        policy
    }

    fn apply_overlay(&mut self, overlay: PolicyOverlay) {
        let t = overlay.tools;
        merge_list(&mut self.allowed_tools, t.allowed, &t.remove_allowed, t.replace);

        let p = overlay.paths;
        merge_list(&mut self.generated_patterns, p.generated, &p.remove_generated, p.replace);
        merge_list(
            &mut self.dependency_patterns,
            p.dependencies,
            &p.remove_dependencies,
            p.replace,
        );
        merge_list(&mut self.lockfile_patterns, p.lockfiles, &p.remove_lockfiles, p.replace);

        self.boundaries.extend(overlay.boundaries);
        self.compile();
    }

    /// Add a module boundary programmatically (caller-supplied override).
    pub fn with_boundary(mut self, boundary: ModuleBoundary) -> Self {
        self.boundaries.push(boundary);
        self
    }

    fn compile(&mut self) {
        self.generated = compile_globs(&self.generated_patterns);
        self.dependencies = compile_globs(&self.dependency_patterns);
        self.lockfiles = compile_globs(&self.lockfile_patterns);
    }

    fn categorize(&self, path: &str) -> Option<PathCategory> {
        let rel = path.trim_start_matches("./");
        if self.lockfiles.is_match(rel) {
            Some(PathCategory::Lockfile)
        } else if self.dependencies.is_match(rel) {
            Some(PathCategory::Dependency)
        } else if self.generated.is_match(rel) {
            Some(PathCategory::Generated)
        } else {
            None
        }
    }
}

fn compile_globs(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        match Glob::new(pat) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => log::warn!("cmdgate: skipping bad path pattern {pat}: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        log::warn!("cmdgate: path pattern set failed to build: {e}");
        GlobSet::empty()
    })
}

// ── validation ──

/// Validate one proposed tool call against the policy. An empty result is
/// a pass; error-severity violations should block, warnings only inform.
pub fn validate_tool_call(
    tool: &str,
    params: &Value,
    policy: &GuardrailPolicy,
) -> Vec<GuardrailViolation> {
    let mut violations = Vec::new();

    if !policy.allowed_tools.is_empty() && !policy.allowed_tools.iter().any(|t| t == tool) {
        violations.push(GuardrailViolation {
            kind: ViolationKind::ToolNotAllowed,
            severity: Severity::Error,
            message: format!("tool {tool} is not in the configured tool allowlist"),
            suggestions: vec![
                "use one of the tools named in the guardrail policy's allowed list".into(),
            ],
        });
    }

    if EDIT_TOOLS.contains(&tool) {
        if let Some(path) = str_param(params, "file_path") {
            if let Some(category) = policy.categorize(path) {
                violations.push(forbidden_path(path, category, Severity::Error));
            }
            for (boundary, import) in boundary_breaches(path, &edit_content(params), policy) {
                violations.push(GuardrailViolation {
                    kind: ViolationKind::ModuleBoundary,
                    severity: Severity::Error,
                    message: format!(
                        "edit under {} imports {import}, which {} may not depend on",
                        boundary.root, boundary.root
                    ),
                    suggestions: vec![
                        "move the shared code into a module both roots may depend on".into(),
                        "invert the dependency behind an interface owned by the lower layer".into(),
                    ],
                });
            }
        }
    }

    if SHELL_TOOLS.contains(&tool) {
        if let Some(command) = str_param(params, "command") {
            for target in parse::redirect_targets(command) {
                if let Some(category) = policy.categorize(&target) {
                    violations.push(forbidden_path(&target, category, Severity::Error));
                }
            }
        }
    }

    if SEARCH_TOOLS.contains(&tool) {
        if let Some(path) = str_param(params, "path") {
            if let Some(category) = policy.categorize(path) {
                // Read-only: surfaced, not blocking
                violations.push(forbidden_path(path, category, Severity::Warning));
            }
        }
    }

    violations
}

fn str_param<'v>(params: &'v Value, key: &str) -> Option<&'v str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Gather the text an edit would introduce: `content` (Write),
/// `new_string` (Edit), or each edit's `new_string` (MultiEdit).
fn edit_content(params: &Value) -> String {
    let mut content = String::new();
    for key in ["content", "new_string"] {
        if let Some(s) = str_param(params, key) {
            content.push_str(s);
            content.push('\n');
        }
    }
    if let Some(edits) = params.get("edits").and_then(Value::as_array) {
        for edit in edits {
            if let Some(s) = str_param(edit, "new_string") {
                content.push_str(s);
                content.push('\n');
            }
        }
    }
    content
}

fn forbidden_path(path: &str, category: PathCategory, severity: Severity) -> GuardrailViolation {
    let (what, suggestion) = match category {
        PathCategory::Lockfile => (
            "a machine-generated lock file",
            "regenerate it via the package manager (e.g. `pnpm install`), then commit the result",
        ),
        PathCategory::Dependency => (
            "an installed dependency",
            "change the dependency's version or patch it through the package manager instead",
        ),
        PathCategory::Generated => (
            "a generated build artifact",
            "edit the source it is generated from, then rebuild",
        ),
    };
    GuardrailViolation {
        kind: ViolationKind::ForbiddenPath,
        severity,
        message: format!("{path} is {what}"),
        suggestions: vec![suggestion.to_string()],
    }
}

// ── module boundaries ──

/// Every (boundary, resolved import) pair the edit would breach.
fn boundary_breaches<'p>(
    file_path: &str,
    content: &str,
    policy: &'p GuardrailPolicy,
) -> Vec<(&'p ModuleBoundary, String)> {
    let rel = file_path.trim_start_matches("./");
    let mut breaches = Vec::new();

    for boundary in &policy.boundaries {
        if !rel.starts_with(boundary.root.trim_start_matches("./")) {
            continue;
        }
        let base_dir = match rel.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        };
        for spec in extract_imports(content) {
            let resolved = if spec.starts_with('.') {
                resolve_relative(base_dir, &spec)
            } else {
                spec.trim_start_matches('@').to_string()
            };
            for forbidden in &boundary.cannot_import {
                let forbidden = forbidden.trim_end_matches('/');
                if resolved == forbidden || resolved.starts_with(&format!("{forbidden}/")) {
                    breaches.push((boundary, resolved.clone()));
                }
            }
        }
    }
    breaches
}

/// Module specifiers referenced by import/export/require statements.
fn extract_imports(content: &str) -> Vec<String> {
    let mut specs = Vec::new();
    for pat in [
        r#"(?m)^\s*(?:import|export)\b[^'"\n]*['"]([^'"]+)['"]"#,
        r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
    ] {
        if let Ok(re) = Regex::new(pat) {
            for caps in re.captures_iter(content) {
                specs.push(caps[1].to_string());
            }
        }
    }
    specs
}

/// Resolve a relative specifier against a directory, collapsing `.`/`..`.
fn resolve_relative(base_dir: &str, spec: &str) -> String {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for comp in spec.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
