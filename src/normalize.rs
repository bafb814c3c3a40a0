//! Canonical command rewriting.
//!
//! Rule matching should not be defeated by cosmetic variation, so commands
//! are rewritten into a canonical form before allowlist checks: benign
//! decorations (directory-change prefixes, environment assignments,
//! null-sink redirections, status echoes, workspace-filter flags) are
//! stripped. The rewrite is deterministic, pure, and idempotent.

use regex::Regex;

use crate::parse;

/// Rewrite `command` into its canonical form.
///
/// Passes run in order and repeat until a fixpoint, so stacked decorations
/// (`cd a && cd b && ls`) fully unwind and `normalize(normalize(x)) ==
/// normalize(x)` holds for all inputs.
pub fn normalize(command: &str) -> String {
    let mut current = command.trim().to_string();
    loop {
        let mut next = strip_cd_prefix(&current);
        next = strip_env_prefix(&next);
        next = strip_null_redirects(&next);
        next = strip_status_echo(&next);
        next = collapse_workspace_filters(&next);
        let next = next.trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Rejoin a segment range with canonical spacing.
fn rejoin(seg: &parse::Segmented, start: usize, end: usize) -> String {
    let mut out = String::new();
    for idx in start..end {
        if idx > start {
            out.push(' ');
            out.push_str(seg.operators[idx - 1].as_str());
            out.push(' ');
        }
        out.push_str(&seg.segments[idx].raw);
    }
    out
}

/// Drop a leading `cd <path> &&` / `cd <path>;` decoration.
///
/// Uses the quote-aware segmenter, so a `cd` glued to the rest by an
/// operator inside quotes is left alone.
fn strip_cd_prefix(command: &str) -> String {
    let seg = parse::segment(command);
    if !seg.is_compound() {
        return command.to_string();
    }
    let first = &seg.segments[0].raw;
    let is_cd = first == "cd" || first.starts_with("cd ") || first.starts_with("cd\t");
    let joiner_ok = matches!(
        seg.operators.first(),
        Some(parse::Operator::And) | Some(parse::Operator::Semi)
    );
    if !(is_cd && joiner_ok) {
        return command.to_string();
    }
    rejoin(&seg, 1, seg.segments.len())
}

/// Drop leading `VAR=value` assignments, with or without a joining `&&`.
fn strip_env_prefix(command: &str) -> String {
    let stripped = parse::tokenize::strip_assignments(command);
    if stripped.len() == command.trim().len() {
        return command.to_string();
    }
    stripped
        .strip_prefix("&&")
        .map(str::trim_start)
        .unwrap_or(stripped)
        .to_string()
}

/// Drop trailing redirections to a null sink and a trailing `2>&1`.
fn strip_null_redirects(command: &str) -> String {
    let mut s = command.to_string();
    for pat in [r"\s*2>&1\s*$", r"\s*(?:&>>?|[012]?>>?)\s*/dev/null\s*$"] {
        if let Ok(re) = Regex::new(pat) {
            s = re.replace(&s, "").to_string();
        }
    }
    s
}

/// Drop a trailing `; echo ...` status probe.
///
/// Only an `echo` joined by `;` is a probe; an `echo` behind `&&` is part
/// of the command's observable behavior and stays.
fn strip_status_echo(command: &str) -> String {
    let seg = parse::segment(command);
    if !seg.is_compound() {
        return command.to_string();
    }
    let last_idx = seg.segments.len() - 1;
    let last = &seg.segments[last_idx].raw;
    let is_probe = last == "echo" || last.starts_with("echo ");
    if is_probe && seg.operators.get(last_idx - 1) == Some(&parse::Operator::Semi) {
        return rejoin(&seg, 0, last_idx);
    }
    command.to_string()
}

/// Collapse package-manager workspace-filter flags to the base command:
/// `pnpm --filter web run build` → `pnpm run build`, and the npm/yarn
/// equivalents.
fn collapse_workspace_filters(command: &str) -> String {
    let base = parse::base_command(command);
    let mut s = command.to_string();
    match base.as_str() {
        "pnpm" => {
            if let Ok(re) = Regex::new(r"\s+--filter(?:=\S+|\s+\S+)") {
                s = re.replace_all(&s, "").to_string();
            }
        }
        "npm" => {
            if let Ok(re) = Regex::new(r"\s+(?:--workspace(?:=\S+|\s+\S+)|-w\s+\S+)") {
                s = re.replace_all(&s, "").to_string();
            }
        }
        "yarn" => {
            if let Ok(re) = Regex::new(r"^(yarn)\s+workspace\s+\S+\s+") {
                s = re.replace(&s, "$1 ").to_string();
            }
        }
        _ => {}
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_unchanged() {
        assert_eq!(normalize("git status"), "git status");
    }

    #[test]
    fn strips_cd_prefix() {
        assert_eq!(normalize("cd /srv/app && git status"), "git status");
        assert_eq!(normalize("cd ..; ls -la"), "ls -la");
    }

    #[test]
    fn strips_stacked_cd_prefixes() {
        assert_eq!(normalize("cd a && cd b && pnpm test"), "pnpm test");
    }

    #[test]
    fn keeps_cd_alone() {
        assert_eq!(normalize("cd /tmp"), "cd /tmp");
    }

    #[test]
    fn strips_env_prefix() {
        assert_eq!(normalize("NODE_ENV=test pnpm test"), "pnpm test");
        assert_eq!(normalize("A=1 B=2 node x.js"), "node x.js");
    }

    #[test]
    fn strips_env_prefix_with_joiner() {
        assert_eq!(normalize("CI=1 && pnpm lint"), "pnpm lint");
    }

    #[test]
    fn strips_null_redirects() {
        assert_eq!(normalize("grep -r foo . > /dev/null"), "grep -r foo .");
        assert_eq!(normalize("grep foo x 2>/dev/null"), "grep foo x");
        assert_eq!(normalize("pnpm build >/dev/null 2>&1"), "pnpm build");
        assert_eq!(normalize("pnpm build &>/dev/null"), "pnpm build");
    }

    #[test]
    fn keeps_real_redirects() {
        assert_eq!(normalize("ls > out.txt"), "ls > out.txt");
    }

    #[test]
    fn strips_status_echo() {
        assert_eq!(normalize("git push; echo done"), "git push");
        assert_eq!(normalize("tsc --noEmit ; echo \"exit $?\""), "tsc --noEmit");
    }

    #[test]
    fn keeps_leading_echo() {
        assert_eq!(normalize("echo hello"), "echo hello");
    }

    #[test]
    fn collapses_pnpm_filter() {
        assert_eq!(normalize("pnpm --filter web run build"), "pnpm run build");
        assert_eq!(normalize("pnpm --filter=@app/api test"), "pnpm test");
    }

    #[test]
    fn collapses_npm_workspace() {
        assert_eq!(normalize("npm --workspace api test"), "npm test");
        assert_eq!(normalize("npm -w api run lint"), "npm run lint");
    }

    #[test]
    fn collapses_yarn_workspace() {
        assert_eq!(normalize("yarn workspace web build"), "yarn build");
    }

    #[test]
    fn combined_decorations() {
        assert_eq!(
            normalize("cd apps/web && NODE_ENV=test pnpm --filter web test > /dev/null 2>&1"),
            "pnpm test"
        );
    }

    #[test]
    fn idempotent() {
        let cases = [
            "ls -la",
            "cd /a && FOO=1 pnpm --filter web run build >/dev/null 2>&1; echo ok",
            "git status && echo done",
            "echo 'cd /tmp && rm -rf /'",
            "",
        ];
        for c in cases {
            let once = normalize(c);
            assert_eq!(normalize(&once), once, "input: {c}");
        }
    }
}
