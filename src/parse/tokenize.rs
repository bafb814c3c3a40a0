/// Try to split one leading `KEY=VALUE` assignment off the front of a
/// command string. Returns the key, the value, and the remainder.
fn split_leading_assignment(rest: &str) -> Option<(&str, &str, &str)> {
    let eq_pos = rest.find('=')?;
    let key = &rest[..eq_pos];
    let valid_key = !key.is_empty()
        && key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        return None;
    }
    let after_eq = &rest[eq_pos + 1..];
    let sp = after_eq.find(char::is_whitespace)?;
    Some((key, &after_eq[..sp], after_eq[sp..].trim_start()))
}

/// Extract the first real command word, skipping leading `VAR=value`
/// assignments and stripping a path prefix (`/usr/bin/ls` → `ls`).
pub fn base_command(command: &str) -> String {
    let mut rest = command.trim();
    while let Some((_, _, tail)) = split_leading_assignment(rest) {
        rest = tail;
    }
    let word = rest.split_whitespace().next().unwrap_or("");
    match word.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => name.to_string(),
        _ => word.to_string(),
    }
}

/// Drop leading `KEY=VALUE` assignments and return the remainder.
pub fn strip_assignments(command: &str) -> &str {
    let mut rest = command.trim();
    while let Some((_, _, tail)) = split_leading_assignment(rest) {
        rest = tail;
    }
    rest
}

/// Extract leading `KEY=VALUE` pairs from a command string.
pub fn env_assignments(command: &str) -> Vec<(String, String)> {
    let mut result = Vec::new();
    let mut rest = command.trim();
    while let Some((key, val, tail)) = split_leading_assignment(rest) {
        result.push((key.to_string(), val.to_string()));
        rest = tail;
    }
    result
}

/// Tokenize a command segment into words using shlex (POSIX word
/// splitting), falling back to whitespace splitting on unparsable input.
pub fn tokenize(command: &str) -> Vec<String> {
    shlex::split(command)
        .unwrap_or_else(|| command.split_whitespace().map(String::from).collect())
}
