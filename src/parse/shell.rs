use super::types::{Operator, Segment, Segmented};

/// Split a command at shell operators (`&&`, `||`, `;`, `|`, `|&`),
/// respecting single/double quotes and backslash escapes.
///
/// Segmentation is conservative: when the string contains command
/// substitution (`$(...)` or backticks outside single quotes) or ends with
/// an unclosed quote, splitting is uncertain, so the whole string is
/// returned as a single segment. The denylist's full-string check still
/// applies to it, and the allowlist degrades to its strict single-segment
/// path.
pub fn segment(command: &str) -> Segmented {
    let whole = |uncertain: bool| Segmented {
        segments: vec![Segment {
            raw: command.trim().to_string(),
        }],
        operators: vec![],
        uncertain,
    };

    let chars: Vec<char> = command.chars().collect();
    let len = chars.len();
    let mut parts = Vec::new();
    let mut operators = Vec::new();
    let mut buf = String::new();
    let mut i = 0;
    let (mut sq, mut dq, mut esc) = (false, false, false);

    while i < len {
        let c = chars[i];

        if esc {
            buf.push(c);
            esc = false;
            i += 1;
            continue;
        }
        if c == '\\' && !sq {
            esc = true;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == '\'' && !dq {
            sq = !sq;
            buf.push(c);
            i += 1;
            continue;
        }
        if c == '"' && !sq {
            dq = !dq;
            buf.push(c);
            i += 1;
            continue;
        }
        if sq {
            buf.push(c);
            i += 1;
            continue;
        }

        // Command substitution makes operator positions ambiguous (the
        // shell expands `$()` even inside double quotes). Bail out to a
        // single segment rather than guess.
        if c == '`' || (c == '$' && i + 1 < len && chars[i + 1] == '(') {
            return whole(true);
        }

        if dq {
            buf.push(c);
            i += 1;
            continue;
        }

        // Two-char operators
        if i + 1 < len {
            let op = match (c, chars[i + 1]) {
                ('&', '&') => Some(Operator::And),
                ('|', '|') => Some(Operator::Or),
                ('|', '&') => Some(Operator::PipeErr),
                _ => None,
            };
            if let Some(op) = op {
                parts.push(buf.trim().to_string());
                operators.push(op);
                buf.clear();
                i += 2;
                continue;
            }
        }

        // Single-char operators
        match c {
            '|' => {
                parts.push(buf.trim().to_string());
                operators.push(Operator::Pipe);
                buf.clear();
                i += 1;
                continue;
            }
            ';' => {
                parts.push(buf.trim().to_string());
                operators.push(Operator::Semi);
                buf.clear();
                i += 1;
                continue;
            }
            _ => {}
        }

        buf.push(c);
        i += 1;
    }

    // Unterminated quoting — splitting was unreliable
    if sq || dq {
        return whole(true);
    }

    let tail = buf.trim().to_string();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts.retain(|p| !p.is_empty());

    if parts.is_empty() {
        return whole(false);
    }

    Segmented {
        segments: parts.into_iter().map(|raw| Segment { raw }).collect(),
        operators,
        uncertain: false,
    }
}

/// Extract the file targets of output redirections (`>`, `>>`) and `tee`
/// sinks, outside quotes.
///
/// Skips fd duplication/closing (`2>&1`, `>&-`), process substitution
/// (`>(...)`), and here-doc markers (`<<`). Targets are returned with
/// surrounding quotes stripped so they can be checked against path
/// guardrails.
pub fn redirect_targets(command: &str) -> Vec<String> {
    let mut targets = Vec::new();

    let seg = segment(command);
    for (idx, s) in seg.segments.iter().enumerate() {
        collect_gt_targets(&s.raw, &mut targets);

        // `... | tee file` writes its stdin to `file`
        if idx > 0
            && matches!(
                seg.operators.get(idx - 1),
                Some(Operator::Pipe) | Some(Operator::PipeErr)
            )
        {
            let words = super::tokenize(&s.raw);
            if words.first().is_some_and(|w| w == "tee") {
                targets.extend(
                    words
                        .into_iter()
                        .skip(1)
                        .filter(|w| !w.starts_with('-')),
                );
            }
        }
    }

    targets
}

/// Scan one segment for `>` / `>>` and push the following word.
fn collect_gt_targets(segment: &str, targets: &mut Vec<String>) {
    let chars: Vec<char> = segment.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let (mut sq, mut dq, mut esc) = (false, false, false);

    while i < len {
        let c = chars[i];

        if esc {
            esc = false;
            i += 1;
            continue;
        }
        if c == '\\' && !sq {
            esc = true;
            i += 1;
            continue;
        }
        if c == '\'' && !dq {
            sq = !sq;
            i += 1;
            continue;
        }
        if c == '"' && !sq {
            dq = !dq;
            i += 1;
            continue;
        }
        if sq || dq {
            i += 1;
            continue;
        }

        if c == '>' {
            let mut j = i + 1;
            // `>>` — same target position
            if j < len && chars[j] == '>' {
                j += 1;
            }
            // `>&N` / `>&-` is fd duplication, `>(...)` is process
            // substitution; neither names a file
            if j < len && (chars[j] == '&' || chars[j] == '(') {
                i = j + 1;
                continue;
            }
            while j < len && chars[j].is_whitespace() {
                j += 1;
            }
            let mut word = String::new();
            while j < len && !chars[j].is_whitespace() && chars[j] != ';' && chars[j] != '|' {
                word.push(chars[j]);
                j += 1;
            }
            let word = word.trim_matches(|q| q == '\'' || q == '"').to_string();
            if !word.is_empty() {
                targets.push(word);
            }
            i = j;
            continue;
        }

        i += 1;
    }
}
