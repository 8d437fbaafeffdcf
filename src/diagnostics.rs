//! Readable reports for shader compile errors.

const CONTEXT_LINES: usize = 3;

/// First `:line:` or `line N` reference in a compiler message, 1-based.
fn error_line(message: &str) -> Option<usize> {
    // naga reports `wgsl:LINE:COL`, other backends `line N`
    for (i, _) in message.match_indices(':') {
        let digits: String = message[i + 1..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        let rest = &message[i + 1 + digits.len()..];
        if !digits.is_empty() && rest.starts_with(':') {
            return digits.parse().ok();
        }
    }
    let at = message.find("line ")?;
    message[at + 5..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

/// Formats `message` with the numbered source lines around the reported
/// line, the offending one marked with `>`. Without a line reference only the
/// message is returned.
pub fn format_shader_error(source: &str, message: &str) -> String {
    let mut out = format!("shader compilation failed: {}\n", message.trim());
    let Some(line) = error_line(message) else {
        return out;
    };
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return out;
    }
    let first = line.saturating_sub(CONTEXT_LINES).max(1);
    let last = (line + CONTEXT_LINES).min(lines.len());
    let width = last.to_string().len();
    for n in first..=last {
        let marker = if n == line { '>' } else { ' ' };
        out.push_str(&format!("{marker} {n:>width$} | {}\n", lines[n - 1]));
    }
    out
}
