//! Logging helpers so store keys and compacted payloads stay on one log line.

/// Longest preview kept in a log line; compacted stores can get long.
const MAX_PREVIEW: usize = 160;

/// Single-line form of `s` for log output. Control characters are escaped
/// and anything past [`MAX_PREVIEW`] characters is replaced by `…`.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(MAX_PREVIEW) {
        push_escaped(&mut out, ch);
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}

fn push_escaped(out: &mut String, ch: char) {
    use std::fmt::Write;
    let _ = match ch {
        '\\' => out.write_str("\\\\"),
        '\n' => out.write_str("\\n"),
        '\r' => out.write_str("\\r"),
        '\t' => out.write_str("\\t"),
        c if c.is_control() => write!(out, "\\x{:02X}", u32::from(c)),
        c => out.write_char(c),
    };
}
