//! Line-oriented template injection.
//!
//! A sentinel is an exact full-line match, never a pattern. Every
//! occurrence of a sentinel line is replaced with its (possibly
//! multi-line) replacement text; all other lines pass through
//! unchanged, preserving order and the document's trailing shape. A
//! sentinel that never occurs is simply never replaced; whether that
//! is an error is the caller's business.

/// Replace sentinel lines in `template` according to `substitutions`
/// (sentinel line without its newline, replacement text).
pub fn inject(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    for line in template.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        match substitutions.iter().find(|(sentinel, _)| *sentinel == body) {
            Some((_, replacement)) => {
                out.push_str(replacement);
                out.push_str(newline);
            }
            None => out.push_str(line),
        }
    }
    out
}
