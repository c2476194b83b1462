//! Canonical text form used for hashing descriptors and directories.

/// Normalize `text` to the canonical form used for hashing (spec §4.1):
/// line endings collapsed to `\n`, leading/trailing horizontal whitespace
/// stripped per line, exactly one trailing `\n`. Pure and idempotent.
pub fn canonicalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len() + 1);
    for line in unified.split('\n') {
        out.push_str(line.trim_matches(|c| c == ' ' || c == '\t'));
        out.push('\n');
    }
    // split('\n') on a string ending in '\n' yields a trailing empty piece,
    // which the loop above turns into one extra blank line; drop it so the
    // output ends with exactly one '\n'.
    while out.ends_with("\n\n") {
        out.pop();
    }
    if out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let samples = [
            "hello\nworld\n",
            "hello\r\nworld\r\n",
            "  hello  \n\tworld\t\n",
            "hello\nworld",
            "",
            "a\r\n\r\nb",
        ];
        for s in samples {
            let once = canonicalize(s);
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn normalizes_line_endings() {
        assert_eq!(canonicalize("a\r\nb\rc\n"), canonicalize("a\nb\nc\n"));
    }

    #[test]
    fn strips_surrounding_whitespace_and_trailing_newline() {
        assert_eq!(canonicalize("  a  \n  b  "), "a\nb\n");
        assert_eq!(canonicalize("a\nb"), canonicalize("a\nb\n"));
    }
}
