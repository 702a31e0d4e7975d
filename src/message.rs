
//  Commit message summarization for the tabular outputs.
//
//  Messages are stored raw on the commit; only the report layer needs the
//  single-line truncated form.

/// Collapse a multi-line commit message into one line of at most
/// `max_len` characters, appending `"..."` when truncated.
pub fn summarize(message: &str, max_len: usize) -> String {
    let collapsed = message
        .replace("\r\n", " ")
        .replace(['\r', '\n'], " ");

    let mut short = String::with_capacity(collapsed.len());
    let mut last_was_space = false;
    for ch in collapsed.trim().chars() {
        if ch == ' ' {
            if !last_was_space {
                short.push(' ');
            }
            last_was_space = true;
        } else {
            short.push(ch);
            last_was_space = false;
        }
    }

    if short.chars().count() > max_len {
        let truncated: String = short.chars().take(max_len).collect();
        format!("{}...", truncated)
    } else {
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newlines_collapse_to_single_spaces() {
        assert_eq!(summarize("fix\nthe\r\nbuild\rnow", 80), "fix the build now");
    }

    #[test]
    fn repeated_spaces_collapse_and_edges_trim() {
        assert_eq!(summarize("  a   b  \n  c  ", 80), "a b c");
    }

    #[test]
    fn truncation_appends_ellipsis_at_exact_length() {
        let short = summarize("abcdefghij", 4);
        assert_eq!(short, "abcd...");
        assert_eq!(short.chars().count(), 4 + 3);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let short = summarize("äöüß spät", 4);
        assert_eq!(short, "äöüß...");
    }

    #[test]
    fn short_form_never_contains_line_breaks() {
        let short = summarize("a\nb\rc\r\nd", 100);
        assert!(!short.contains('\n'));
        assert!(!short.contains('\r'));
    }

    #[test]
    fn summary_is_bounded_by_max_len_plus_ellipsis() {
        for msg in ["", "short", "a much longer commit message body"] {
            for max in [0, 1, 5, 100] {
                assert!(summarize(msg, max).chars().count() <= max + 3);
            }
        }
    }
}
