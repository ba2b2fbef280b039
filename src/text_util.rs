/// Characters kept on each side of an answer span when building its context.
pub const DEFAULT_CONTEXT_CHARS: usize = 150;

/// Collapse every run of whitespace (newlines included) into one space and
/// trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into sentences.
///
/// A sentence ends at `.`, `!` or `?` (plus any closing quotes or brackets)
/// followed by whitespace, or at a blank line. Returned slices are trimmed
/// and never empty.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '.' | '!' | '?' => {
                let mut end = idx + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if matches!(next, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.peek() {
                    Some(&(_, next)) if next.is_whitespace() => Some(end),
                    None => Some(end),
                    _ => None,
                }
            }
            '\n' if text[idx + 1..].starts_with('\n') => Some(idx),
            _ => None,
        };

        if let Some(end) = boundary {
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Widen `span` (a byte range into `text`) by up to `chars` characters on
/// each side, snapping outwards to word boundaries, and return the
/// whitespace-normalized result.
pub fn context_window(text: &str, span: (usize, usize), chars: usize) -> String {
    let (span_start, span_end) = span;

    let mut start = text[..span_start]
        .char_indices()
        .rev()
        .nth(chars.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    if start > 0 {
        // Move forward to the start of the next whole word.
        start = text[start..]
            .find(char::is_whitespace)
            .map(|ws| start + ws)
            .filter(|&ws| ws <= span_start)
            .unwrap_or(start);
    }

    let mut end = text[span_end..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| span_end + i)
        .unwrap_or(text.len());
    if end < text.len() {
        end = text[..end]
            .rfind(char::is_whitespace)
            .filter(|&ws| ws >= span_end)
            .unwrap_or(end);
    }

    normalize_whitespace(&text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_newlines_and_runs() {
        assert_eq!(
            normalize_whitespace("  hello\n\nworld \t again  "),
            "hello world again"
        );
    }

    #[test]
    fn normalize_empty() {
        assert_eq!(normalize_whitespace(" \n\t "), "");
    }

    #[test]
    fn word_count_basic() {
        assert_eq!(word_count("one two  three\nfour"), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn split_sentences_on_terminators() {
        let s = split_sentences("First one. Second one! Third? Fourth");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?", "Fourth"]);
    }

    #[test]
    fn split_sentences_keeps_decimals_and_closing_quotes() {
        let s = split_sentences("Pi is 3.14 roughly. He said \"stop.\" Then left.");
        assert_eq!(
            s,
            vec!["Pi is 3.14 roughly.", "He said \"stop.\"", "Then left."]
        );
    }

    #[test]
    fn split_sentences_on_blank_lines() {
        let s = split_sentences("Heading\n\nBody text here");
        assert_eq!(s, vec!["Heading", "Body text here"]);
    }

    #[test]
    fn split_sentences_empty() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn context_window_short_text_is_whole() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let start = text.find("brown").unwrap();
        let ctx = context_window(text, (start, start + 9), 150);
        assert_eq!(ctx, text);
    }

    #[test]
    fn context_window_trims_at_word_boundaries() {
        let text = format!("{} needle {}", "alpha ".repeat(50), "omega ".repeat(50));
        let start = text.find("needle").unwrap();
        let ctx = context_window(&text, (start, start + 6), 20);

        assert!(ctx.contains("needle"));
        assert!(ctx.len() < text.len());
        for word in ctx.split(' ') {
            assert!(
                matches!(word, "alpha" | "omega" | "needle"),
                "partial word {word:?}"
            );
        }
    }

    #[test]
    fn context_window_handles_multibyte() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(20);
        let start = text.find("日本語").unwrap();
        let ctx = context_window(&text, (start, start + "日本語".len()), 10);
        assert!(ctx.contains("日本語"));
    }
}
