// text_prep.rs — Text preparation for embedding generation.
//
// Cleans raw input strings, caps their length in words, and groups them into
// fixed-size batches for the model.

/// Normalize a raw input string before tokenization.
///
/// - control characters are dropped
/// - every whitespace run (including newlines and tabs) becomes a single space
/// - leading/trailing whitespace is removed
///
/// Case and punctuation are kept; the tokenizer owns those decisions.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}

/// Keep the first `max_words` whitespace-separated words, re-joined with single spaces.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `texts` into consecutive batches of at most `batch_size` items.
///
/// Order is preserved and no empty batch is ever produced (an empty input gives
/// no batches at all).
pub fn make_text_batches(texts: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let batch_size = batch_size.max(1);
    texts.chunks(batch_size).map(|chunk| chunk.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  hello \n\t world  "), "hello world");
        assert_eq!(clean_text("a\r\n\r\nb"), "a b");
    }

    #[test]
    fn test_clean_text_drops_control_chars() {
        assert_eq!(clean_text("bell\u{7}ring\u{0}"), "bellring");
        assert_eq!(clean_text("keep, punctuation & Case!"), "keep, punctuation & Case!");
    }

    #[test]
    fn test_clean_text_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n\t "), "");
    }

    #[test]
    fn test_truncate_words() {
        let text = "one two three four five six seven eight nine ten";
        assert_eq!(truncate_words(text, 5), "one two three four five");
        assert_eq!(truncate_words(text, 100), text);
        assert_eq!(truncate_words("", 5), "");
        assert_eq!(truncate_words(text, 0), "");
    }

    #[test]
    fn test_truncate_words_irregular_spacing() {
        assert_eq!(truncate_words("a  b c", 2), "a b");
        assert_eq!(truncate_words(" a b", 1), "a");
        assert_eq!(truncate_words("\t one \n\n two   three ", 5), "one two three");
        assert_eq!(truncate_words("   ", 3), "");
    }

    #[test]
    fn test_truncate_words_multibyte() {
        assert_eq!(truncate_words("café crème brûlée", 2), "café crème");
    }

    #[test]
    fn test_make_text_batches_sizes() {
        let texts: Vec<String> = (0..70).map(|i| format!("t{i}")).collect();
        let batches = make_text_batches(&texts, 32);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![32, 32, 6]);

        let flat: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(flat, texts);
    }

    #[test]
    fn test_make_text_batches_exact_multiple_has_no_trailing_empty_batch() {
        let texts: Vec<String> = (0..64).map(|i| i.to_string()).collect();
        let batches = make_text_batches(&texts, 32);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn test_make_text_batches_edge_cases() {
        assert!(make_text_batches(&[], 32).is_empty());

        let texts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(make_text_batches(&texts, 0).len(), 2);
    }
}
