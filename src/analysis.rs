//! Term extraction.
//!
//! Text is split on Unicode word boundaries (UAX #29) and lower-cased.
//! Postings and term deletions both go through [`tokenize`] and
//! [`normalize_term`], so a term matches exactly the tokens indexed for it.

use unicode_segmentation::UnicodeSegmentation;

/// Split text into lower-cased word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Normalize a single query term the way indexed tokens are normalized.
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Hello, World! It's 2024."),
            vec!["hello", "world", "it's", "2024"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term(" Foo "), "foo");
    }
}
