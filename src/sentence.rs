//! UAX #29 sentence segmentation, shared by the semantic chunker and the
//! PDF boundary filter.

use unicode_segmentation::UnicodeSegmentation;

/// Splits `text` into trimmed, non-empty sentence segments using Unicode UAX #29
/// sentence boundary rules.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_sentences() {
        let sentences = split_sentences(
            "Paris is the capital of France. The Seine runs through it. Croissants are popular.",
        );
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Paris is the capital of France.");
    }

    #[test]
    fn drops_empty_segments() {
        let sentences = split_sentences("Hello.   World.");
        assert_eq!(sentences, vec!["Hello.", "World."]);
    }

    #[test]
    fn empty_input_yields_no_sentences() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }
}
