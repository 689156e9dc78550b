//! Keyword extraction and overlap scoring.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Common English stop words.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
        "can", "need", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us",
        "them", "my", "your", "his", "its", "our", "their", "this", "that", "these", "those",
        "what", "which", "who", "whom", "how", "when", "where", "why", "all", "each", "every",
        "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only",
        "own", "same", "so", "than", "too", "very", "just", "about", "also", "now", "here",
        "there", "up", "down", "out", "if", "then", "into", "through", "during", "before",
        "after", "above", "below", "between", "under", "again", "further", "once", "any",
        "something", "anything", "nothing",
    ]
    .into_iter()
    .collect()
});

/// Words that carry the question's intent rather than its subject.
static INTENT_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "owns", "owner", "owners", "owned", "maintains", "maintainer", "maintainers",
        "responsible", "knows", "know", "expert", "experts", "choose", "chose", "chosen",
        "decide", "decided", "pick", "picked", "use", "used", "using", "happened", "happen",
        "working", "worked", "recently", "recent", "yesterday", "today", "last", "week",
        "month", "latest", "anyone", "someone", "tell", "explain", "why", "please",
    ]
    .into_iter()
    .collect()
});

/// Returns true for stop words.
#[must_use]
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word.to_lowercase().as_str())
}

/// Extracts subject keywords: lowercase, no stop words, no intent words,
/// no pure numbers, deduplicated, in order of appearance.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for word in text.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let cleaned = clean(word);
        if cleaned.len() < 2
            || STOP_WORDS.contains(cleaned.as_str())
            || INTENT_WORDS.contains(cleaned.as_str())
            || cleaned.chars().all(char::is_numeric)
            || keywords.contains(&cleaned)
        {
            continue;
        }
        keywords.push(cleaned);
    }
    keywords
}

/// Removes stop words, keeping everything else in order.
#[must_use]
pub fn strip_stop_words(text: &str) -> String {
    text.split_whitespace()
        .filter(|w| !STOP_WORDS.contains(clean(w).as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fraction of `keywords` present in `text`, in `[0, 1]`.
///
/// Alphanumeric keywords must match a whole word; keywords with
/// punctuation (paths, `#123`) match as substrings.
#[must_use]
pub fn keyword_overlap(keywords: &[String], text: &str) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let tokens: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let matched = keywords
        .iter()
        .filter(|k| {
            if k.chars().all(char::is_alphanumeric) {
                tokens.contains(k.as_str())
            } else {
                lower.contains(k.as_str())
            }
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let overlap = matched as f32 / keywords.len() as f32;
    overlap
}

fn clean(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keywords() {
        assert_eq!(
            extract_keywords("Who owns the billing service?"),
            vec!["billing", "service"]
        );
        assert_eq!(
            extract_keywords("Why did we choose Postgres over MySQL?"),
            vec!["postgres", "over", "mysql"]
        );
        assert!(extract_keywords("what was I working on").is_empty());
    }

    #[test]
    fn test_extract_keeps_paths() {
        assert_eq!(
            extract_keywords("who touched src/billing/invoice.rs"),
            vec!["touched", "src/billing/invoice.rs"]
        );
    }

    #[test]
    fn test_strip_stop_words() {
        assert_eq!(strip_stop_words("who owns the billing service"), "owns billing service");
    }

    #[test]
    fn test_keyword_overlap() {
        let keywords = vec!["billing".to_string(), "retries".to_string()];
        assert!((keyword_overlap(&keywords, "Billing service") - 0.5).abs() < f32::EPSILON);
        assert!((keyword_overlap(&keywords, "billing retries") - 1.0).abs() < f32::EPSILON);
        assert!(keyword_overlap(&keywords, "rebilling").abs() < f32::EPSILON);
        assert!(keyword_overlap(&[], "anything").abs() < f32::EPSILON);
    }
}
