//! Normalized content hashing.

use sha2::{Digest, Sha256};

/// SHA-256 hasher over normalized text.
///
/// Normalization trims, lowercases and collapses runs of whitespace, so
/// `"  Who owns  Billing?"` and `"who owns billing?"` hash identically.
///
/// ```rust
/// use teamrecall::cache::ContentHasher;
///
/// let a = ContentHasher::hash("Who owns  Billing?");
/// let b = ContentHasher::hash("  who owns billing? ");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Returns the lowercase hex SHA-256 of the normalized text.
    #[must_use]
    pub fn hash(content: &str) -> String {
        let normalized = Self::normalize(content);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Trims, lowercases and collapses whitespace.
    #[must_use]
    pub fn normalize(content: &str) -> String {
        content
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
