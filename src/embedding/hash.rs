//! Deterministic bag-of-words hash embedder.

use super::Embedder;
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default embedding dimensions.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Hash-based embedder.
///
/// Each normalized word hashes to a fixed set of dimensions, so texts that
/// share vocabulary end up close. It does not capture synonyms: "database"
/// and "postgres" are unrelated to it.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates an embedder with [`DEFAULT_DIMENSIONS`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with custom dimensions (minimum 8).
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        // Bounds work on very long texts.
        const MAX_WORDS: usize = 1000;
        let mut embedding = vec![0.0f32; self.dimensions];

        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .take(MAX_WORDS);
        for word in words {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            Self::distribute_hash(&mut embedding, hasher.finish(), self.dimensions);
        }

        Self::normalize_embedding(&mut embedding);
        embedding
    }

    fn distribute_hash(embedding: &mut [f32], hash: u64, dimensions: usize) {
        for j in 0..4 {
            let idx = ((hash >> (j * 16)) as usize) % dimensions;
            let sign = if (hash >> (j + 60)) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }
    }

    fn normalize_embedding(embedding: &mut [f32]) {
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("Cannot embed empty text".to_string()));
        }
        Ok(self.pseudo_embed(text))
    }
}
