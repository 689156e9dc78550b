//! Search backend trait.
//!
//! The search layer is an opaque service owned by the storage collaborator.
//! The core only indexes documents and issues keyword and semantic queries
//! against a named collection.
//!
//! # Query Expressions
//!
//! `keyword_search` receives the output of
//! [`crate::services::QueryExpander`]: quoted terms with embedded quotes
//! doubled, parenthesized `OR` groups, and implicit `AND` between groups.
//!
//! ```text
//! ("vcs" OR "version control system") "strategy"
//! ```
//!
//! # Error Modes
//!
//! | Error Type | Meaning |
//! |------------|---------|
//! | `Error::RetrievalUnavailable` | Backend errored or timed out; callers degrade |
//! | `Error::InvalidInput` | Malformed expression or collection name |

use crate::Result;
use crate::models::{Record, SearchHit};

/// Trait for search backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn SearchBackend>`
/// - Use interior mutability for index state
/// - Return hits ordered by descending score
/// - Fill `SearchHit::id` for every hit that corresponds to a record; hits
///   without an id are never subject to the permission double check
pub trait SearchBackend: Send + Sync {
    /// Indexes records into a collection.
    ///
    /// Returns the number of records indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if indexing fails.
    fn index_documents(&self, collection: &str, records: &[Record]) -> Result<usize>;

    /// Runs a keyword query expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    fn keyword_search(&self, collection: &str, query_expr: &str, limit: usize)
    -> Result<Vec<SearchHit>>;

    /// Runs a semantic similarity query over raw text.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    fn semantic_search(
        &self,
        collection: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}
