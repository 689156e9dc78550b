//! Storage collaborator abstraction.
//!
//! The indexing engine is external. The core talks to it through two traits:
//! - [`SearchBackend`]: index documents, keyword search, semantic search
//! - [`RecordCatalog`]: direct record access for fallback scans and
//!   permission resolution
//!
//! [`InMemoryStore`] implements both for tests and local use.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{RecordCatalog, RecordIter, SearchBackend};
