//! Storage collaborator traits.

mod catalog;
mod search;

pub use catalog::{RecordCatalog, RecordIter};
pub use search::SearchBackend;
