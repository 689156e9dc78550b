//! Record catalog trait.
//!
//! Direct, index-free access to records. The fallback chain scans it when
//! the search index is empty or stale, and the permission filter resolves
//! permitted record ids from it.

use crate::Result;
use crate::models::{Record, RecordId, SourceSummary};

/// Iterator over the records of one source.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Trait for record catalogs.
pub trait RecordCatalog: Send + Sync {
    /// Lists sources, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn list_sources(&self) -> Result<Vec<SourceSummary>>;

    /// Streams the records of one source.
    ///
    /// Callers may stop early; implementations should not materialize more
    /// than they must.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened. Per-record failures
    /// are reported through the iterator.
    fn scan_source(&self, source: &str) -> Result<RecordIter<'_>>;

    /// Returns every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn all_records(&self) -> Result<Vec<Record>>;

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn get_record(&self, id: &RecordId) -> Result<Option<Record>>;
}
