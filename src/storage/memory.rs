//! In-memory storage backend.
//!
//! Provides a fast, non-persistent implementation of [`SearchBackend`] and
//! [`RecordCatalog`] for tests and the developer binary. Keyword search
//! evaluates the expanded query grammar directly; semantic search uses
//! [`HashEmbedder`] pseudo-embeddings.

use crate::config::DEFAULT_COLLECTION;
use crate::embedding::{Embedder, HashEmbedder, cosine_similarity};
use crate::models::{HitOrigin, Record, RecordId, SearchHit, SourceSummary};
use crate::storage::traits::{RecordCatalog, RecordIter, SearchBackend};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::iter::Peekable;
use std::str::Chars;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, instrument};

/// Semantic hits below this cosine similarity are dropped.
const MIN_SEMANTIC_SIMILARITY: f32 = 0.2;

/// In-memory record store.
///
/// Records live in a catalog; a record is searchable only once it has been
/// indexed into a collection with [`SearchBackend::index_documents`]. This
/// mirrors a real deployment where the index lags the catalog, which is
/// exactly the situation the fallback chain handles.
///
/// # Example
///
/// ```rust,ignore
/// use teamrecall::storage::{InMemoryStore, SearchBackend};
///
/// let store = InMemoryStore::new();
/// store.index_documents("team_records", &records)?;
/// let hits = store.keyword_search("team_records", "\"billing\"", 10)?;
/// ```
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<RecordId, StoredRecord>>,
    collections: RwLock<HashMap<String, Vec<RecordId>>>,
    embedder: HashEmbedder,
    fail_keyword: AtomicBool,
    fail_semantic: AtomicBool,
    fail_catalog: AtomicBool,
    keyword_calls: AtomicUsize,
    semantic_calls: AtomicUsize,
}

struct StoredRecord {
    record: Record,
    searchable: String,
    tokens: HashSet<String>,
    embedding: Vec<f32>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with `records` indexed into the default collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn indexed(records: Vec<Record>) -> Result<Self> {
        let store = Self::new();
        store.index_documents(DEFAULT_COLLECTION, &records)?;
        Ok(store)
    }

    /// Adds a record to the catalog without indexing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, record: Record) -> Result<()> {
        let stored = self.prepare(record);
        let mut records = self.records.write().map_err(|e| lock_error("insert", &e))?;
        records.insert(stored.record.id.clone(), stored);
        Ok(())
    }

    /// Returns the number of records in the catalog.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns the number of records indexed into `collection`.
    #[must_use]
    pub fn indexed_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Makes keyword searches fail.
    pub fn set_keyword_failure(&self, fail: bool) {
        self.fail_keyword.store(fail, Ordering::SeqCst);
    }

    /// Makes semantic searches fail.
    pub fn set_semantic_failure(&self, fail: bool) {
        self.fail_semantic.store(fail, Ordering::SeqCst);
    }

    /// Makes every catalog read fail.
    pub fn set_catalog_failure(&self, fail: bool) {
        self.fail_catalog.store(fail, Ordering::SeqCst);
    }

    /// Returns how many keyword searches have been issued.
    #[must_use]
    pub fn keyword_call_count(&self) -> usize {
        self.keyword_calls.load(Ordering::SeqCst)
    }

    /// Returns how many semantic searches have been issued.
    #[must_use]
    pub fn semantic_call_count(&self) -> usize {
        self.semantic_calls.load(Ordering::SeqCst)
    }

    fn prepare(&self, record: Record) -> StoredRecord {
        let searchable = searchable_text(&record);
        let tokens = tokenize(&searchable).collect();
        let embedding = match &record.embedding {
            Some(e) if e.len() == self.embedder.dimensions() => e.clone(),
            // Records without text get a zero vector and never match semantically.
            _ => self
                .embedder
                .embed(&record.text())
                .unwrap_or_else(|_| vec![0.0; self.embedder.dimensions()]),
        };
        StoredRecord {
            record,
            searchable,
            tokens,
            embedding,
        }
    }

    fn check_catalog(&self, operation: &str) -> Result<()> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: "catalog unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn collection_ids(&self, collection: &str) -> Result<Vec<RecordId>> {
        let collections = self
            .collections
            .read()
            .map_err(|e| lock_error("read_collection", &e))?;
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}

impl SearchBackend for InMemoryStore {
    #[instrument(skip(self, records), fields(operation = "index_documents", count = records.len()))]
    fn index_documents(&self, collection: &str, records: &[Record]) -> Result<usize> {
        let prepared: Vec<StoredRecord> =
            records.iter().cloned().map(|r| self.prepare(r)).collect();

        let mut store = self
            .records
            .write()
            .map_err(|e| lock_error("index_documents", &e))?;
        let mut collections = self
            .collections
            .write()
            .map_err(|e| lock_error("index_documents", &e))?;
        let members = collections.entry(collection.to_string()).or_default();

        for stored in prepared {
            let id = stored.record.id.clone();
            if !members.contains(&id) {
                members.push(id.clone());
            }
            store.insert(id, stored);
        }
        debug!(collection, indexed = records.len(), "Indexed records");
        Ok(records.len())
    }

    fn keyword_search(
        &self,
        collection: &str,
        query_expr: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keyword.load(Ordering::SeqCst) {
            return Err(Error::RetrievalUnavailable {
                operation: "keyword_search".to_string(),
                cause: "keyword index unavailable".to_string(),
            });
        }

        let groups = parse_expression(query_expr);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.collection_ids(collection)?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("keyword_search", &e))?;

        let mut scored: Vec<(f32, &Record)> = ids
            .iter()
            .filter_map(|id| records.get(id))
            .filter_map(|stored| keyword_score(stored, &groups).map(|s| (s, &stored.record)))
            .collect();
        sort_scored(&mut scored);

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, record)| SearchHit::from_record(record, score, HitOrigin::Keyword))
            .collect())
    }

    fn semantic_search(
        &self,
        collection: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_semantic.load(Ordering::SeqCst) {
            return Err(Error::RetrievalUnavailable {
                operation: "semantic_search".to_string(),
                cause: "vector index unavailable".to_string(),
            });
        }
        if query_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(query_text)?;
        let ids = self.collection_ids(collection)?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("semantic_search", &e))?;

        let mut scored: Vec<(f32, &Record)> = ids
            .iter()
            .filter_map(|id| records.get(id))
            .map(|stored| (cosine_similarity(&query, &stored.embedding), &stored.record))
            .filter(|(score, _)| *score >= MIN_SEMANTIC_SIMILARITY)
            .collect();
        sort_scored(&mut scored);

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, record)| SearchHit::from_record(record, score, HitOrigin::Semantic))
            .collect())
    }
}

impl RecordCatalog for InMemoryStore {
    fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        self.check_catalog("list_sources")?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("list_sources", &e))?;

        let mut by_source: HashMap<&str, Vec<&Record>> = HashMap::new();
        for stored in records.values() {
            by_source
                .entry(stored.record.source.as_str())
                .or_default()
                .push(&stored.record);
        }

        let mut summaries: Vec<SourceSummary> = by_source
            .into_iter()
            .map(|(source, mut recs)| {
                recs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
                SourceSummary {
                    source: source.to_string(),
                    last_activity: recs.first().map_or(0, |r| r.timestamp),
                    summary: recs.first().map(|r| r.summary.clone()).unwrap_or_default(),
                    record_ids: recs.iter().map(|r| r.id.clone()).collect(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(summaries)
    }

    fn scan_source(&self, source: &str) -> Result<RecordIter<'_>> {
        self.check_catalog("scan_source")?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("scan_source", &e))?;
        let mut matching: Vec<Record> = records
            .values()
            .filter(|s| s.record.source == source)
            .map(|s| s.record.clone())
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        self.check_catalog("all_records")?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("all_records", &e))?;
        Ok(records.values().map(|s| s.record.clone()).collect())
    }

    fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.check_catalog("get_record")?;
        let records = self
            .records
            .read()
            .map_err(|e| lock_error("get_record", &e))?;
        Ok(records.get(id).map(|s| s.record.clone()))
    }
}

fn lock_error<E: std::fmt::Display>(operation: &str, e: &E) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("lock poisoned: {e}"),
    }
}

fn searchable_text(record: &Record) -> String {
    let mut text = format!(
        "{} {} {}\n{}",
        record.id, record.author, record.summary, record.detail
    );
    for file in &record.files {
        text.push(' ');
        text.push_str(file);
    }
    text.to_lowercase()
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn sort_scored(scored: &mut [(f32, &Record)]) {
    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
}

/// Scores a record against AND-ed groups of OR-ed terms.
///
/// Returns `None` unless every group matches.
fn keyword_score(stored: &StoredRecord, groups: &[Vec<String>]) -> Option<f32> {
    let mut raw = 0.0f32;
    for group in groups {
        let tf = group
            .iter()
            .map(|term| term_frequency(stored, term))
            .max()
            .unwrap_or(0);
        if tf == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let tf = tf as f32;
        raw += tf.ln_1p();
    }
    Some(raw / (raw + 1.0))
}

fn term_frequency(stored: &StoredRecord, term: &str) -> usize {
    if term.chars().all(char::is_alphanumeric) {
        if stored.tokens.contains(term) {
            tokenize(&stored.searchable).filter(|t| t == term).count()
        } else {
            0
        }
    } else {
        stored.searchable.matches(term).count()
    }
}

/// Parses a keyword expression into AND-ed groups of OR-ed lowercase terms.
///
/// Accepts quoted terms (embedded quotes doubled), parenthesized groups and
/// bare words. Bare boolean keywords are skipped.
pub(crate) fn parse_expression(expr: &str) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    let mut open: Option<Vec<String>> = None;
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        let term = match c {
            '(' => {
                chars.next();
                flush_group(&mut groups, open.take());
                open = Some(Vec::new());
                continue;
            },
            ')' => {
                chars.next();
                flush_group(&mut groups, open.take());
                continue;
            },
            '"' => {
                chars.next();
                read_quoted(&mut chars)
            },
            c if c.is_whitespace() => {
                chars.next();
                continue;
            },
            _ => {
                let word = read_bare(&mut chars);
                if ["and", "or", "not", "near"].contains(&word.to_lowercase().as_str()) {
                    continue;
                }
                word
            },
        };

        let term = term.trim().to_lowercase();
        if term.is_empty() {
            continue;
        }
        match open.as_mut() {
            Some(group) => group.push(term),
            None => groups.push(vec![term]),
        }
    }
    flush_group(&mut groups, open);
    groups
}

fn flush_group(groups: &mut Vec<Vec<String>>, group: Option<Vec<String>>) {
    if let Some(group) = group.filter(|g| !g.is_empty()) {
        groups.push(group);
    }
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut term = String::new();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                term.push('"');
            } else {
                break;
            }
        } else {
            term.push(c);
        }
    }
    term
}

fn read_bare(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
            break;
        }
        word.push(c);
        chars.next();
    }
    word
}
