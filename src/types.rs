//! Public and internal types for the mass-indexing API and pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Opaque record identifier as handed out by a [`RecordSource`](crate::source::RecordSource).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        RecordId(n.to_string())
    }
}

/// One or more related record types that share one mass-indexing sub-run and target index(es).
#[derive(Clone, Debug)]
pub struct TypeGroup {
    /// Group name, used in logs and failure messages.
    pub name: String,
    /// Record type names in this group. The first one names the group's records in failure messages.
    pub entity_types: Vec<String>,
    /// Target indexes. Every built document is written to each of them.
    pub indexes: Vec<String>,
}

impl TypeGroup {
    /// Group with one record type written to one index, all sharing `name`.
    pub fn single(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entity_types: vec![name.to_string()],
            indexes: vec![name.to_string()],
        }
    }

    pub fn with_indexes(mut self, indexes: &[&str]) -> Self {
        self.indexes = indexes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn primary_type(&self) -> &str {
        self.entity_types
            .first()
            .map(String::as_str)
            .unwrap_or(self.name.as_str())
    }
}

/// A loaded record. The body is whatever the source produced; only the document builder looks inside.
#[derive(Clone, Debug)]
pub struct Record {
    pub id: RecordId,
    pub entity_type: String,
    pub body: serde_json::Value,
}

/// Ordered identifiers produced by one `next_batch` call.
pub type IdentifierBatch = Vec<RecordId>;

/// Records loaded for one identifier batch, same order where the source preserves it.
pub type RecordBatch = Vec<Record>;

/// Field name → value. What a document builder produces for one record.
pub type Document = BTreeMap<String, serde_json::Value>;

/// Durability knob attached to a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStrategy {
    #[default]
    None,
    Force,
}

/// Visibility knob attached to a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshStrategy {
    #[default]
    None,
    Force,
}

/// Per-record write operation.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Add(Document),
    Update(Document),
    Delete,
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::Add(_) => "add",
            WriteOp::Update(_) => "update",
            WriteOp::Delete => "delete",
        }
    }
}

/// One write for one record, tagged with its target index and strategies.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub index: String,
    pub entity_type: String,
    pub id: RecordId,
    pub op: WriteOp,
    pub commit: CommitStrategy,
    pub refresh: RefreshStrategy,
}

impl WorkItem {
    /// Add with no forced commit or refresh: the mass indexer flushes and refreshes once at the end.
    pub fn add(index: &str, entity_type: &str, id: RecordId, doc: Document) -> Self {
        Self {
            index: index.to_string(),
            entity_type: entity_type.to_string(),
            id,
            op: WriteOp::Add(doc),
            commit: CommitStrategy::None,
            refresh: RefreshStrategy::None,
        }
    }
}

/// Ordered group of work items submitted together.
#[derive(Clone, Debug, Default)]
pub struct BulkSubmission {
    pub items: Vec<WorkItem>,
}

impl BulkSubmission {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Raw backend answer for one item of a bulk submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemResult {
    pub status: u16,
    /// Backend error type, e.g. `"version_conflict_engine_exception"`. Empty string counts as an error.
    pub error_type: Option<String>,
    pub error_reason: Option<String>,
}

impl ItemResult {
    pub fn ok() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }

    pub fn error(status: u16, error_type: &str, reason: &str) -> Self {
        Self {
            status,
            error_type: Some(error_type.to_string()),
            error_reason: Some(reason.to_string()),
        }
    }
}

/// Backend answer for a whole bulk submission: one result per item, in submission order.
#[derive(Clone, Debug, Default)]
pub struct BulkResponse {
    pub items: Vec<ItemResult>,
}

/// Whole-index maintenance operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexScaleOp {
    Purge,
    MergeSegments,
    Flush,
    Refresh,
}

impl fmt::Display for IndexScaleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexScaleOp::Purge => "purge",
            IndexScaleOp::MergeSegments => "mergeSegments",
            IndexScaleOp::Flush => "flush",
            IndexScaleOp::Refresh => "refresh",
        };
        f.write_str(s)
    }
}

/// An [`IndexScaleOp`] bound to an index and tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexScaleWork {
    pub op: IndexScaleOp,
    pub index: String,
    pub tenant: Option<String>,
}

/// Run-wide counters. Only ever incremented.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    loaded: AtomicU64,
    built: AtomicU64,
    added: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounters {
    pub fn add_loaded(&self, n: u64) -> u64 {
        self.loaded.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_built(&self, n: u64) -> u64 {
        self.built.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_added(&self, n: u64) -> u64 {
        self.added.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_total(&self, n: u64) -> u64 {
        self.total.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn built(&self) -> u64 {
        self.built.load(Ordering::Relaxed)
    }

    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Returned by a successful run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub loaded: u64,
    pub built: u64,
    pub added: u64,
    /// Sum of the (approximate) per-group total counts.
    pub total: u64,
    /// Entity-level failures seen, including those past the flooding threshold.
    pub entity_failures: u64,
    pub elapsed: Duration,
}
