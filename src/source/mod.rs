//! Record sources: where identifiers and records come from.

pub mod jsonl;

pub use jsonl::{JsonDocumentBuilder, JsonLinesSource};

use anyhow::Result;

use crate::types::{IdentifierBatch, Record, RecordId, TypeGroup};

/// Successive identifier batches for one type group.
pub trait IdentifierCursor: Send {
    /// Next batch, or `None` when there are no more identifiers.
    fn next_batch(&mut self) -> Result<Option<IdentifierBatch>>;

    /// Release resources. Called once, whether loading finished, failed or was cancelled.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The backing data store.
pub trait RecordSource: Send + Sync {
    /// Approximate number of records in the group. May be wrong; only used for progress.
    fn total_count(&self, group: &TypeGroup) -> Result<u64>;

    fn open_identifiers(&self, group: &TypeGroup, batch_size: usize) -> Result<Box<dyn IdentifierCursor>>;

    /// Load records for `ids`. Identifiers that no longer exist are skipped.
    fn load_records(&self, group: &TypeGroup, ids: &[RecordId]) -> Result<Vec<Record>>;
}

/// Cursor over identifiers already held in memory.
pub struct VecIdentifierCursor {
    ids: Vec<RecordId>,
    pos: usize,
    batch_size: usize,
}

impl VecIdentifierCursor {
    pub fn new(ids: Vec<RecordId>, batch_size: usize) -> Self {
        Self {
            ids,
            pos: 0,
            batch_size: batch_size.max(1),
        }
    }
}

impl IdentifierCursor for VecIdentifierCursor {
    fn next_batch(&mut self) -> Result<Option<IdentifierBatch>> {
        if self.pos >= self.ids.len() {
            return Ok(None);
        }
        let end = (self.pos + self.batch_size).min(self.ids.len());
        let batch = self.ids[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(batch))
    }
}
