//! In-memory backend with a call journal. Used for dry runs and by the test suite.

use anyhow::{Result, bail};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::{
    BulkResponse, BulkSubmission, Document, IndexScaleOp, IndexScaleWork, ItemResult, RecordId,
    RefreshStrategy, WriteOp,
};
use crate::utils::lock_or_recover;

use super::IndexBackend;

/// One observed backend call, in the order the backend saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Write {
        index: String,
        id: RecordId,
        op: &'static str,
    },
    Scale {
        op: IndexScaleOp,
        index: String,
    },
    ResetSchema(String),
}

#[derive(Default)]
struct IndexState {
    /// Written but not yet refreshed.
    pending: BTreeMap<RecordId, Option<Document>>,
    visible: BTreeMap<RecordId, Document>,
}

impl IndexState {
    fn refresh(&mut self) {
        for (id, doc) in std::mem::take(&mut self.pending) {
            match doc {
                Some(doc) => {
                    self.visible.insert(id, doc);
                }
                None => {
                    self.visible.remove(&id);
                }
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    scale_ops: HashSet<(IndexScaleOp, String)>,
    items: HashMap<RecordId, ItemResult>,
    /// Items answered with a timeout this many more times.
    timeouts: HashMap<RecordId, u32>,
    /// Fail the whole submission once this many submissions have succeeded.
    fail_submission_after: Option<usize>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    journal: Mutex<Vec<BackendCall>>,
    indexes: Mutex<HashMap<String, IndexState>>,
    faults: Mutex<Faults>,
    submissions: Mutex<usize>,
    submit_delay: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every `submit` (simulates a slow backend).
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    pub fn fail_scale_op(&self, op: IndexScaleOp, index: &str) {
        lock_or_recover(&self.faults)
            .scale_ops
            .insert((op, index.to_string()));
    }

    pub fn fail_item(&self, id: RecordId, result: ItemResult) {
        lock_or_recover(&self.faults).items.insert(id, result);
    }

    pub fn time_out_item(&self, id: RecordId, times: u32) {
        lock_or_recover(&self.faults).timeouts.insert(id, times);
    }

    pub fn fail_submissions_after(&self, ok_submissions: usize) {
        lock_or_recover(&self.faults).fail_submission_after = Some(ok_submissions);
    }

    pub fn journal(&self) -> Vec<BackendCall> {
        lock_or_recover(&self.journal).clone()
    }

    pub fn submission_count(&self) -> usize {
        *lock_or_recover(&self.submissions)
    }

    /// Refreshed documents of `index`.
    pub fn documents(&self, index: &str) -> BTreeMap<RecordId, Document> {
        lock_or_recover(&self.indexes)
            .get(index)
            .map(|s| s.visible.clone())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, index: &str) -> usize {
        lock_or_recover(&self.indexes)
            .get(index)
            .map(|s| s.pending.len())
            .unwrap_or(0)
    }

    fn record(&self, call: BackendCall) {
        lock_or_recover(&self.journal).push(call);
    }

    fn item_result(&self, id: &RecordId) -> ItemResult {
        let mut faults = lock_or_recover(&self.faults);
        if let Some(left) = faults.timeouts.get_mut(id)
            && *left > 0
        {
            *left -= 1;
            return ItemResult::error(408, "timeout_exception", "item timed out");
        }
        faults.items.get(id).cloned().unwrap_or_else(ItemResult::ok)
    }
}

impl IndexBackend for InMemoryBackend {
    fn submit(&self, bulk: &BulkSubmission) -> Result<BulkResponse> {
        if let Some(delay) = self.submit_delay {
            std::thread::sleep(delay);
        }
        {
            let mut done = lock_or_recover(&self.submissions);
            if let Some(limit) = lock_or_recover(&self.faults).fail_submission_after
                && *done >= limit
            {
                bail!("bulk endpoint unavailable");
            }
            *done += 1;
        }

        let mut items = Vec::with_capacity(bulk.len());
        for item in &bulk.items {
            self.record(BackendCall::Write {
                index: item.index.clone(),
                id: item.id.clone(),
                op: item.op.name(),
            });
            let result = self.item_result(&item.id);
            if (200..300).contains(&result.status) && result.error_type.is_none() {
                let mut indexes = lock_or_recover(&self.indexes);
                let state = indexes.entry(item.index.clone()).or_default();
                let doc = match &item.op {
                    WriteOp::Add(doc) | WriteOp::Update(doc) => Some(doc.clone()),
                    WriteOp::Delete => None,
                };
                state.pending.insert(item.id.clone(), doc);
                if item.refresh == RefreshStrategy::Force {
                    state.refresh();
                }
            }
            items.push(result);
        }
        Ok(BulkResponse { items })
    }

    fn execute(&self, work: &IndexScaleWork) -> Result<()> {
        self.record(BackendCall::Scale {
            op: work.op,
            index: work.index.clone(),
        });
        if lock_or_recover(&self.faults)
            .scale_ops
            .contains(&(work.op, work.index.clone()))
        {
            bail!("{} rejected by backend for index '{}'", work.op, work.index);
        }
        let mut indexes = lock_or_recover(&self.indexes);
        let state = indexes.entry(work.index.clone()).or_default();
        match work.op {
            IndexScaleOp::Purge => {
                state.pending.clear();
                state.visible.clear();
            }
            IndexScaleOp::Refresh => state.refresh(),
            IndexScaleOp::MergeSegments | IndexScaleOp::Flush => {}
        }
        Ok(())
    }

    fn reset_schema(&self, index: &str) -> Result<()> {
        self.record(BackendCall::ResetSchema(index.to_string()));
        lock_or_recover(&self.indexes).insert(index.to_string(), IndexState::default());
        Ok(())
    }
}
