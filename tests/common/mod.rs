#![allow(dead_code)]

use anyhow::{Result, bail};
use massindex::backend::{BackendCall, InMemoryBackend};
use massindex::pipeline::LoaderStage;
use massindex::source::VecIdentifierCursor;
use massindex::{
    Document, DocumentBuilder, EntityFailure, FailureHandler, HookContext, IdentifierBatch,
    IdentifierCursor, IndexScaleOp, LoadingHook, MassIndexingConfig, Record, RecordId,
    RecordSource, RunFailureContext, TypeGroup,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<RecordId> {
    range.map(RecordId::from).collect()
}

pub fn books() -> TypeGroup {
    TypeGroup::single("Book").with_indexes(&["books"])
}

pub fn config(threads: usize, batch_size: usize) -> MassIndexingConfig {
    MassIndexingConfig {
        threads_to_load_objects: threads,
        batch_size_to_load_objects: batch_size,
        ..Default::default()
    }
}

/// In-memory source with scripted failures.
#[derive(Default)]
pub struct ScriptedSource {
    groups: HashMap<String, Vec<RecordId>>,
    /// Loading any batch containing one of these ids fails.
    fail_load: HashSet<RecordId>,
    /// Groups whose cursor fails after handing out this many batches.
    fail_cursor_after: HashMap<String, usize>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, name: &str, ids: Vec<RecordId>) -> Self {
        self.groups.insert(name.to_string(), ids);
        self
    }

    pub fn fail_loading(mut self, id: u64) -> Self {
        self.fail_load.insert(RecordId::from(id));
        self
    }

    pub fn fail_cursor_after(mut self, group: &str, batches: usize) -> Self {
        self.fail_cursor_after.insert(group.to_string(), batches);
        self
    }
}

struct TrackedCursor {
    inner: VecIdentifierCursor,
    served: usize,
    fail_after: Option<usize>,
    closed: Arc<AtomicUsize>,
}

impl IdentifierCursor for TrackedCursor {
    fn next_batch(&mut self) -> Result<Option<IdentifierBatch>> {
        if self.fail_after.is_some_and(|n| self.served >= n) {
            bail!("identifier cursor broke");
        }
        self.served += 1;
        self.inner.next_batch()
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RecordSource for ScriptedSource {
    fn total_count(&self, group: &TypeGroup) -> Result<u64> {
        Ok(self.groups.get(&group.name).map_or(0, |ids| ids.len() as u64))
    }

    fn open_identifiers(&self, group: &TypeGroup, batch_size: usize) -> Result<Box<dyn IdentifierCursor>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let ids = self.groups.get(&group.name).cloned().unwrap_or_default();
        Ok(Box::new(TrackedCursor {
            inner: VecIdentifierCursor::new(ids, batch_size),
            served: 0,
            fail_after: self.fail_cursor_after.get(&group.name).copied(),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn load_records(&self, group: &TypeGroup, ids: &[RecordId]) -> Result<Vec<Record>> {
        if let Some(bad) = ids.iter().find(|id| self.fail_load.contains(*id)) {
            bail!("database refused batch containing {}", bad);
        }
        Ok(ids
            .iter()
            .map(|id| Record {
                id: id.clone(),
                entity_type: group.primary_type().to_string(),
                body: serde_json::json!({ "id": id.0, "title": format!("title {}", id.0) }),
            })
            .collect())
    }
}

/// Copies the record body; fails for the listed ids.
#[derive(Default)]
pub struct ScriptedBuilder {
    fail_on: HashSet<RecordId>,
}

impl ScriptedBuilder {
    pub fn failing_on(ids: &[u64]) -> Self {
        Self {
            fail_on: ids.iter().copied().map(RecordId::from).collect(),
        }
    }
}

impl DocumentBuilder for ScriptedBuilder {
    fn build(&self, _group: &TypeGroup, record: &Record) -> Result<Document> {
        if self.fail_on.contains(&record.id) {
            bail!("cannot map field 'title' of {}", record.id);
        }
        let mut doc = Document::new();
        doc.insert("title".to_string(), record.body["title"].clone());
        Ok(doc)
    }
}

/// Failure handler that remembers everything it is told.
pub struct RecordingHandler {
    pub threshold: u64,
    pub entities: Mutex<Vec<EntityFailure>>,
    pub runs: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            entities: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }
}

impl FailureHandler for RecordingHandler {
    fn handle_entity(&self, failure: &EntityFailure) {
        self.entities.lock().unwrap().push(failure.clone());
    }

    fn handle_run(&self, ctx: &RunFailureContext<'_>) {
        self.runs.lock().unwrap().push(ctx.error.to_string());
    }

    fn failure_flooding_threshold(&self) -> u64 {
        self.threshold
    }
}

#[derive(Default)]
pub struct CountingHook {
    pub before: AtomicUsize,
    pub after: AtomicUsize,
    pub threads: Mutex<HashSet<String>>,
}

impl LoadingHook for CountingHook {
    fn before(&self, _ctx: &HookContext<'_>) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = std::thread::current().name() {
            self.threads.lock().unwrap().insert(name.to_string());
        }
        Ok(())
    }

    fn after(&self, _ctx: &HookContext<'_>) -> Result<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hook that fails in the given phase on the given loader thread.
#[derive(Default)]
pub struct FailingHook {
    pub before_on: Option<LoaderStage>,
    pub after_on: Option<LoaderStage>,
}

impl LoadingHook for FailingHook {
    fn before(&self, ctx: &HookContext<'_>) -> Result<()> {
        if self.before_on == Some(ctx.stage) {
            bail!("session for {} could not be opened", ctx.group.name);
        }
        Ok(())
    }

    fn after(&self, ctx: &HookContext<'_>) -> Result<()> {
        if self.after_on == Some(ctx.stage) {
            bail!("session for {} could not be released", ctx.group.name);
        }
        Ok(())
    }
}

/// Ids written to `index`, in backend order.
pub fn written_ids(backend: &InMemoryBackend, index: &str) -> Vec<RecordId> {
    backend
        .journal()
        .into_iter()
        .filter_map(|call| match call {
            BackendCall::Write { index: i, id, .. } if i == index => Some(id),
            _ => None,
        })
        .collect()
}

/// Position of the first scale op `op` on `index` in the journal.
pub fn scale_position(journal: &[BackendCall], op: IndexScaleOp, index: &str) -> Option<usize> {
    journal.iter().position(|call| {
        matches!(call, BackendCall::Scale { op: o, index: i } if *o == op && i == index)
    })
}

pub fn write_positions(journal: &[BackendCall], index: &str) -> Vec<usize> {
    journal
        .iter()
        .enumerate()
        .filter_map(|(pos, call)| match call {
            BackendCall::Write { index: i, .. } if i == index => Some(pos),
            _ => None,
        })
        .collect()
}
