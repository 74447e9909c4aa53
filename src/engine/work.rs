//! Work orchestrator: one backend-submission thread per type group.
//!
//! Entity loaders hand over bulk submissions without waiting for the backend (streamed mode).
//! The submission thread processes its inbox in order, coalescing queued submissions up to
//! `max_bulk_items` per backend call. [`WorkOrchestrator::await_completion`] is the barrier: it
//! queues a marker behind everything already submitted and waits for the thread to reach it.

use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::backend::IndexBackend;
use crate::error::{MassIndexingError, SharedError};
use crate::pipeline::error_handler::{EntityFailure, FailureCoordinator, indexing_operation};
use crate::types::{BulkSubmission, WorkItem};
use crate::utils::lock_or_recover;

use super::assessor::{ItemOutcome, ResultAssessor};
use super::cancel::CancelToken;
use super::progress::ProgressTracker;

enum Command {
    Submit(BulkSubmission),
    Barrier(Sender<()>),
}

/// Everything the submission thread needs.
pub struct OrchestratorContext {
    pub group: String,
    pub backend: Arc<dyn IndexBackend>,
    pub assessor: ResultAssessor,
    pub failures: Arc<FailureCoordinator>,
    pub progress: Arc<ProgressTracker>,
    pub max_bulk_items: usize,
    pub max_timeout_retries: u32,
    /// Type-group token: cancelled by the run, or by this orchestrator on a fatal submission error.
    pub cancel: CancelToken,
}

pub struct WorkOrchestrator {
    inbox: Sender<Command>,
    fatal: Arc<Mutex<Option<SharedError>>>,
    group: String,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl WorkOrchestrator {
    pub fn start(ctx: OrchestratorContext, inbox_capacity: usize) -> std::io::Result<Self> {
        let (inbox, inbox_rx) = bounded::<Command>(inbox_capacity.max(1));
        let fatal: Arc<Mutex<Option<SharedError>>> = Arc::new(Mutex::new(None));
        let group = ctx.group.clone();
        let cancel = ctx.cancel.clone();
        let fatal_w = Arc::clone(&fatal);
        let handle = thread::Builder::new()
            .name(format!("massindex-bulk-{}", ctx.group))
            .spawn(move || submission_loop(ctx, inbox_rx, fatal_w))?;
        Ok(Self {
            inbox,
            fatal,
            group,
            cancel,
            handle,
        })
    }

    /// Queue a submission. Blocks only while the inbox is full.
    pub fn submit(&self, bulk: BulkSubmission) -> Result<(), MassIndexingError> {
        if bulk.is_empty() {
            return Ok(());
        }
        self.cancel.check("submitting bulk work")?;
        select! {
            send(self.inbox, Command::Submit(bulk)) -> res => res.map_err(|_| self.stopped_error()),
            recv(self.cancel.receiver()) -> _ => Err(self.stopped_error()),
        }
    }

    /// Block until everything submitted before this call has been processed.
    pub fn await_completion(&self) -> Result<(), MassIndexingError> {
        if self.cancel.is_cancelled() {
            return Err(self.stopped_error());
        }
        let (reply_tx, reply_rx) = bounded::<()>(1);
        let sent = select! {
            send(self.inbox, Command::Barrier(reply_tx)) -> res => res.is_ok(),
            recv(self.cancel.receiver()) -> _ => false,
        };
        if !sent {
            return Err(self.stopped_error());
        }
        let reached = select! {
            recv(reply_rx) -> res => res.is_ok(),
            recv(self.cancel.receiver()) -> _ => false,
        };
        if !reached || self.cancel.is_cancelled() {
            return Err(self.stopped_error());
        }
        Ok(())
    }

    /// First submission-wide failure, if any.
    pub fn fatal_error(&self) -> Option<MassIndexingError> {
        lock_or_recover(&self.fatal)
            .as_ref()
            .map(|e| MassIndexingError::Bulk {
                group: self.group.clone(),
                source: Box::new(e.clone()),
            })
    }

    fn stopped_error(&self) -> MassIndexingError {
        self.fatal_error()
            .unwrap_or_else(|| MassIndexingError::cancelled("waiting for bulk work"))
    }

    /// Close the inbox and join the submission thread. Work still queued is processed unless the
    /// group was cancelled.
    pub fn shutdown(self) -> Result<(), MassIndexingError> {
        let WorkOrchestrator { inbox, handle, .. } = self;
        drop(inbox);
        handle
            .join()
            .map_err(|_| MassIndexingError::WorkerPanicked("bulk submission".to_string()))
    }
}

fn submission_loop(ctx: OrchestratorContext, inbox: Receiver<Command>, fatal: Arc<Mutex<Option<SharedError>>>) {
    log::debug!("orchestrator for '{}' started", ctx.group);
    loop {
        let cmd = select! {
            recv(inbox) -> msg => match msg {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
            recv(ctx.cancel.receiver()) -> _ => break,
        };
        match cmd {
            Command::Barrier(reply) => {
                let _ = reply.send(());
            }
            Command::Submit(bulk) => {
                let mut items = bulk.items;
                let mut barrier = None;
                while items.len() < ctx.max_bulk_items {
                    match inbox.try_recv() {
                        Ok(Command::Submit(more)) => items.extend(more.items),
                        Ok(Command::Barrier(reply)) => {
                            barrier = Some(reply);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                let chunk = ctx.max_bulk_items.max(1);
                while !items.is_empty() {
                    let rest = items.split_off(chunk.min(items.len()));
                    execute_items(&ctx, items, &fatal);
                    items = rest;
                }
                if let Some(reply) = barrier {
                    let _ = reply.send(());
                }
            }
        }
    }
    log::debug!("orchestrator for '{}' stopped", ctx.group);
}

fn record_fatal(ctx: &OrchestratorContext, fatal: &Mutex<Option<SharedError>>, e: anyhow::Error) {
    log::debug!("fatal bulk failure for '{}': {:#}", ctx.group, e);
    lock_or_recover(fatal).get_or_insert_with(|| SharedError(Arc::new(e)));
    ctx.cancel.cancel();
}

/// Submit one backend call's worth of items, retrying timed-out items.
fn execute_items(ctx: &OrchestratorContext, items: Vec<WorkItem>, fatal: &Mutex<Option<SharedError>>) {
    if lock_or_recover(fatal).is_some() {
        return;
    }
    let mut bulk = BulkSubmission { items };
    let mut attempt = 0_u32;
    loop {
        let response = match ctx.backend.submit(&bulk) {
            Ok(r) => r,
            Err(e) => {
                record_fatal(ctx, fatal, e);
                return;
            }
        };
        if response.items.len() != bulk.items.len() {
            record_fatal(
                ctx,
                fatal,
                anyhow::anyhow!(
                    "backend returned {} results for {} items",
                    response.items.len(),
                    bulk.items.len()
                ),
            );
            return;
        }
        let mut added = 0_u64;
        let mut retry = Vec::new();
        for (item, result) in bulk.items.into_iter().zip(response.items.iter()) {
            match ctx.assessor.assess(result) {
                ItemOutcome::Success => added += 1,
                ItemOutcome::TimedOut if attempt < ctx.max_timeout_retries => retry.push(item),
                ItemOutcome::TimedOut => item_failure(
                    ctx,
                    &item,
                    format!("timed out after {} attempts", attempt + 1),
                ),
                ItemOutcome::Failure(msg) => item_failure(ctx, &item, msg),
            }
        }
        ctx.progress.documents_added(added);
        if retry.is_empty() {
            return;
        }
        attempt += 1;
        log::debug!(
            "retrying {} timed-out items for '{}' (attempt {})",
            retry.len(),
            ctx.group,
            attempt + 1
        );
        bulk = BulkSubmission { items: retry };
    }
}

fn item_failure(ctx: &OrchestratorContext, item: &WorkItem, msg: String) {
    ctx.failures.entity_failure(EntityFailure::new(
        &item.entity_type,
        vec![item.id.clone()],
        indexing_operation(&item.entity_type),
        &anyhow::anyhow!("index '{}': {}", item.index, msg),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::engine::progress::NoopMonitor;
    use crate::types::{Document, ItemResult, RecordId};

    fn context(backend: Arc<InMemoryBackend>, max_bulk_items: usize) -> (OrchestratorContext, Arc<ProgressTracker>, Arc<FailureCoordinator>) {
        let progress = Arc::new(ProgressTracker::new(Arc::new(NoopMonitor)));
        let failures = Arc::new(FailureCoordinator::new(None, None));
        let ctx = OrchestratorContext {
            group: "Book".to_string(),
            backend,
            assessor: ResultAssessor::default(),
            failures: Arc::clone(&failures),
            progress: Arc::clone(&progress),
            max_bulk_items,
            max_timeout_retries: 1,
            cancel: CancelToken::new(),
        };
        (ctx, progress, failures)
    }

    fn bulk(ids: &[&str]) -> BulkSubmission {
        BulkSubmission {
            items: ids
                .iter()
                .map(|id| WorkItem::add("books", "Book", RecordId::from(*id), Document::new()))
                .collect(),
        }
    }

    #[test]
    fn test_barrier_waits_for_all_previous_work() {
        let backend = Arc::new(InMemoryBackend::new());
        let (ctx, progress, _) = context(Arc::clone(&backend), 500);
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        orchestrator.submit(bulk(&["1", "2"])).unwrap();
        orchestrator.submit(bulk(&["3"])).unwrap();
        orchestrator.await_completion().unwrap();
        assert_eq!(progress.counters().added(), 3);
        assert_eq!(backend.pending_count("books"), 3);
        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn test_large_submission_is_split() {
        let backend = Arc::new(InMemoryBackend::new());
        let (ctx, _, _) = context(Arc::clone(&backend), 2);
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        orchestrator.submit(bulk(&["1", "2", "3", "4", "5"])).unwrap();
        orchestrator.await_completion().unwrap();
        assert_eq!(backend.submission_count(), 3);
        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn test_item_failures_do_not_fail_submission() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_item(RecordId::from("2"), ItemResult::error(400, "mapper_parsing_exception", "bad"));
        backend.time_out_item(RecordId::from("3"), 1);
        backend.time_out_item(RecordId::from("4"), 5);
        let (ctx, progress, failures) = context(Arc::clone(&backend), 500);
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        orchestrator.submit(bulk(&["1", "2", "3", "4"])).unwrap();
        orchestrator.await_completion().unwrap();
        // 1 ok, 3 ok on retry, 2 rejected, 4 still timing out after one retry
        assert_eq!(progress.counters().added(), 2);
        assert_eq!(failures.entity_failure_count(), 2);
        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn test_submission_error_is_fatal_for_group() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_submissions_after(0);
        let (ctx, _, _) = context(Arc::clone(&backend), 500);
        let cancel = ctx.cancel.clone();
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        orchestrator.submit(bulk(&["1"])).unwrap();
        let err = orchestrator.await_completion().unwrap_err();
        assert!(matches!(err, MassIndexingError::Bulk { .. }));
        assert!(cancel.is_cancelled());
        assert!(orchestrator.submit(bulk(&["2"])).is_err());
        orchestrator.shutdown().unwrap();
    }

    struct UnreachableBackend;

    impl IndexBackend for UnreachableBackend {
        fn submit(&self, _bulk: &BulkSubmission) -> anyhow::Result<crate::types::BulkResponse> {
            let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
            Err(anyhow::Error::new(reset).context("bulk request to 'books' failed"))
        }

        fn execute(&self, _work: &crate::types::IndexScaleWork) -> anyhow::Result<()> {
            Ok(())
        }

        fn reset_schema(&self, _index: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fatal_error_keeps_backend_source_chain() {
        let (mut ctx, _, _) = context(Arc::new(InMemoryBackend::new()), 500);
        ctx.backend = Arc::new(UnreachableBackend);
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        orchestrator.submit(bulk(&["1"])).unwrap();
        let err = orchestrator.await_completion().unwrap_err();

        let chain: Vec<String> = std::iter::successors(
            Some(&err as &(dyn std::error::Error + 'static)),
            |e| std::error::Error::source(*e),
        )
        .map(ToString::to_string)
        .collect();
        assert_eq!(
            chain,
            vec![
                "bulk submission failed for type group 'Book'",
                "bulk request to 'books' failed",
                "connection reset",
            ]
        );
        let root = chain_root(&err);
        assert_eq!(
            root.downcast_ref::<std::io::Error>().map(std::io::Error::kind),
            Some(std::io::ErrorKind::ConnectionReset)
        );
        orchestrator.shutdown().unwrap();
    }

    fn chain_root<'a>(err: &'a (dyn std::error::Error + 'static)) -> &'a (dyn std::error::Error + 'static) {
        let mut current = err;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    #[test]
    fn test_submission_thread_is_named_after_group() {
        let backend = Arc::new(InMemoryBackend::new());
        let (ctx, _, _) = context(backend, 500);
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        assert_eq!(orchestrator.handle.thread().name(), Some("massindex-bulk-Book"));
        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn test_cancel_surfaces_as_cancelled() {
        let backend = Arc::new(InMemoryBackend::new());
        let (ctx, _, _) = context(backend, 500);
        let cancel = ctx.cancel.clone();
        let orchestrator = WorkOrchestrator::start(ctx, 4).unwrap();
        cancel.cancel();
        let err = orchestrator.await_completion().unwrap_err();
        assert!(err.is_cancelled());
        orchestrator.shutdown().unwrap();
    }
}
