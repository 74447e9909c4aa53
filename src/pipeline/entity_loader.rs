//! Entity loader pool: threads that take identifier batches off the queue, load the records, build
//! documents and hand the resulting bulk submissions to the work orchestrator.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::engine::work::WorkOrchestrator;
use crate::error::MassIndexingError;
use crate::types::IdentifierBatch;

use super::context::{GroupContext, LoaderStage, with_after_hook};
use super::document::build_batch;
use super::error_handler::{EntityFailure, loading_operation};
use super::queue::QueueConsumer;

const STAGE: &str = "loading entities";

/// Spawn `num_threads` loaders sharing `consumer`. Each exits once the queue is completed and
/// drained, or as soon as the group token is cancelled.
pub fn spawn_entity_loaders(
    ctx: &GroupContext,
    consumer: QueueConsumer<IdentifierBatch>,
    orchestrator: &Arc<WorkOrchestrator>,
    num_threads: usize,
) -> Result<Vec<JoinHandle<Result<(), MassIndexingError>>>, MassIndexingError> {
    (0..num_threads.max(1))
        .map(|i| {
            let ctx = ctx.clone();
            let consumer = consumer.clone();
            let orchestrator = Arc::clone(orchestrator);
            thread::Builder::new()
                .name(format!("massindex-load-{}-{}", ctx.group.name, i))
                .spawn(move || run_entity_loader(&ctx, consumer, &orchestrator))
                .map_err(|e| MassIndexingError::spawn("entity loader", e))
        })
        .collect()
}

pub fn run_entity_loader(
    ctx: &GroupContext,
    consumer: QueueConsumer<IdentifierBatch>,
    orchestrator: &WorkOrchestrator,
) -> Result<(), MassIndexingError> {
    let result = ctx
        .run_before_hook(LoaderStage::Entities)
        .and_then(|()| load_entities(ctx, &consumer, orchestrator));
    // Unblock the identifier loader if this thread stops early.
    drop(consumer);
    let result = with_after_hook(result, ctx.run_after_hook(LoaderStage::Entities));
    ctx.abort_on_error(result)
}

fn load_entities(
    ctx: &GroupContext,
    consumer: &QueueConsumer<IdentifierBatch>,
    orchestrator: &WorkOrchestrator,
) -> Result<(), MassIndexingError> {
    let entity_type = ctx.group.primary_type();
    loop {
        let ids = match consumer.take() {
            Ok(Some(ids)) => ids,
            Ok(None) => return Ok(()),
            Err(_) => return Err(MassIndexingError::cancelled(STAGE)),
        };
        let records = match ctx.source.load_records(&ctx.group, &ids) {
            Ok(records) => records,
            Err(e) => {
                ctx.failures.entity_failure(EntityFailure::new(
                    entity_type,
                    ids,
                    loading_operation(entity_type),
                    &e,
                ));
                continue;
            }
        };
        ctx.progress.entities_loaded(records.len() as u64);

        let built = build_batch(ctx.builder.as_ref(), &ctx.group, &records, &ctx.failures);
        ctx.progress.documents_built(built.built);
        orchestrator.submit(built.submission)?;
    }
}
