//! Identifier loader: one thread per type group, reading identifier batches from the record source
//! and putting them on the handoff queue.

use std::thread::{self, JoinHandle};

use crate::error::MassIndexingError;
use crate::source::IdentifierCursor;
use crate::types::IdentifierBatch;

use super::context::{GroupContext, LoaderStage, with_after_hook};
use super::queue::{QueueError, QueueProducer};

const STAGE: &str = "loading identifiers";

pub fn spawn_identifier_loader(
    ctx: GroupContext,
    producer: QueueProducer<IdentifierBatch>,
    fetch_size: usize,
    batch_size: usize,
) -> Result<JoinHandle<Result<(), MassIndexingError>>, MassIndexingError> {
    thread::Builder::new()
        .name(format!("massindex-ids-{}", ctx.group.name))
        .spawn(move || run_identifier_loader(&ctx, producer, fetch_size, batch_size))
        .map_err(|e| MassIndexingError::spawn("identifier loader", e))
}

/// Run hooks around the load. The producer is completed on every path, so entity loaders always
/// see the end of the stream (or the cancellation) and exit.
pub fn run_identifier_loader(
    ctx: &GroupContext,
    producer: QueueProducer<IdentifierBatch>,
    fetch_size: usize,
    batch_size: usize,
) -> Result<(), MassIndexingError> {
    let result = ctx
        .run_before_hook(LoaderStage::Identifiers)
        .and_then(|()| load_identifiers(ctx, &producer, fetch_size, batch_size));
    producer.complete();
    let result = with_after_hook(result, ctx.run_after_hook(LoaderStage::Identifiers));
    ctx.abort_on_error(result)
}

fn identifier_error(ctx: &GroupContext, e: anyhow::Error) -> MassIndexingError {
    MassIndexingError::IdentifierLoading {
        group: ctx.group.name.clone(),
        source: e.into(),
    }
}

fn load_identifiers(
    ctx: &GroupContext,
    producer: &QueueProducer<IdentifierBatch>,
    fetch_size: usize,
    batch_size: usize,
) -> Result<(), MassIndexingError> {
    ctx.cancel.check(STAGE)?;
    let total = ctx
        .source
        .total_count(&ctx.group)
        .map_err(|e| identifier_error(ctx, e))?;
    ctx.progress.add_to_total_count(total);

    let mut cursor = ctx
        .source
        .open_identifiers(&ctx.group, fetch_size)
        .map_err(|e| identifier_error(ctx, e))?;
    let result = drain_cursor(ctx, cursor.as_mut(), producer, batch_size);
    match cursor.close() {
        Ok(()) => result,
        Err(e) if result.is_ok() => Err(identifier_error(ctx, e)),
        Err(e) => {
            log::warn!("closing identifier cursor of '{}' failed: {:#}", ctx.group.name, e);
            result
        }
    }
}

fn drain_cursor(
    ctx: &GroupContext,
    cursor: &mut dyn IdentifierCursor,
    producer: &QueueProducer<IdentifierBatch>,
    batch_size: usize,
) -> Result<(), MassIndexingError> {
    let batch_size = batch_size.max(1);
    let mut produced = 0_u64;
    loop {
        ctx.cancel.check(STAGE)?;
        let Some(ids) = cursor.next_batch().map_err(|e| identifier_error(ctx, e))? else {
            break;
        };
        for chunk in ids.chunks(batch_size) {
            producer.put(chunk.to_vec()).map_err(|e| match e {
                QueueError::Cancelled | QueueError::Disconnected => MassIndexingError::cancelled(STAGE),
            })?;
            produced += chunk.len() as u64;
        }
    }
    log::debug!("identifier loader for '{}' produced {} ids", ctx.group.name, produced);
    Ok(())
}
