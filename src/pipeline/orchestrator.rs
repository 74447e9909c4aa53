use log::{debug, info};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::IndexBackend;
use crate::engine::assessor::ResultAssessor;
use crate::engine::sequencer::{GroupSequencer, IndexScalePlan, reset_schemas};
use crate::engine::work::{OrchestratorContext, WorkOrchestrator};
use crate::error::MassIndexingError;
use crate::pipeline;
use crate::types::IdentifierBatch;
use crate::utils::config::MassIndexingConfig;

use super::context::{GroupContext, PipelineHandles};
use super::queue::handoff_queue;

/// Start the loading pipeline of one type group: identifier loader → handoff queue → entity
/// loaders → `orchestrator`. Caller joins the returned handles.
pub fn run_pipeline(
    ctx: &GroupContext,
    orchestrator: &Arc<WorkOrchestrator>,
    cfg: &MassIndexingConfig,
) -> Result<PipelineHandles, MassIndexingError> {
    let (producer, consumer) = handoff_queue::<IdentifierBatch>(cfg.effective_queue_capacity(), &ctx.cancel);

    let loader_handles =
        pipeline::spawn_entity_loaders(ctx, consumer, orchestrator, cfg.loader_threads())?;
    let identifier_handle = match pipeline::spawn_identifier_loader(
        ctx.clone(),
        producer,
        cfg.fetch_size(),
        cfg.batch_size(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            // Entity loaders are already waiting on the queue.
            ctx.cancel.cancel();
            for h in loader_handles {
                let _ = h.join();
            }
            return Err(e);
        }
    };
    Ok(PipelineHandles {
        identifier_handle,
        loader_handles,
    })
}

/// Join every loader thread. Returns all errors they reported, identifier loader first.
pub fn shutdown_pipeline_handles(handles: PipelineHandles) -> Vec<MassIndexingError> {
    let PipelineHandles {
        identifier_handle,
        loader_handles,
    } = handles;
    let mut errors = Vec::new();
    match identifier_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => errors.push(e),
        Err(_) => errors.push(MassIndexingError::WorkerPanicked("identifier loader".to_string())),
    }
    for h in loader_handles {
        match h.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(e),
            Err(_) => errors.push(MassIndexingError::WorkerPanicked("entity loader".to_string())),
        }
    }
    errors
}

/// The error that explains a stopped group. Loader threads report `Cancelled` whenever the group
/// token was cancelled under them, so a real failure (from any thread or the orchestrator) wins.
fn root_cause(mut errors: Vec<MassIndexingError>, fatal: Option<MassIndexingError>) -> Option<MassIndexingError> {
    if let Some(pos) = errors.iter().position(|e| !e.is_cancelled()) {
        return Some(errors.swap_remove(pos));
    }
    fatal.or_else(|| errors.into_iter().next())
}

/// Run one type group end to end: schema reset, "before" index operations, the loading pipeline,
/// the bulk-work barrier, then "after" index operations.
pub fn run_type_group(
    ctx: GroupContext,
    backend: Arc<dyn IndexBackend>,
    cfg: &MassIndexingConfig,
) -> Result<(), MassIndexingError> {
    let group = Arc::clone(&ctx.group);
    let started = Instant::now();
    info!("Mass indexing '{}' into {}", group.name, group.indexes.join(", "));

    if cfg.drop_and_create_schema_on_start {
        reset_schemas(backend.as_ref(), &group.indexes)?;
    }
    ctx.cancel.check("preparing indexes")?;
    let mut sequencer = GroupSequencer::new(
        &backend,
        &group.indexes,
        cfg.tenant.clone(),
        IndexScalePlan::from_config(cfg),
    );
    sequencer.before_bulk()?;

    let orchestrator = Arc::new(
        WorkOrchestrator::start(
            OrchestratorContext {
                group: group.name.clone(),
                backend: Arc::clone(&backend),
                assessor: ResultAssessor::from_config(cfg),
                failures: Arc::clone(&ctx.failures),
                progress: Arc::clone(&ctx.progress),
                max_bulk_items: cfg.max_bulk_items.max(1),
                max_timeout_retries: cfg.max_timeout_retries,
                cancel: ctx.cancel.clone(),
            },
            cfg.orchestrator_queue_capacity,
        )
        .map_err(|e| MassIndexingError::spawn("bulk submission", e))?,
    );

    let loaded = match run_pipeline(&ctx, &orchestrator, cfg) {
        Ok(handles) => shutdown_pipeline_handles(handles),
        Err(e) => vec![e],
    };
    let drained = if loaded.is_empty() {
        orchestrator.await_completion().err()
    } else {
        None
    };
    let fatal = orchestrator.fatal_error();
    let stopped = match Arc::try_unwrap(orchestrator) {
        Ok(orchestrator) => orchestrator.shutdown(),
        Err(_) => Err(MassIndexingError::WorkerPanicked("bulk submission".to_string())),
    };

    let mut errors = loaded;
    errors.extend(drained);
    if let Some(e) = root_cause(errors, fatal) {
        return Err(e);
    }
    stopped?;

    ctx.cancel.check("finishing indexes")?;
    sequencer.after_bulk()?;
    debug!(
        "type group '{}' done in {:.2}s",
        group.name,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
