//! Loading pipeline of one type group: identifier loader → handoff queue → entity loaders →
//! document building → work orchestrator, plus failure routing.

pub mod context;
pub mod document;
pub mod entity_loader;
pub mod error_handler;
pub mod identifier_loader;
pub mod orchestrator;
pub mod queue;

pub use context::{GroupContext, HookContext, LoaderStage, LoadingHook, NoopHook, PipelineHandles};
pub use document::{BuiltBatch, DocumentBuilder, build_batch};
pub use entity_loader::spawn_entity_loaders;
pub use error_handler::{
    EntityFailure, FailureCoordinator, FailureHandler, LogFailureHandler, RunFailureContext,
};
pub use identifier_loader::spawn_identifier_loader;
pub use orchestrator::{run_pipeline, run_type_group, shutdown_pipeline_handles};
pub use queue::{QueueConsumer, QueueError, QueueProducer, handoff_queue};
