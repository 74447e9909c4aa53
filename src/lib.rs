//! massindex: rebuild search indexes from a backing record store.
//!
//! Identifiers are streamed from a [`RecordSource`], records loaded by a pool of threads, turned
//! into documents by a [`DocumentBuilder`] and written in bulk to an [`IndexBackend`], with purge,
//! merge, flush and refresh around the load.

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use backend::{InMemoryBackend, IndexBackend, SegmentDirBackend};
pub use engine::{CancelToken, CoordinatorState, MassIndexer, MassIndexingHandle, MassIndexingMonitor};
pub use error::{MassIndexingError, MassIndexingFailure};
pub use pipeline::{DocumentBuilder, EntityFailure, FailureHandler, HookContext, LoadingHook, RunFailureContext};
pub use source::{IdentifierCursor, RecordSource};
pub use utils::config::MassIndexingConfig;

use log::debug;
use std::sync::Arc;

/// Index every group of `source` into `backend` with default configuration, blocking until done.
///
/// Same as building a [`MassIndexer`] with [`MassIndexingConfig::default`] and calling
/// [`MassIndexer::start_and_wait`]:
///
/// ```ignore
/// let source = Arc::new(massindex::source::JsonLinesSource::open_dir(dir)?);
/// let groups = source.type_groups();
/// let summary = massindex::mass_index(
///     source,
///     Arc::new(massindex::source::JsonDocumentBuilder::default()),
///     Arc::new(massindex::InMemoryBackend::new()),
///     groups,
/// )?;
/// ```
pub fn mass_index(
    source: Arc<dyn RecordSource>,
    builder: Arc<dyn DocumentBuilder>,
    backend: Arc<dyn IndexBackend>,
    groups: Vec<TypeGroup>,
) -> Result<RunSummary, MassIndexingFailure> {
    let config = MassIndexingConfig::default();
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        config
    );
    MassIndexer::new(source, builder, backend, groups, config).start_and_wait()
}
