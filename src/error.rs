//! Run-level error taxonomy.
//!
//! Entity-level failures (one record could not be loaded or built) never show up here directly:
//! they go through the failure coordinator. What ends up in a [`MassIndexingFailure`] is the one
//! fatal error of a run, with the most recent entity-level failure attached as suppressed context.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::pipeline::error_handler::EntityFailure;
use crate::types::IndexScaleOp;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An `anyhow::Error` kept behind an `Arc` so it can be reported more than once without losing
/// its source chain.
#[derive(Debug, Clone)]
pub struct SharedError(pub Arc<anyhow::Error>);

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.chain().nth(1)
    }
}

#[derive(Debug, Error)]
pub enum MassIndexingError {
    /// The run (or the thread observing it) was cancelled. Never used for any other failure.
    #[error("mass indexing interrupted while {stage}; index left in an unknown state")]
    Cancelled { stage: String },

    #[error("failed to load identifiers for type group '{group}'")]
    IdentifierLoading {
        group: String,
        #[source]
        source: BoxError,
    },

    #[error("index operation {op} failed on index '{index}'")]
    Operation {
        op: IndexScaleOp,
        index: String,
        #[source]
        source: BoxError,
    },

    #[error("schema reset failed on index '{index}'")]
    SchemaReset {
        index: String,
        #[source]
        source: BoxError,
    },

    #[error("loading hook failed on {stage} thread for type group '{group}'")]
    Hook {
        group: String,
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("bulk submission failed for type group '{group}'")]
    Bulk {
        group: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "{count} entities could not be indexed; first failure on entity {first_entity}: {first_message}"
    )]
    EntityFailures {
        count: u64,
        first_entity: String,
        first_message: String,
    },

    #[error("{0} thread panicked")]
    WorkerPanicked(String),

    #[error("failed to spawn {thread} thread")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },
}

impl MassIndexingError {
    pub fn cancelled(stage: &str) -> Self {
        MassIndexingError::Cancelled {
            stage: stage.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MassIndexingError::Cancelled { .. })
    }

    pub fn spawn(thread: &str, source: std::io::Error) -> Self {
        MassIndexingError::Spawn {
            thread: thread.to_string(),
            source,
        }
    }
}

/// The single error a run surfaces to its caller.
#[derive(Debug)]
pub struct MassIndexingFailure {
    pub error: MassIndexingError,
    /// Type group the failure belongs to, when it is group-scoped.
    pub group: Option<String>,
    /// Most recent entity-level failure of the run, if any.
    pub suppressed: Option<EntityFailure>,
}

impl MassIndexingFailure {
    pub fn new(error: MassIndexingError, group: Option<&str>) -> Self {
        Self {
            error,
            group: group.map(str::to_string),
            suppressed: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl fmt::Display for MassIndexingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for MassIndexingFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

impl From<MassIndexingError> for MassIndexingFailure {
    fn from(error: MassIndexingError) -> Self {
        Self::new(error, None)
    }
}
