//! Per-type-group pipeline context: collaborators and shared state handed to every loader thread,
//! plus the loading hooks run on those threads.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::engine::cancel::CancelToken;
use crate::engine::progress::ProgressTracker;
use crate::error::MassIndexingError;
use crate::source::RecordSource;
use crate::types::TypeGroup;

use super::document::DocumentBuilder;
use super::error_handler::FailureCoordinator;

/// Which loader thread a hook runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderStage {
    Identifiers,
    Entities,
}

impl fmt::Display for LoaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderStage::Identifiers => f.write_str("identifier loader"),
            LoaderStage::Entities => f.write_str("entity loader"),
        }
    }
}

pub struct HookContext<'a> {
    pub group: &'a TypeGroup,
    pub stage: LoaderStage,
    pub tenant: Option<&'a str>,
}

/// Runs on the loader's own thread, once before it starts and once after it stops. Useful for
/// thread-bound resources such as a per-thread session on the record source.
pub trait LoadingHook: Send + Sync {
    fn before(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    fn after(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopHook;

impl LoadingHook for NoopHook {}

/// Shared by every thread of one type group.
#[derive(Clone)]
pub struct GroupContext {
    pub group: Arc<TypeGroup>,
    pub source: Arc<dyn RecordSource>,
    pub builder: Arc<dyn DocumentBuilder>,
    pub hook: Arc<dyn LoadingHook>,
    pub failures: Arc<FailureCoordinator>,
    pub progress: Arc<ProgressTracker>,
    /// Group token: child of the run token.
    pub cancel: CancelToken,
    pub tenant: Option<String>,
}

impl GroupContext {
    pub fn hook_context(&self, stage: LoaderStage) -> HookContext<'_> {
        HookContext {
            group: &self.group,
            stage,
            tenant: self.tenant.as_deref(),
        }
    }

    pub fn run_before_hook(&self, stage: LoaderStage) -> Result<(), MassIndexingError> {
        self.hook
            .before(&self.hook_context(stage))
            .map_err(|e| self.hook_error(stage, "before", e))
    }

    pub fn run_after_hook(&self, stage: LoaderStage) -> Result<(), MassIndexingError> {
        self.hook
            .after(&self.hook_context(stage))
            .map_err(|e| self.hook_error(stage, "after", e))
    }

    fn hook_error(&self, stage: LoaderStage, phase: &str, e: anyhow::Error) -> MassIndexingError {
        MassIndexingError::Hook {
            group: self.group.name.clone(),
            stage: format!("{stage} ({phase})"),
            source: e.into(),
        }
    }

    /// A loader thread hit a fatal error: stop the rest of the group. Cancellation errors are
    /// already the consequence of a cancelled token and pass through untouched.
    pub fn abort_on_error<T>(&self, result: Result<T, MassIndexingError>) -> Result<T, MassIndexingError> {
        if let Err(e) = &result
            && !e.is_cancelled()
        {
            log::debug!("aborting type group '{}': {}", self.group.name, e);
            self.cancel.cancel();
        }
        result
    }
}

/// Loader threads of a running type group.
pub struct PipelineHandles {
    pub identifier_handle: JoinHandle<Result<(), MassIndexingError>>,
    pub loader_handles: Vec<JoinHandle<Result<(), MassIndexingError>>>,
}

/// Keep the main error; an `after` hook error only surfaces when the work itself succeeded.
pub(crate) fn with_after_hook(
    result: Result<(), MassIndexingError>,
    after: Result<(), MassIndexingError>,
) -> Result<(), MassIndexingError> {
    match (result, after) {
        (Err(e), Err(hook)) => {
            log::warn!("{hook}");
            Err(e)
        }
        (result, after) => result.and(after),
    }
}
