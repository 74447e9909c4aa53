//! Failure coordination: entity-level failures are counted and forwarded (up to a flooding
//! threshold) to a pluggable [`FailureHandler`]; run-level failures are always forwarded and
//! returned to the caller with the most recent entity-level failure attached.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{MassIndexingError, MassIndexingFailure};
use crate::types::RecordId;
use crate::utils::config::DEFAULT_FAILURE_FLOODING_THRESHOLD;
use crate::utils::lock_or_recover;

/// A record (or a whole batch of records) that could not be loaded, built or written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityFailure {
    pub entity_type: String,
    /// Offending records. Several when a whole batch failed to load.
    pub entity_refs: Vec<RecordId>,
    pub operation: String,
    pub message: String,
}

impl EntityFailure {
    pub fn new(entity_type: &str, entity_refs: Vec<RecordId>, operation: String, err: &anyhow::Error) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_refs,
            operation,
            message: format!("{:#}", err),
        }
    }

    /// `Book#2`, or `Book#[1, 2, 3]` for a batch.
    pub fn entity_description(&self) -> String {
        match self.entity_refs.as_slice() {
            [single] => format!("{}#{}", self.entity_type, single),
            refs => {
                let ids: Vec<&str> = refs.iter().map(|r| r.0.as_str()).collect();
                format!("{}#[{}]", self.entity_type, ids.join(", "))
            }
        }
    }
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {}: {}",
            self.operation,
            self.entity_description(),
            self.message
        )
    }
}

pub fn loading_operation(entity_type: &str) -> String {
    format!("Loading instance of type '{entity_type}' during mass indexing")
}

pub fn building_operation(entity_type: &str) -> String {
    format!("Building document for instance of type '{entity_type}' during mass indexing")
}

pub fn indexing_operation(entity_type: &str) -> String {
    format!("Indexing instance of type '{entity_type}' during mass indexing")
}

/// A run-level failure as shown to the handler.
pub struct RunFailureContext<'a> {
    pub error: &'a MassIndexingError,
    pub group: Option<&'a str>,
}

pub trait FailureHandler: Send + Sync {
    fn handle_entity(&self, failure: &EntityFailure);

    fn handle_run(&self, ctx: &RunFailureContext<'_>);

    /// Asked once per run. Entity-level failures past this count are only counted.
    fn failure_flooding_threshold(&self) -> u64 {
        u64::MAX
    }
}

/// Used when no handler is configured: log everything, summarize entity failures at run end.
#[derive(Debug, Default)]
pub struct LogFailureHandler;

impl FailureHandler for LogFailureHandler {
    fn handle_entity(&self, failure: &EntityFailure) {
        log::error!("{}", failure);
    }

    fn handle_run(&self, ctx: &RunFailureContext<'_>) {
        match ctx.group {
            Some(group) => log::error!("type group '{}': {}", group, error_chain(ctx.error)),
            None => log::error!("{}", error_chain(ctx.error)),
        }
    }

    fn failure_flooding_threshold(&self) -> u64 {
        DEFAULT_FAILURE_FLOODING_THRESHOLD
    }
}

fn error_chain(err: &MassIndexingError) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

pub struct FailureCoordinator {
    handler: Arc<dyn FailureHandler>,
    summarize_at_end: bool,
    threshold: u64,
    count: AtomicU64,
    first: Mutex<Option<EntityFailure>>,
    last: Mutex<Option<EntityFailure>>,
}

impl FailureCoordinator {
    /// `handler: None` installs [`LogFailureHandler`] and the end-of-run summary.
    /// `threshold` overrides the handler's own flooding threshold.
    pub fn new(handler: Option<Arc<dyn FailureHandler>>, threshold: Option<u64>) -> Self {
        let summarize_at_end = handler.is_none();
        let handler = handler.unwrap_or_else(|| Arc::new(LogFailureHandler));
        let threshold = threshold.unwrap_or_else(|| handler.failure_flooding_threshold());
        Self {
            handler,
            summarize_at_end,
            threshold,
            count: AtomicU64::new(0),
            first: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn entity_failure(&self, failure: EntityFailure) {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut first = lock_or_recover(&self.first);
            if first.is_none() {
                *first = Some(failure.clone());
            }
        }
        if n <= self.threshold {
            self.handler.handle_entity(&failure);
        } else if n == self.threshold.saturating_add(1) {
            log::debug!(
                "reached the failure flooding threshold ({}); further entity failures are counted but not reported",
                self.threshold
            );
        }
        *lock_or_recover(&self.last) = Some(failure);
    }

    /// Forward a fatal error to the handler and wrap it for the caller.
    pub fn run_failure(&self, error: MassIndexingError, group: Option<&str>) -> MassIndexingFailure {
        self.handler.handle_run(&RunFailureContext {
            error: &error,
            group,
        });
        let mut failure = MassIndexingFailure::new(error, group);
        failure.suppressed = self.last_failure();
        failure
    }

    pub fn entity_failure_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn last_failure(&self) -> Option<EntityFailure> {
        lock_or_recover(&self.last).clone()
    }

    /// End-of-run check. Only the default handler turns entity failures into a run failure.
    pub fn finish(&self) -> Result<(), MassIndexingFailure> {
        let count = self.entity_failure_count();
        if !self.summarize_at_end || count == 0 {
            return Ok(());
        }
        let first = lock_or_recover(&self.first).clone();
        let (first_entity, first_message) = first
            .map(|f| (f.entity_description(), f.message))
            .unwrap_or_default();
        Err(MassIndexingError::EntityFailures {
            count,
            first_entity,
            first_message,
        }
        .into())
    }
}
