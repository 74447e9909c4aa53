//! Mass indexing coordinator: runs every type group (up to the configured parallelism), then turns
//! the outcome into a run summary or the run's single failure.

use crossbeam_channel::{Receiver, bounded};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::backend::IndexBackend;
use crate::error::{MassIndexingError, MassIndexingFailure};
use crate::pipeline::context::{GroupContext, LoadingHook, NoopHook};
use crate::pipeline::document::DocumentBuilder;
use crate::pipeline::error_handler::{FailureCoordinator, FailureHandler};
use crate::pipeline::run_type_group;
use crate::source::RecordSource;
use crate::types::{RunSummary, TypeGroup};
use crate::utils::config::MassIndexingConfig;
use crate::utils::lock_or_recover;

use super::cancel::CancelToken;
use super::progress::{LoggingMonitor, MassIndexingMonitor, ProgressTracker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    Configured,
    Running,
    Completed,
    Failed,
    Cancelled,
}

type GroupFailure = (MassIndexingError, Option<String>);

pub struct MassIndexer {
    source: Arc<dyn RecordSource>,
    builder: Arc<dyn DocumentBuilder>,
    backend: Arc<dyn IndexBackend>,
    groups: Vec<TypeGroup>,
    config: MassIndexingConfig,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    monitor: Arc<dyn MassIndexingMonitor>,
    hook: Arc<dyn LoadingHook>,
    cancel: CancelToken,
    state: Arc<Mutex<CoordinatorState>>,
}

impl MassIndexer {
    pub fn new(
        source: Arc<dyn RecordSource>,
        builder: Arc<dyn DocumentBuilder>,
        backend: Arc<dyn IndexBackend>,
        groups: Vec<TypeGroup>,
        config: MassIndexingConfig,
    ) -> Self {
        let monitor: Arc<dyn MassIndexingMonitor> = Arc::new(LoggingMonitor::new(config.log_every));
        Self {
            source,
            builder,
            backend,
            groups,
            config,
            failure_handler: None,
            monitor,
            hook: Arc::new(NoopHook),
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(CoordinatorState::Configured)),
        }
    }

    /// Replace the default log-and-summarize failure handling.
    pub fn failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn MassIndexingMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn loading_hook(mut self, hook: Arc<dyn LoadingHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Run under `token` instead of a private one, so a blocking run can be cancelled from another
    /// thread.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> CoordinatorState {
        *lock_or_recover(&self.state)
    }

    /// Run on the calling thread until every type group is done. Returns the first fatal failure,
    /// with the most recent entity-level failure attached.
    pub fn start_and_wait(self) -> Result<RunSummary, MassIndexingFailure> {
        let cancel = self.cancel.clone();
        self.run(&cancel)
    }

    /// Run on a dedicated thread. The handle cancels or waits for the run.
    pub fn start(self) -> Result<MassIndexingHandle, MassIndexingFailure> {
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        *lock_or_recover(&state) = CoordinatorState::Running;
        let run_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("massindex-coordinator".to_string())
            .spawn(move || self.run(&run_cancel))
            .map_err(|e| {
                *lock_or_recover(&state) = CoordinatorState::Failed;
                MassIndexingFailure::from(MassIndexingError::spawn("coordinator", e))
            })?;
        Ok(MassIndexingHandle {
            cancel,
            state,
            handle,
        })
    }

    fn run(self, cancel: &CancelToken) -> Result<RunSummary, MassIndexingFailure> {
        self.set_state(CoordinatorState::Running);
        let started = Instant::now();
        let failures = Arc::new(FailureCoordinator::new(
            self.failure_handler.clone(),
            self.config.failure_flooding_threshold,
        ));
        let progress = Arc::new(ProgressTracker::new(Arc::clone(&self.monitor)));
        info!(
            "Mass indexing {} type group(s) with {} loader thread(s) per group",
            self.groups.len(),
            self.config.loader_threads()
        );
        debug!("{:#?}", self.config);

        let outcome = self.run_groups(cancel, &failures, &progress);
        progress.indexing_completed();

        let result = match outcome {
            Some((error, group)) => Err(failures.run_failure(error, group.as_deref())),
            None => failures.finish().map(|()| {
                let counters = progress.counters();
                RunSummary {
                    loaded: counters.loaded(),
                    built: counters.built(),
                    added: counters.added(),
                    total: counters.total(),
                    entity_failures: failures.entity_failure_count(),
                    elapsed: started.elapsed(),
                }
            }),
        };
        self.set_state(match &result {
            Ok(_) => CoordinatorState::Completed,
            Err(f) if f.is_cancelled() => CoordinatorState::Cancelled,
            Err(_) => CoordinatorState::Failed,
        });
        result
    }

    fn set_state(&self, state: CoordinatorState) {
        *lock_or_recover(&self.state) = state;
    }

    /// Hand type groups to `group_parallelism` workers. Returns the first group failure; later
    /// ones still reach the failure handler.
    fn run_groups(
        &self,
        cancel: &CancelToken,
        failures: &Arc<FailureCoordinator>,
        progress: &Arc<ProgressTracker>,
    ) -> Option<GroupFailure> {
        let (group_tx, group_rx) = bounded::<TypeGroup>(self.groups.len().max(1));
        for group in &self.groups {
            let _ = group_tx.send(group.clone());
        }
        drop(group_tx);

        let first_failure: Mutex<Option<GroupFailure>> = Mutex::new(None);
        let workers = self.config.group_parallelism().min(self.groups.len()).max(1);
        let first = &first_failure;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for i in 0..workers {
                let rx = group_rx.clone();
                match thread::Builder::new()
                    .name(format!("massindex-group-{i}"))
                    .spawn_scoped(scope, move || self.group_worker(rx, cancel, failures, progress, first))
                {
                    Ok(handle) => handles.push(handle),
                    Err(e) => warn!("could not spawn type group worker {}: {}", i, e),
                }
            }
            if handles.is_empty() {
                self.group_worker(group_rx.clone(), cancel, failures, progress, first);
            }
            for handle in handles {
                if handle.join().is_err() {
                    record_group_failure(
                        first,
                        failures,
                        MassIndexingError::WorkerPanicked("type group worker".to_string()),
                        None,
                    );
                }
            }
        });
        first_failure.into_inner().unwrap_or_else(|p| p.into_inner())
    }

    fn group_worker(
        &self,
        groups: Receiver<TypeGroup>,
        cancel: &CancelToken,
        failures: &Arc<FailureCoordinator>,
        progress: &Arc<ProgressTracker>,
        first_failure: &Mutex<Option<GroupFailure>>,
    ) {
        while let Ok(group) = groups.recv() {
            let name = group.name.clone();
            let result = match cancel.check("starting type group") {
                Ok(()) => {
                    let ctx = GroupContext {
                        group: Arc::new(group),
                        source: Arc::clone(&self.source),
                        builder: Arc::clone(&self.builder),
                        hook: Arc::clone(&self.hook),
                        failures: Arc::clone(failures),
                        progress: Arc::clone(progress),
                        cancel: cancel.child(),
                        tenant: self.config.tenant.clone(),
                    };
                    run_type_group(ctx, Arc::clone(&self.backend), &self.config)
                }
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                record_group_failure(first_failure, failures, error, Some(name));
            }
        }
    }
}

/// Keep the first failure for the caller. Later ones go to the handler right away, except
/// cancellations, which only echo the run being stopped.
fn record_group_failure(
    first_failure: &Mutex<Option<GroupFailure>>,
    failures: &FailureCoordinator,
    error: MassIndexingError,
    group: Option<String>,
) {
    let mut first = lock_or_recover(first_failure);
    if first.is_none() {
        *first = Some((error, group));
    } else if error.is_cancelled() {
        debug!("type group {:?} stopped: {}", group, error);
    } else {
        drop(first);
        let _ = failures.run_failure(error, group.as_deref());
    }
}

/// Handle on a run started with [`MassIndexer::start`].
pub struct MassIndexingHandle {
    cancel: CancelToken,
    state: Arc<Mutex<CoordinatorState>>,
    handle: JoinHandle<Result<RunSummary, MassIndexingFailure>>,
}

impl MassIndexingHandle {
    /// Ask every thread of the run to stop at its next blocking point. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token to cancel the run from elsewhere (e.g. a signal handler).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn state(&self) -> CoordinatorState {
        *lock_or_recover(&self.state)
    }

    pub fn wait(self) -> Result<RunSummary, MassIndexingFailure> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => {
                *lock_or_recover(&self.state) = CoordinatorState::Failed;
                Err(MassIndexingError::WorkerPanicked("coordinator".to_string()).into())
            }
        }
    }
}
