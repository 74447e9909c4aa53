//! Index-scale operations around the bulk load, per target index:
//! purge → mergeSegments (before) → [bulk work] → mergeSegments (after) → flush → refresh.
//! The first failing step stops the sequence.

use std::sync::Arc;

use crate::backend::IndexBackend;
use crate::error::MassIndexingError;
use crate::types::{IndexScaleOp, IndexScaleWork};
use crate::utils::config::MassIndexingConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    NotStarted,
    Purged,
    MergedBefore,
    /// "Before" steps done; bulk work may run.
    BulkInFlight,
    MergedAfter,
    Flushed,
    Refreshed,
    Done,
    Failed,
}

/// Which optional steps run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexScalePlan {
    pub purge: bool,
    /// Only meaningful after a purge.
    pub merge_before: bool,
    pub merge_after: bool,
}

impl IndexScalePlan {
    pub fn from_config(cfg: &MassIndexingConfig) -> Self {
        Self {
            purge: cfg.purge_all_on_start,
            merge_before: cfg.purge_all_on_start && cfg.merge_segments_after_purge,
            merge_after: cfg.merge_segments_on_finish,
        }
    }
}

pub struct IndexScaleSequencer {
    backend: Arc<dyn IndexBackend>,
    index: String,
    tenant: Option<String>,
    plan: IndexScalePlan,
    state: SequencerState,
}

impl IndexScaleSequencer {
    pub fn new(backend: Arc<dyn IndexBackend>, index: &str, tenant: Option<String>, plan: IndexScalePlan) -> Self {
        Self {
            backend,
            index: index.to_string(),
            tenant,
            plan,
            state: SequencerState::NotStarted,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn before_bulk(&mut self) -> Result<(), MassIndexingError> {
        self.expect_state(SequencerState::NotStarted, IndexScaleOp::Purge)?;
        if self.plan.purge {
            self.step(IndexScaleOp::Purge, SequencerState::Purged)?;
        }
        if self.plan.merge_before {
            self.step(IndexScaleOp::MergeSegments, SequencerState::MergedBefore)?;
        }
        self.state = SequencerState::BulkInFlight;
        Ok(())
    }

    /// Call only after bulk work for the index has been drained.
    pub fn after_bulk(&mut self) -> Result<(), MassIndexingError> {
        self.expect_state(SequencerState::BulkInFlight, IndexScaleOp::Flush)?;
        if self.plan.merge_after {
            self.step(IndexScaleOp::MergeSegments, SequencerState::MergedAfter)?;
        }
        self.step(IndexScaleOp::Flush, SequencerState::Flushed)?;
        self.step(IndexScaleOp::Refresh, SequencerState::Refreshed)?;
        self.state = SequencerState::Done;
        Ok(())
    }

    fn expect_state(&self, expected: SequencerState, op: IndexScaleOp) -> Result<(), MassIndexingError> {
        if self.state == expected {
            return Ok(());
        }
        Err(MassIndexingError::Operation {
            op,
            index: self.index.clone(),
            source: anyhow::anyhow!("sequencer is {:?}, expected {:?}", self.state, expected).into(),
        })
    }

    fn step(&mut self, op: IndexScaleOp, next: SequencerState) -> Result<(), MassIndexingError> {
        let work = IndexScaleWork {
            op,
            index: self.index.clone(),
            tenant: self.tenant.clone(),
        };
        log::debug!("{} on index '{}'", op, self.index);
        match self.backend.execute(&work) {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => {
                self.state = SequencerState::Failed;
                Err(MassIndexingError::Operation {
                    op,
                    index: self.index.clone(),
                    source: e.into(),
                })
            }
        }
    }
}

/// Sequencers for every target index of a type group.
pub struct GroupSequencer {
    sequencers: Vec<IndexScaleSequencer>,
}

impl GroupSequencer {
    pub fn new(backend: &Arc<dyn IndexBackend>, indexes: &[String], tenant: Option<String>, plan: IndexScalePlan) -> Self {
        Self {
            sequencers: indexes
                .iter()
                .map(|index| IndexScaleSequencer::new(Arc::clone(backend), index, tenant.clone(), plan))
                .collect(),
        }
    }

    pub fn before_bulk(&mut self) -> Result<(), MassIndexingError> {
        self.sequencers.iter_mut().try_for_each(|s| s.before_bulk())
    }

    pub fn after_bulk(&mut self) -> Result<(), MassIndexingError> {
        self.sequencers.iter_mut().try_for_each(|s| s.after_bulk())
    }

    pub fn states(&self) -> Vec<(&str, SequencerState)> {
        self.sequencers.iter().map(|s| (s.index(), s.state())).collect()
    }
}

/// Drop and recreate every index of a group.
pub fn reset_schemas(backend: &dyn IndexBackend, indexes: &[String]) -> Result<(), MassIndexingError> {
    for index in indexes {
        log::debug!("resetting schema of index '{}'", index);
        backend
            .reset_schema(index)
            .map_err(|e| MassIndexingError::SchemaReset {
                index: index.clone(),
                source: e.into(),
            })?;
    }
    Ok(())
}
