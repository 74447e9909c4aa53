//! Index backends: where bulk writes and index-scale operations go.

pub mod memory;
pub mod segment;

pub use memory::{BackendCall, InMemoryBackend};
pub use segment::SegmentDirBackend;

use anyhow::Result;

use crate::types::{BulkResponse, BulkSubmission, IndexScaleWork};

pub trait IndexBackend: Send + Sync {
    /// Submit items in order. `Err` means the whole submission failed; otherwise one result per
    /// item, in submission order. Each item's commit and refresh strategy must be honored.
    fn submit(&self, bulk: &BulkSubmission) -> Result<BulkResponse>;

    fn execute(&self, work: &IndexScaleWork) -> Result<()>;

    /// Drop and recreate the index.
    fn reset_schema(&self, index: &str) -> Result<()>;
}
