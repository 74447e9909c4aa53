//! Document indexing step: records → work items, one failure per bad record.

use anyhow::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::types::{BulkSubmission, Document, Record, TypeGroup, WorkItem};

use super::error_handler::{EntityFailure, FailureCoordinator, building_operation};

/// Turns one record into the document to index. External to the mass indexer.
pub trait DocumentBuilder: Send + Sync {
    fn build(&self, group: &TypeGroup, record: &Record) -> Result<Document>;
}

/// Built items for one record batch.
pub struct BuiltBatch {
    pub submission: BulkSubmission,
    /// Records that produced a document (each may yield one item per target index).
    pub built: u64,
}

fn build_one(builder: &dyn DocumentBuilder, group: &TypeGroup, record: &Record) -> Result<Document> {
    match catch_unwind(AssertUnwindSafe(|| builder.build(group, record))) {
        Ok(res) => res,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "document builder panicked".to_string());
            Err(anyhow::anyhow!(msg))
        }
    }
}

/// Build every record of `records`. A record whose build fails (or panics) is reported once to
/// `failures` and left out; the rest of the batch is unaffected.
pub fn build_batch(
    builder: &dyn DocumentBuilder,
    group: &TypeGroup,
    records: &[Record],
    failures: &FailureCoordinator,
) -> BuiltBatch {
    let mut items = Vec::with_capacity(records.len() * group.indexes.len());
    let mut built = 0_u64;
    for record in records {
        match build_one(builder, group, record) {
            Ok(doc) => {
                built += 1;
                for index in &group.indexes {
                    items.push(WorkItem::add(
                        index,
                        &record.entity_type,
                        record.id.clone(),
                        doc.clone(),
                    ));
                }
            }
            Err(e) => failures.entity_failure(EntityFailure::new(
                &record.entity_type,
                vec![record.id.clone()],
                building_operation(&record.entity_type),
                &e,
            )),
        }
    }
    BuiltBatch {
        submission: BulkSubmission { items },
        built,
    }
}
