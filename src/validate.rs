//! Batch validation: runs to completion before any converter sees a byte.
//!
//! Rejection is all-or-nothing. A batch that breaks any limit is refused as a
//! whole with one error, so no CPU is spent decoding files whose results
//! would be thrown away.

use crate::error::JobError;
use crate::model::{base_name, InputItem, Tool};
use crate::tier::TierLimits;
use tracing::debug;

/// Check count and size limits.
///
/// Order of checks: empty batch, item count, per-item size (first offender
/// wins), total size.
pub fn validate(items: &[InputItem], limits: &TierLimits) -> Result<(), JobError> {
    if items.is_empty() {
        return Err(JobError::EmptyBatch);
    }

    if items.len() > limits.max_items {
        return Err(JobError::TooManyItems {
            count: items.len(),
            max: limits.max_items,
        });
    }

    if let Some(item) = items
        .iter()
        .find(|i| i.declared_size > limits.max_item_bytes)
    {
        return Err(JobError::ItemTooLarge {
            name: base_name(&item.name).to_string(),
            size: item.declared_size,
            max: limits.max_item_bytes,
        });
    }

    let total: u64 = items.iter().map(|i| i.declared_size).sum();
    if total > limits.max_total_bytes {
        return Err(JobError::BatchTooLarge {
            total,
            max: limits.max_total_bytes,
        });
    }

    debug!("Validated {} items, {} bytes total", items.len(), total);
    Ok(())
}

/// Check that every item's extension is one the tool accepts.
pub fn validate_types(items: &[InputItem], tool: Tool) -> Result<(), JobError> {
    match items.iter().find(|i| !tool.accepts(&i.name)) {
        Some(item) => Err(JobError::UnsupportedFileType {
            name: base_name(&item.name).to_string(),
            tool: tool.slug().to_string(),
        }),
        None => Ok(()),
    }
}
