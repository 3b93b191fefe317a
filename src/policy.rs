//! Batch failure policy: what one bad item does to the rest of the job.
//!
//! The policy is owned by the strategy ([`FormatConverter::failure_policy`]),
//! never chosen by the caller. Items are moved into the blocking pool one at
//! a time and dropped as soon as they are converted, so at most
//! `concurrency` decoded inputs are alive at once.

use crate::error::ConversionError;
use crate::model::{base_name, ConversionOutcome, Converted, InputItem};
use crate::pipeline::FormatConverter;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a batch reacts to a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failure; no further items are attempted.
    AbortOnFirstFailure,
    /// Record the failure and keep converting.
    IsolateAndContinue,
}

/// Outcomes of one batch, in arrival order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub outcomes: Vec<ConversionOutcome>,
    /// True when an abort-on-first-failure strategy stopped early.
    pub aborted: bool,
}

impl BatchOutcome {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// First failure in arrival order.
    pub fn first_failure(&self) -> Option<(&str, &ConversionError)> {
        self.outcomes.iter().find_map(|o| match o {
            ConversionOutcome::Failure { name, error, .. } => Some((name.as_str(), error)),
            ConversionOutcome::Success(_) => None,
        })
    }

    /// Clone out the successful outputs, in arrival order.
    pub fn successes(&self) -> Vec<Converted> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ConversionOutcome::Success(c) => Some(c.clone()),
                ConversionOutcome::Failure { .. } => None,
            })
            .collect()
    }
}

/// Convert every item under the converter's failure policy.
///
/// Items run sequentially unless the converter is parallel-safe, isolates
/// failures and `concurrency > 1`; then they run through an ordered buffered
/// stream. Outcome order always equals arrival order.
pub async fn run_batch(
    items: Vec<InputItem>,
    converter: Arc<dyn FormatConverter>,
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> BatchOutcome {
    let total = items.len();
    let policy = converter.failure_policy();
    let parallel = converter.parallel_safe()
        && policy == FailurePolicy::IsolateAndContinue
        && concurrency > 1;

    if parallel {
        debug!("Converting {} items, {} at a time", total, concurrency);
        let outcomes = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
            let converter = Arc::clone(&converter);
            let progress = progress.cloned();
            async move { convert_one(index, total, item, converter, progress.as_ref()).await }
        }))
        .buffered(concurrency)
        .collect()
        .await;
        return BatchOutcome {
            outcomes,
            aborted: false,
        };
    }

    let mut outcomes = Vec::with_capacity(total);
    let mut aborted = false;
    for (index, item) in items.into_iter().enumerate() {
        let outcome = convert_one(index, total, item, Arc::clone(&converter), progress).await;
        let failed = !outcome.is_success();
        outcomes.push(outcome);
        if failed && policy == FailurePolicy::AbortOnFirstFailure {
            if index + 1 < total {
                warn!(
                    "Aborting batch after item {}; {} items not attempted",
                    index + 1,
                    total - index - 1
                );
            }
            aborted = true;
            break;
        }
    }

    BatchOutcome { outcomes, aborted }
}

/// Convert one item on the blocking pool.
async fn convert_one(
    index: usize,
    total: usize,
    item: InputItem,
    converter: Arc<dyn FormatConverter>,
    progress: Option<&ProgressCallback>,
) -> ConversionOutcome {
    let name = base_name(&item.name).to_string();
    if let Some(cb) = progress {
        cb.on_item_start(index, total, &name);
    }

    let output_name = converter.output_name(&item.name);
    let result = tokio::task::spawn_blocking(move || converter.convert(&item))
        .await
        .unwrap_or_else(|e| {
            Err(ConversionError::Internal {
                detail: format!("worker failed: {e}"),
            })
        });

    match result {
        Ok(bytes) => {
            debug!("{} → {} ({} bytes)", name, output_name, bytes.len());
            if let Some(cb) = progress {
                cb.on_item_complete(index, total, &name, bytes.len());
            }
            ConversionOutcome::Success(Converted {
                index,
                source: name,
                name: output_name,
                bytes,
            })
        }
        Err(error) => {
            warn!("Item {} ({}) failed: {}", index + 1, name, error);
            if let Some(cb) = progress {
                cb.on_item_error(index, total, &name, &error.to_string());
            }
            ConversionOutcome::Failure { index, name, error }
        }
    }
}
