//! Progress-callback trait for per-item and per-state job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its states and converts each
//! item.
//!
//! # Example
//!
//! ```rust
//! use edgequake_convert::{JobProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {name} ({output_len} bytes)", index + 1, total);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobState;
use std::sync::Arc;

/// Called by the orchestrator as a job progresses.
///
/// Implementations must be `Send + Sync`: raster items may convert
/// concurrently on the blocking pool. All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// Called on every state machine transition.
    fn on_state_change(&self, from: &JobState, to: &JobState) {
        let _ = (from, to);
    }

    /// Called just before an item is handed to the converter.
    ///
    /// `index` is the 0-based arrival index.
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an item converted successfully.
    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let _ = (index, total, name, output_len);
    }

    /// Called when an item failed.
    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after the conversion step, before packaging.
    fn on_job_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
