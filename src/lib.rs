//! # edgequake-convert
//!
//! Tier-gated batch file conversion: raster transcoding, PDF merging and
//! subtitle editing, exposed as a library, an HTTP service and a CLI.
//!
//! ## Why this crate?
//!
//! Upload-and-convert services fail in boring ways: one corrupt photo sinks
//! a batch of twenty, a merge silently drops a page, an oversized upload is
//! decoded before anyone checks its size. Here every job runs through one
//! explicit state machine. Limits are checked before any converter runs,
//! each format family declares how it reacts to a bad item, and the result
//! is always exactly one artifact or one typed error.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files + options
//!  │
//!  ├─ 1. Collect    request received, tier resolved
//!  ├─ 2. Validate   item count, per-item size, total size, file types
//!  ├─ 3. Convert    raster / pages / subtitle (CPU-bound, spawn_blocking)
//!  │                isolate-and-continue or abort-on-first-failure
//!  ├─ 4. Package    one output passes through, several are zipped
//!  └─ 5. Complete   artifact + per-item report, usage recorded
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_convert::{InputItem, JobRequest, Orchestrator, ServiceConfig, Tool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(ServiceConfig::default());
//!     let items = vec![
//!         InputItem::new("a.webp", std::fs::read("a.webp")?),
//!         InputItem::new("b.webp", std::fs::read("b.webp")?),
//!     ];
//!     let output = orchestrator.run(JobRequest::new(Tool::WebpToJpg, items)).await?;
//!     std::fs::write(&output.artifact.file_name, &output.artifact.bytes)?;
//!     eprintln!("{}/{} converted", output.report.succeeded, output.report.item_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum router and `serve()` for the multipart HTTP API |
//! | `cli`    | on      | Enables the `convertd` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable both when using only the library:
//! ```toml
//! edgequake-convert = { version = "0.1", default-features = false }
//! ```
//!
//! ## Tools
//!
//! | Tool | Input | Output | On a bad item |
//! |------|-------|--------|---------------|
//! | `webp-to-jpg`  | `.webp` | `.jpg` | skip it |
//! | `png-to-jpg`   | `.png`  | `.jpg` | skip it |
//! | `jpg-to-png`   | `.jpg`  | `.png` | skip it |
//! | `image-to-jpg` | any raster | `.jpg` | skip it |
//! | `image-resize` | any raster | same format | skip it |
//! | `pdf-merge`    | `.pdf`  | `merged.pdf` | fail the job |
//! | `srt-edit`     | `.srt`  | `.srt` | skip it |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod config;
pub mod error;
pub mod form;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod report;
#[cfg(feature = "server")]
pub mod server;
pub mod tier;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{pack, write_artifact};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{ConversionError, ErrorKind, JobError};
pub use form::FormFields;
pub use job::{JobRequest, JobState, Orchestrator};
pub use model::{
    Artifact, ConversionOptions, InputItem, ItemReport, JobOutput, JobReport, PageMergeOptions,
    RasterOptions, SubtitleEdit, SubtitleOptions, TimeField, Tool,
};
pub use pipeline::FormatConverter;
pub use policy::FailurePolicy;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{
    FixedAllowance, OutcomeEvent, OutcomeSink, TracingOutcomeSink, UnmeteredUsage, UsageCounter,
};
#[cfg(feature = "server")]
pub use server::{router, serve};
pub use tier::{TierLimits, TierPolicy};
