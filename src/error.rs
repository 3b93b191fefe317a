//! Error types for the edgequake-convert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`JobError`] — **Fatal**: the job cannot produce an artifact at all
//!   (empty batch, over quota, merge source unreadable, nothing left to
//!   package). Returned as `Err(JobError)` from [`crate::job::Orchestrator`].
//!
//! * [`ConversionError`] — **Per item**: one file failed to convert. Stored
//!   inside [`crate::model::ConversionOutcome::Failure`] so that
//!   isolate-and-continue strategies can still package the remaining
//!   successes. Abort-on-first-failure strategies lift it into
//!   [`JobError::ConversionFailed`].
//!
//! Both map onto a small closed set of [`ErrorKind`]s, which is what callers,
//! the HTTP layer and the outcome sink actually branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification shared by every error the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyBatch,
    TooManyItems,
    ItemTooLarge,
    BatchTooLarge,
    UnsupportedFileType,
    QuotaExceeded,
    InvalidOptions,
    UnsupportedOrCorrupt,
    NothingToPackage,
    PackagingConflict,
    Timeout,
    InternalConversionError,
}

impl ErrorKind {
    /// HTTP status code the service answers with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::EmptyBatch | ErrorKind::UnsupportedFileType | ErrorKind::InvalidOptions => {
                400
            }
            ErrorKind::TooManyItems | ErrorKind::QuotaExceeded => 403,
            ErrorKind::ItemTooLarge | ErrorKind::BatchTooLarge => 413,
            ErrorKind::Timeout => 408,
            ErrorKind::UnsupportedOrCorrupt
            | ErrorKind::NothingToPackage
            | ErrorKind::PackagingConflict
            | ErrorKind::InternalConversionError => 500,
        }
    }

    /// True for rejections that a higher subscription tier would lift.
    pub fn is_quota(self) -> bool {
        matches!(
            self,
            ErrorKind::TooManyItems
                | ErrorKind::ItemTooLarge
                | ErrorKind::BatchTooLarge
                | ErrorKind::QuotaExceeded
        )
    }
}

/// All fatal errors returned by the edgequake-convert library.
///
/// Item-level failures use [`ConversionError`] and are stored in the job's
/// outcomes rather than propagated here, unless the active strategy aborts
/// on the first failure.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The request carried no files.
    #[error("No files were uploaded. Add at least one file to convert.")]
    EmptyBatch,

    /// More files than the tier allows in one job.
    #[error("Too many files: {count} uploaded, your plan allows {max} per job.")]
    TooManyItems { count: usize, max: usize },

    /// One file exceeds the per-file size limit.
    #[error("File '{name}' is {size} bytes, your plan allows {max} bytes per file.")]
    ItemTooLarge { name: String, size: u64, max: u64 },

    /// The batch as a whole exceeds the total size limit.
    #[error("Upload totals {total} bytes, your plan allows {max} bytes per job.")]
    BatchTooLarge { total: u64, max: u64 },

    /// File extension is not accepted by the selected tool.
    #[error("File '{name}' is not supported by {tool}")]
    UnsupportedFileType { name: String, tool: String },

    /// The tenant has used up today's allowance for this tool.
    #[error("Daily limit reached for {tool}. Upgrade for more conversions.")]
    QuotaExceeded { tool: String },

    /// Request options are missing, malformed, or do not fit the tool.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// An item failed under an abort-on-first-failure strategy.
    #[error("Conversion of '{name}' failed: {source}")]
    ConversionFailed {
        name: String,
        #[source]
        source: ConversionError,
    },

    /// The strategy could not combine its per-item outputs (e.g. a merge
    /// source that passed the header check but does not parse).
    #[error("Could not combine the converted files: {source}")]
    AssemblyFailed {
        #[source]
        source: ConversionError,
    },

    /// Every item failed under an isolate-and-continue strategy.
    #[error("All {total} files failed to convert.\nFirst error: {first}")]
    AllItemsFailed { total: usize, first: ConversionError },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// No successful outputs reached the packager.
    #[error("Nothing to package: no file converted successfully")]
    NothingToPackage,

    /// Two outputs would share one archive entry name.
    #[error("Two files would both be saved as '{name}'. Rename one and retry.")]
    PackagingConflict { name: String },

    /// The archive writer itself failed.
    #[error("Failed to build archive: {0}")]
    Packaging(String),

    /// The job ran past its deadline and was discarded.
    #[error("Conversion did not finish within {secs} seconds")]
    TimedOut { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::EmptyBatch => ErrorKind::EmptyBatch,
            JobError::TooManyItems { .. } => ErrorKind::TooManyItems,
            JobError::ItemTooLarge { .. } => ErrorKind::ItemTooLarge,
            JobError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            JobError::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            JobError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            JobError::InvalidOptions(_) => ErrorKind::InvalidOptions,
            JobError::ConversionFailed { source, .. } | JobError::AssemblyFailed { source } => {
                source.kind()
            }
            JobError::AllItemsFailed { first, .. } => first.kind(),
            JobError::NothingToPackage => ErrorKind::NothingToPackage,
            JobError::PackagingConflict { .. } => ErrorKind::PackagingConflict,
            JobError::TimedOut { .. } => ErrorKind::Timeout,
            JobError::Packaging(_)
            | JobError::OutputWriteFailed { .. }
            | JobError::InvalidConfig(_)
            | JobError::Internal(_) => ErrorKind::InternalConversionError,
        }
    }

    /// Name of the item that caused the failure, when there is one.
    pub fn offending_item(&self) -> Option<&str> {
        match self {
            JobError::ItemTooLarge { name, .. }
            | JobError::UnsupportedFileType { name, .. }
            | JobError::ConversionFailed { name, .. }
            | JobError::PackagingConflict { name } => Some(name),
            _ => None,
        }
    }
}

/// A non-fatal error for a single item.
///
/// Stored alongside the item's name in
/// [`crate::model::ConversionOutcome::Failure`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConversionError {
    /// Neither the declared codec nor content sniffing could decode the item.
    #[error("unsupported or corrupt file: {detail}")]
    UnsupportedOrCorrupt { detail: String },

    /// Subtitle text does not follow the `index / time --> time / text` grammar.
    #[error("malformed subtitle block at line {line}: {detail}")]
    MalformedSubtitle { line: usize, detail: String },

    /// The requested subtitle entry id does not exist in the file.
    #[error("subtitle entry {index} not found")]
    EntryNotFound { index: u32 },

    /// Options resolved against the input select nothing usable.
    #[error("{0}")]
    InvalidOptions(String),

    /// Re-encoding or serialisation failed after a successful decode.
    #[error("encoding failed: {detail}")]
    Encode { detail: String },

    /// Worker panicked or another unexpected failure.
    #[error("internal conversion error: {detail}")]
    Internal { detail: String },
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::UnsupportedOrCorrupt { .. }
            | ConversionError::MalformedSubtitle { .. } => ErrorKind::UnsupportedOrCorrupt,
            ConversionError::EntryNotFound { .. } | ConversionError::InvalidOptions(_) => {
                ErrorKind::InvalidOptions
            }
            ConversionError::Encode { .. } | ConversionError::Internal { .. } => {
                ErrorKind::InternalConversionError
            }
        }
    }

    pub(crate) fn corrupt(detail: impl std::fmt::Display) -> Self {
        ConversionError::UnsupportedOrCorrupt {
            detail: detail.to_string(),
        }
    }

    pub(crate) fn encode(detail: impl std::fmt::Display) -> Self {
        ConversionError::Encode {
            detail: detail.to_string(),
        }
    }
}
