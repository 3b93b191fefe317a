//! Format converters: one strategy per format family.
//!
//! Every strategy implements [`FormatConverter`], so the orchestrator and the
//! failure policy never branch on the format. Per-format edge-case policy
//! (decode fallback, merge ordering, timestamp saturation) lives inside each
//! strategy instead.
//!
//! ## Strategies
//!
//! ```text
//! raster   ──▶ decode (declared codec, then sniffed) ─▶ resize? ─▶ JPEG/PNG
//! pages    ──▶ %PDF check per item ─▶ assemble: append pages in order ─▶ PDF
//! subtitle ──▶ parse SRT ─▶ apply edit ─▶ serialise
//! ```
//!
//! 1. [`raster`]   — photo transcodes and resize; isolate-and-continue
//! 2. [`pages`]    — PDF merge; abort-on-first-failure
//! 3. [`subtitle`] — time-coded text edits; isolate-and-continue

pub mod pages;
pub mod raster;
pub mod subtitle;

use crate::error::{ConversionError, JobError};
use crate::model::{base_name, ConversionOptions, Converted, InputItem, Tool};
use crate::policy::FailurePolicy;
use std::sync::Arc;

/// The shared contract of every conversion strategy.
pub trait FormatConverter: Send + Sync {
    fn tool(&self) -> Tool;

    /// Batch policy owned by the strategy, never by the caller.
    fn failure_policy(&self) -> FailurePolicy;

    /// Deterministic output name for an input name.
    fn output_name(&self, input_name: &str) -> String;

    /// Convert one item's bytes.
    fn convert(&self, item: &InputItem) -> Result<Vec<u8>, ConversionError>;

    /// Combine per-item outputs once every item has been attempted.
    ///
    /// One-to-one strategies keep the default. Receives only successes, in
    /// arrival order.
    fn assemble(&self, converted: Vec<Converted>) -> Result<Vec<Converted>, ConversionError> {
        Ok(converted)
    }

    /// Whether items may be converted concurrently.
    fn parallel_safe(&self) -> bool {
        false
    }
}

/// Select the strategy for a tool.
pub fn converter_for(
    tool: Tool,
    options: &ConversionOptions,
) -> Result<Arc<dyn FormatConverter>, JobError> {
    match options {
        ConversionOptions::Raster(opts) if options.fits(tool) => {
            Ok(Arc::new(raster::RasterTranscoder::new(tool, opts.clone())?))
        }
        ConversionOptions::PageMerge(opts) if options.fits(tool) => {
            Ok(Arc::new(pages::PageMerger::new(opts.clone())))
        }
        ConversionOptions::Subtitle(opts) if options.fits(tool) => {
            Ok(Arc::new(subtitle::SubtitleEditor::new(opts.clone())))
        }
        _ => Err(JobError::InvalidOptions(format!(
            "options do not apply to tool '{tool}'"
        ))),
    }
}

/// Replace the extension of an upload name, dropping directory components.
///
/// `photos/cat.webp` → `cat.jpg`; `README` → `README.jpg`.
pub fn swap_extension(input_name: &str, new_ext: &str) -> String {
    let base = base_name(input_name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };
    let stem = if stem.is_empty() { "file" } else { stem };
    format!("{stem}.{new_ext}")
}

/// MIME type for an output file name.
pub fn content_type_for(file_name: &str) -> &'static str {
    match crate::model::extension(file_name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("srt") => "application/x-subrip",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
