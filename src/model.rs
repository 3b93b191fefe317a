//! Data types flowing through a conversion job.
//!
//! Every value here lives for exactly one request: items are moved into the
//! job, consumed by the converter, and the outcomes are turned into an
//! [`Artifact`] plus a [`JobReport`] before the job is dropped.

use crate::error::{ConversionError, ErrorKind};
use crate::pipeline::subtitle::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raster extensions the image strategies can decode.
pub const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "tif", "tiff"];

/// JPEG quality used when the caller does not pick one.
pub const DEFAULT_QUALITY: u8 = 85;

/// Resize target used when a dimension is not supplied.
pub const FALLBACK_WIDTH: u32 = 800;
pub const FALLBACK_HEIGHT: u32 = 600;

// ── Tools ────────────────────────────────────────────────────────────────

/// The format tag selecting one conversion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    WebpToJpg,
    PngToJpg,
    JpgToPng,
    ImageToJpg,
    ImageResize,
    PdfMerge,
    #[serde(rename = "srt-edit")]
    SubtitleEdit,
}

/// Strategy family a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    Raster,
    Pages,
    Subtitle,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::WebpToJpg,
        Tool::PngToJpg,
        Tool::JpgToPng,
        Tool::ImageToJpg,
        Tool::ImageResize,
        Tool::PdfMerge,
        Tool::SubtitleEdit,
    ];

    /// URL / CLI identifier.
    pub fn slug(self) -> &'static str {
        match self {
            Tool::WebpToJpg => "webp-to-jpg",
            Tool::PngToJpg => "png-to-jpg",
            Tool::JpgToPng => "jpg-to-png",
            Tool::ImageToJpg => "image-to-jpg",
            Tool::ImageResize => "image-resize",
            Tool::PdfMerge => "pdf-merge",
            Tool::SubtitleEdit => "srt-edit",
        }
    }

    pub fn family(self) -> FormatFamily {
        match self {
            Tool::PdfMerge => FormatFamily::Pages,
            Tool::SubtitleEdit => FormatFamily::Subtitle,
            _ => FormatFamily::Raster,
        }
    }

    /// Lower-case extensions (without dot) accepted as input.
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            Tool::WebpToJpg => &["webp"],
            Tool::PngToJpg => &["png"],
            Tool::JpgToPng => &["jpg", "jpeg"],
            Tool::ImageToJpg | Tool::ImageResize => RASTER_EXTENSIONS,
            Tool::PdfMerge => &["pdf"],
            Tool::SubtitleEdit => &["srt"],
        }
    }

    pub fn accepts(self, file_name: &str) -> bool {
        extension(file_name)
            .map(|ext| self.accepted_extensions().contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Tool::ALL
            .into_iter()
            .find(|t| t.slug() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Tool::ALL.iter().map(|t| t.slug()).collect();
                format!("unknown tool '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Lower-cased extension of a file name, if any.
pub fn extension(file_name: &str) -> Option<String> {
    let base = base_name(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Strip any directory components a client put into an upload name.
pub fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

// ── Inputs ───────────────────────────────────────────────────────────────

/// One uploaded file.
#[derive(Clone, PartialEq, Eq)]
pub struct InputItem {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Size the client declared; defaults to `bytes.len()`.
    pub declared_size: u64,
}

impl InputItem {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let declared_size = bytes.len() as u64;
        Self {
            name: name.into(),
            bytes,
            declared_size,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }
}

impl fmt::Debug for InputItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputItem")
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("declared_size", &self.declared_size)
            .finish()
    }
}

// ── Options ──────────────────────────────────────────────────────────────

/// Format-specific configuration, one variant per strategy family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionOptions {
    Raster(RasterOptions),
    PageMerge(PageMergeOptions),
    Subtitle(SubtitleOptions),
}

impl ConversionOptions {
    /// Default options for a tool when the caller supplies none.
    pub fn defaults_for(tool: Tool) -> Self {
        match tool.family() {
            FormatFamily::Raster => ConversionOptions::Raster(RasterOptions::default()),
            FormatFamily::Pages => ConversionOptions::PageMerge(PageMergeOptions::default()),
            FormatFamily::Subtitle => ConversionOptions::Subtitle(SubtitleOptions::default()),
        }
    }

    pub fn fits(&self, tool: Tool) -> bool {
        matches!(
            (self, tool.family()),
            (ConversionOptions::Raster(_), FormatFamily::Raster)
                | (ConversionOptions::PageMerge(_), FormatFamily::Pages)
                | (ConversionOptions::Subtitle(_), FormatFamily::Subtitle)
        )
    }
}

/// Raster transcode / resize options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterOptions {
    /// JPEG quality 1–100, handed to the encoder unchanged. Default: 85.
    pub quality: u8,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    /// Fit inside the target without upscaling (true) or stretch to it exactly.
    pub preserve_aspect: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            target_width: None,
            target_height: None,
            preserve_aspect: true,
        }
    }
}

/// Page-collection merge options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMergeOptions {
    /// 0-based source indices in output order. Empty means arrival order.
    pub order: Vec<usize>,
}

impl PageMergeOptions {
    /// Resolve `order` against the real number of sources.
    ///
    /// Indices past the end are dropped, not rejected.
    pub fn resolve(&self, count: usize) -> Vec<usize> {
        if self.order.is_empty() {
            return (0..count).collect();
        }
        self.order.iter().copied().filter(|&i| i < count).collect()
    }
}

/// Which timestamp of a subtitle entry an edit touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    Start,
    End,
}

impl FromStr for TimeField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(TimeField::Start),
            "end" => Ok(TimeField::End),
            other => Err(format!("field must be 'start' or 'end', got '{other}'")),
        }
    }
}

/// A single edit applied to subtitle entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleEdit {
    /// Add whole seconds to a timestamp (negative moves earlier).
    Shift { field: TimeField, seconds: i64 },
    /// Replace a timestamp with a literal value.
    SetTime { field: TimeField, value: Timestamp },
    /// Replace the entry's text.
    SetText(String),
}

/// Time-coded text edit options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleOptions {
    /// Entry id to edit; `None` applies the edit to every entry.
    pub entry: Option<u32>,
    pub edit: SubtitleEdit,
}

impl Default for SubtitleOptions {
    fn default() -> Self {
        Self {
            entry: None,
            edit: SubtitleEdit::Shift {
                field: TimeField::Start,
                seconds: 0,
            },
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────

/// A successfully converted output, named by the output-name rule.
#[derive(Clone, PartialEq, Eq)]
pub struct Converted {
    /// Arrival index of the source item.
    pub index: usize,
    /// Base name of the source item; a combined output carries its own name.
    pub source: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Converted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converted")
            .field("index", &self.index)
            .field("source", &self.source)
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// The per-item result of a conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Success(Converted),
    Failure {
        index: usize,
        name: String,
        error: ConversionError,
    },
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success(_))
    }

    pub fn index(&self) -> usize {
        match self {
            ConversionOutcome::Success(c) => c.index,
            ConversionOutcome::Failure { index, .. } => *index,
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// The downloadable result of a job.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    /// True when several outputs were wrapped into a zip bundle.
    pub bundled: bool,
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("bundled", &self.bundled)
            .finish()
    }
}

/// Per-item line of a [`JobReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    pub output_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemFailure>,
}

/// Failure detail for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome metadata for a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub tool: Tool,
    pub success: bool,
    pub item_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_input_bytes: u64,
    pub total_output_bytes: u64,
    pub processing_time_ms: u64,
    pub items: Vec<ItemReport>,
    pub states: Vec<crate::job::JobState>,
}

/// What a successful job hands back to its caller.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub artifact: Artifact,
    pub report: JobReport,
}
