//! Raster transcode: decode a photo, optionally resize, re-encode.
//!
//! ## Decode fallback
//!
//! Uploads are routinely misnamed (a PNG saved as `.webp`, a JPEG with a
//! `.png` extension from a chat app). The declared codec is tried first;
//! if it fails the bytes are decoded once more by content sniffing before the
//! item is reported as `UnsupportedOrCorrupt`. That single retry is the only
//! automatic retry anywhere in the pipeline.
//!
//! ## Why flatten alpha onto white?
//!
//! JPEG has no alpha channel. Dropping alpha outright exposes whatever RGB
//! values sit under transparent pixels (often black), so transparent logos
//! come out on a black box. Compositing onto white matches what users see in
//! a browser.

use super::{swap_extension, FormatConverter};
use crate::error::{ConversionError, JobError};
use crate::model::{base_name, extension, FormatFamily, InputItem, RasterOptions, Tool};
use crate::model::{FALLBACK_HEIGHT, FALLBACK_WIDTH};
use crate::policy::FailurePolicy;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tracing::{debug, warn};

/// Raster strategy for every image tool.
#[derive(Debug, Clone)]
pub struct RasterTranscoder {
    tool: Tool,
    options: RasterOptions,
}

impl RasterTranscoder {
    pub fn new(tool: Tool, options: RasterOptions) -> Result<Self, JobError> {
        if tool.family() != FormatFamily::Raster {
            return Err(JobError::InvalidOptions(format!(
                "'{tool}' is not an image tool"
            )));
        }
        if !(1..=100).contains(&options.quality) {
            return Err(JobError::InvalidOptions(format!(
                "quality must be 1–100, got {}",
                options.quality
            )));
        }
        if options.target_width == Some(0) || options.target_height == Some(0) {
            return Err(JobError::InvalidOptions(
                "target dimensions must be ≥ 1".into(),
            ));
        }
        Ok(Self { tool, options })
    }

    /// Output extension for an input name.
    fn output_extension(&self, input_name: &str) -> &'static str {
        match self.tool {
            Tool::JpgToPng => "png",
            Tool::ImageResize => match extension(input_name).as_deref() {
                Some("png") => "png",
                _ => "jpg",
            },
            _ => "jpg",
        }
    }

    /// Resize bounds, if this job resizes at all.
    fn resize_target(&self) -> Option<(u32, u32)> {
        let o = &self.options;
        if self.tool == Tool::ImageResize || o.target_width.is_some() || o.target_height.is_some() {
            Some((
                o.target_width.unwrap_or(FALLBACK_WIDTH),
                o.target_height.unwrap_or(FALLBACK_HEIGHT),
            ))
        } else {
            None
        }
    }
}

impl FormatConverter for RasterTranscoder {
    fn tool(&self) -> Tool {
        self.tool
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::IsolateAndContinue
    }

    fn output_name(&self, input_name: &str) -> String {
        swap_extension(input_name, self.output_extension(input_name))
    }

    fn convert(&self, item: &InputItem) -> Result<Vec<u8>, ConversionError> {
        let img = decode(&item.name, &item.bytes)?;
        let (src_w, src_h) = (img.width(), img.height());

        let img = match self.resize_target() {
            Some(bounds) => fit(img, bounds, self.options.preserve_aspect),
            None => img,
        };
        debug!(
            "{}: {}x{} → {}x{}",
            base_name(&item.name),
            src_w,
            src_h,
            img.width(),
            img.height()
        );

        match self.output_extension(&item.name) {
            "png" => encode_png(&img),
            _ => encode_jpeg(&img, self.options.quality),
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}

/// Decode with the codec implied by the name, then by content sniffing.
pub fn decode(name: &str, bytes: &[u8]) -> Result<DynamicImage, ConversionError> {
    if let Ok(format) = ImageFormat::from_path(base_name(name)) {
        match image::load_from_memory_with_format(bytes, format) {
            Ok(img) => return Ok(img),
            Err(e) => warn!(
                "{}: {:?} decode failed ({}), retrying with content sniffing",
                base_name(name),
                format,
                e
            ),
        }
    }

    image::load_from_memory(bytes).map_err(|e| ConversionError::corrupt(format!("{}: {e}", base_name(name))))
}

/// Fit inside `bounds` without upscaling, or stretch to exactly `bounds`.
pub fn fit(img: DynamicImage, (width, height): (u32, u32), preserve_aspect: bool) -> DynamicImage {
    if preserve_aspect {
        if img.width() <= width && img.height() <= height {
            img
        } else {
            img.resize(width, height, FilterType::Lanczos3)
        }
    } else if img.width() == width && img.height() == height {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Encode as baseline JPEG at the given quality.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ConversionError> {
    let rgb = flatten_onto_white(img);
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(ConversionError::encode)?;
    Ok(buf)
}

/// Encode as PNG, keeping any alpha channel.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ConversionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(ConversionError::encode)?;
    Ok(buf)
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
