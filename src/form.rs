//! Decoding of request text fields into typed job options.
//!
//! Works on plain `name → value` pairs so the HTTP layer and the CLI share
//! one set of parsing rules. Empty values count as absent.

use crate::error::JobError;
use crate::model::{
    ConversionOptions, FormatFamily, PageMergeOptions, RasterOptions, SubtitleEdit,
    SubtitleOptions, TimeField, Tool,
};
use crate::pipeline::subtitle::entry_text;
use std::collections::HashMap;
use std::str::FromStr;

/// Field names recognised on a conversion request.
pub const KNOWN_FIELDS: &[&str] = &[
    "privileged",
    "tenant",
    "quality",
    "width",
    "height",
    "preserve_aspect",
    "order",
    "entry",
    "field",
    "shift_seconds",
    "set_time",
    "set_text",
];

/// Text fields of one request.
#[derive(Debug, Clone, Default)]
pub struct FormFields(HashMap<String, String>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field; later values replace earlier ones.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Trimmed non-empty value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, JobError>
    where
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| JobError::InvalidOptions(format!("{name}: '{v}': {e}")))
            })
            .transpose()
    }

    /// The trusted tier flag. Default: unprivileged.
    pub fn privileged(&self) -> Result<bool, JobError> {
        self.get("privileged")
            .map(|v| parse_flag("privileged", v))
            .transpose()
            .map(|v| v.unwrap_or(false))
    }

    /// Tenant id. Default: `anonymous`.
    pub fn tenant(&self) -> String {
        self.get("tenant").unwrap_or("anonymous").to_string()
    }

    /// Build the options for `tool` from the fields.
    pub fn options_for(&self, tool: Tool) -> Result<ConversionOptions, JobError> {
        Ok(match tool.family() {
            FormatFamily::Raster => ConversionOptions::Raster(self.raster()?),
            FormatFamily::Pages => ConversionOptions::PageMerge(PageMergeOptions {
                order: self.get("order").map(parse_order).transpose()?.unwrap_or_default(),
            }),
            FormatFamily::Subtitle => ConversionOptions::Subtitle(self.subtitle()?),
        })
    }

    fn raster(&self) -> Result<RasterOptions, JobError> {
        let defaults = RasterOptions::default();
        let quality = self.parse::<u8>("quality")?.unwrap_or(defaults.quality);
        if !(1..=100).contains(&quality) {
            return Err(JobError::InvalidOptions(format!(
                "quality must be between 1 and 100, got {quality}"
            )));
        }
        let target_width = self.parse::<u32>("width")?;
        let target_height = self.parse::<u32>("height")?;
        if target_width == Some(0) || target_height == Some(0) {
            return Err(JobError::InvalidOptions(
                "width and height must be at least 1".into(),
            ));
        }
        let preserve_aspect = self
            .get("preserve_aspect")
            .map(|v| parse_flag("preserve_aspect", v))
            .transpose()?
            .unwrap_or(defaults.preserve_aspect);
        Ok(RasterOptions {
            quality,
            target_width,
            target_height,
            preserve_aspect,
        })
    }

    fn subtitle(&self) -> Result<SubtitleOptions, JobError> {
        let entry = self.parse::<u32>("entry")?;
        let field = self.parse::<TimeField>("field")?.unwrap_or(TimeField::Start);

        let edits = ["shift_seconds", "set_time", "set_text"]
            .iter()
            .filter(|f| self.get(f).is_some())
            .count();
        if edits > 1 {
            return Err(JobError::InvalidOptions(
                "choose one of shift_seconds, set_time or set_text".into(),
            ));
        }

        // set_text keeps inner whitespace; only an empty value counts as absent.
        let edit = if let Some(text) = self.0.get("set_text").filter(|t| !t.trim().is_empty()) {
            SubtitleEdit::SetText(
                entry_text(text).map_err(|e| JobError::InvalidOptions(format!("set_text: {e}")))?,
            )
        } else if let Some(value) = self.parse("set_time")? {
            SubtitleEdit::SetTime { field, value }
        } else {
            SubtitleEdit::Shift {
                field,
                seconds: self.parse::<i64>("shift_seconds")?.unwrap_or(0),
            }
        };
        Ok(SubtitleOptions { entry, edit })
    }
}

impl FromIterator<(String, String)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `true|false|1|0|yes|no|on|off`, case-insensitive.
pub fn parse_flag(name: &str, value: &str) -> Result<bool, JobError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(JobError::InvalidOptions(format!(
            "{name}: expected true or false, got '{other}'"
        ))),
    }
}

/// Comma-separated 0-based indices; surrounding brackets are allowed.
pub fn parse_order(value: &str) -> Result<Vec<usize>, JobError> {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>().map_err(|_| {
                JobError::InvalidOptions(format!("order: '{s}' is not a 0-based page index"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_empty() {
        let f = FormFields::new();
        assert!(!f.privileged().unwrap());
        assert_eq!(f.tenant(), "anonymous");
        assert_eq!(
            f.options_for(Tool::WebpToJpg).unwrap(),
            ConversionOptions::Raster(RasterOptions::default())
        );
        assert_eq!(
            f.options_for(Tool::PdfMerge).unwrap(),
            ConversionOptions::PageMerge(PageMergeOptions::default())
        );
    }

    #[test]
    fn raster_fields() {
        let f = fields(&[
            ("quality", "70"),
            ("width", "320"),
            ("preserve_aspect", "false"),
            ("height", " "),
        ]);
        let ConversionOptions::Raster(opts) = f.options_for(Tool::ImageResize).unwrap() else {
            panic!("expected raster options");
        };
        assert_eq!(opts.quality, 70);
        assert_eq!(opts.target_width, Some(320));
        assert_eq!(opts.target_height, None);
        assert!(!opts.preserve_aspect);
    }

    #[test]
    fn raster_rejects_bad_values() {
        for bad in [("quality", "0"), ("quality", "101"), ("quality", "x"), ("width", "0")] {
            let err = fields(&[bad]).options_for(Tool::PngToJpg).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidOptions, "{bad:?}");
        }
    }

    #[test]
    fn order_parsing() {
        assert_eq!(parse_order("2,0,1").unwrap(), vec![2, 0, 1]);
        assert_eq!(parse_order("[ 1, 0 ]").unwrap(), vec![1, 0]);
        assert_eq!(parse_order("").unwrap(), Vec::<usize>::new());
        assert!(parse_order("1,-2").is_err());
    }

    #[test]
    fn subtitle_shift() {
        let f = fields(&[("entry", "3"), ("field", "END"), ("shift_seconds", "-5")]);
        assert_eq!(
            f.options_for(Tool::SubtitleEdit).unwrap(),
            ConversionOptions::Subtitle(SubtitleOptions {
                entry: Some(3),
                edit: SubtitleEdit::Shift {
                    field: TimeField::End,
                    seconds: -5
                },
            })
        );
    }

    #[test]
    fn subtitle_set_time_and_text() {
        let f = fields(&[("set_time", "00:01:02,003")]);
        let ConversionOptions::Subtitle(opts) = f.options_for(Tool::SubtitleEdit).unwrap() else {
            panic!("expected subtitle options");
        };
        assert!(matches!(opts.edit, SubtitleEdit::SetTime { field: TimeField::Start, .. }));

        let f = fields(&[("set_text", "  Hello  there ")]);
        let ConversionOptions::Subtitle(opts) = f.options_for(Tool::SubtitleEdit).unwrap() else {
            panic!("expected subtitle options");
        };
        assert_eq!(opts.edit, SubtitleEdit::SetText("  Hello  there ".into()));
    }

    #[test]
    fn subtitle_rejects_conflicting_edits_and_bad_time() {
        let f = fields(&[("set_text", "x"), ("shift_seconds", "1")]);
        assert!(f.options_for(Tool::SubtitleEdit).is_err());
        let f = fields(&[("set_time", "1:2:3")]);
        assert!(f.options_for(Tool::SubtitleEdit).is_err());
        let f = fields(&[("field", "middle")]);
        assert!(f.options_for(Tool::SubtitleEdit).is_err());
    }

    #[test]
    fn subtitle_text_with_blank_line_is_invalid() {
        let err = fields(&[("set_text", "one\n\ntwo")])
            .options_for(Tool::SubtitleEdit)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOptions);
        assert!(err.to_string().contains("set_text"));
    }

    #[test]
    fn privileged_flag_values() {
        assert!(fields(&[("privileged", "TRUE")]).privileged().unwrap());
        assert!(fields(&[("privileged", "1")]).privileged().unwrap());
        assert!(!fields(&[("privileged", "off")]).privileged().unwrap());
        assert!(fields(&[("privileged", "maybe")]).privileged().is_err());
    }
}
