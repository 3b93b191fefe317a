//! Time-coded text edit for SubRip (`.srt`) files.
//!
//! A file is a sequence of blank-line separated blocks:
//!
//! ```text
//! 1
//! 00:00:01,000 --> 00:00:03,500
//! First line
//! second line
//! ```
//!
//! Entries are re-emitted in their original order with their original ids.
//! Nothing is renumbered or re-sorted, even when an edit moves an entry past
//! its neighbour.

use super::{swap_extension, FormatConverter};
use crate::error::ConversionError;
use crate::model::{base_name, InputItem, SubtitleEdit, SubtitleOptions, TimeField, Tool};
use crate::policy::FailurePolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3})$").expect("valid regex"));

/// Largest representable whole-second value: `99:59:59`.
const MAX_WHOLE_SECS: i64 = 99 * 3600 + 59 * 60 + 59;

// ── Timestamp ────────────────────────────────────────────────────────────

/// An `HH:MM:SS,mmm` timestamp.
///
/// Stored as whole seconds plus milliseconds so that a shift by whole seconds
/// never touches the millisecond part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp {
    whole_secs: u32,
    millis: u16,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        whole_secs: 0,
        millis: 0,
    };

    /// Build from components; `None` when a component is out of range.
    pub fn new(hours: u32, minutes: u32, seconds: u32, millis: u32) -> Option<Self> {
        if hours > 99 || minutes > 59 || seconds > 59 || millis > 999 {
            return None;
        }
        Some(Self {
            whole_secs: hours * 3600 + minutes * 60 + seconds,
            millis: millis as u16,
        })
    }

    pub fn hours(self) -> u32 {
        self.whole_secs / 3600
    }

    pub fn minutes(self) -> u32 {
        (self.whole_secs / 60) % 60
    }

    pub fn seconds(self) -> u32 {
        self.whole_secs % 60
    }

    pub fn millis(self) -> u32 {
        u32::from(self.millis)
    }

    /// Total milliseconds since zero.
    pub fn as_millis(self) -> u64 {
        u64::from(self.whole_secs) * 1000 + u64::from(self.millis)
    }

    /// Add whole seconds, saturating at `00:00:00,<ms>` and `99:59:59,<ms>`.
    ///
    /// The millisecond part is never altered: `00:00:00,500` shifted by `-5`
    /// stays `00:00:00,500`.
    pub fn shift(self, seconds: i64) -> Self {
        let shifted = i64::from(self.whole_secs)
            .saturating_add(seconds)
            .clamp(0, MAX_WHOLE_SECS);
        Self {
            whole_secs: shifted as u32,
            millis: self.millis,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02},{:03}",
            self.hours(),
            self.minutes(),
            self.seconds(),
            self.millis
        )
    }
}

impl FromStr for Timestamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = TIMESTAMP_RE
            .captures(s.trim())
            .ok_or_else(|| format!("'{s}' is not an HH:MM:SS,mmm timestamp"))?;
        // The regex guarantees fixed-width digits, so these parses cannot fail.
        let part = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
        Timestamp::new(part(1), part(2), part(3), part(4))
            .ok_or_else(|| format!("'{s}' has minutes or seconds above 59"))
    }
}

impl TryFrom<String> for Timestamp {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

// ── Entries ──────────────────────────────────────────────────────────────

/// One subtitle block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    pub index: u32,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Text lines joined with `\n`; may be empty.
    pub text: String,
}

impl SubtitleEntry {
    fn time_mut(&mut self, field: TimeField) -> &mut Timestamp {
        match field {
            TimeField::Start => &mut self.start,
            TimeField::End => &mut self.end,
        }
    }

    fn apply(&mut self, edit: &SubtitleEdit) {
        match edit {
            SubtitleEdit::Shift { field, seconds } => {
                let ts = self.time_mut(*field);
                *ts = ts.shift(*seconds);
            }
            SubtitleEdit::SetTime { field, value } => *self.time_mut(*field) = *value,
            SubtitleEdit::SetText(text) => self.text = text.clone(),
        }
    }
}

/// Parse SRT text into entries.
///
/// Tolerates a UTF-8 byte-order mark, CRLF line endings, extra blank lines
/// between blocks and trailing cue settings after the end timestamp.
pub fn parse(input: &str) -> Result<Vec<SubtitleEntry>, ConversionError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut lines = input
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .peekable();
    let mut entries = Vec::new();

    loop {
        // Skip separators.
        while lines.next_if(|(_, l)| l.trim().is_empty()).is_some() {}
        let Some((line_no, index_line)) = lines.next() else {
            break;
        };

        let index = index_line
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(line_no, format!("expected entry id, found '{index_line}'")))?;

        let (timing_no, timing) = lines
            .next()
            .ok_or_else(|| malformed(line_no + 1, "missing timing line"))?;
        let (start, end) = parse_timing(timing).map_err(|detail| malformed(timing_no, detail))?;

        let mut text_lines = Vec::new();
        while let Some((_, l)) = lines.next_if(|(_, l)| !l.trim().is_empty()) {
            text_lines.push(l);
        }

        entries.push(SubtitleEntry {
            index,
            start,
            end,
            text: text_lines.join("\n"),
        });
    }

    if entries.is_empty() {
        return Err(malformed(1, "no subtitle entries"));
    }
    Ok(entries)
}

fn parse_timing(line: &str) -> Result<(Timestamp, Timestamp), String> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| format!("expected 'start --> end', found '{line}'"))?;
    // Anything after the end timestamp is a cue setting and is dropped.
    let end = rest.split_whitespace().next().unwrap_or("");
    Ok((start.trim().parse()?, end.parse()?))
}

fn malformed(line: usize, detail: impl Into<String>) -> ConversionError {
    ConversionError::MalformedSubtitle {
        line,
        detail: detail.into(),
    }
}

/// Serialise entries as `index\nstart --> end\ntext\n\n`.
pub fn serialize(entries: &[SubtitleEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&format!("{}\n{} --> {}\n{}\n\n", e.index, e.start, e.end, e.text));
    }
    out
}

/// Normalise replacement text: CRLF becomes LF, outer line breaks are dropped
/// and whitespace-only text clears the entry.
///
/// A blank line inside the text would end the block early, so it is refused.
pub fn entry_text(text: &str) -> Result<String, ConversionError> {
    let text = text.replace("\r\n", "\n");
    let text = text.trim_matches(|c| c == '\n' || c == '\r');
    if text.trim().is_empty() {
        return Ok(String::new());
    }
    if text.lines().any(|l| l.trim().is_empty()) {
        return Err(ConversionError::InvalidOptions(
            "replacement text must not contain blank lines".into(),
        ));
    }
    Ok(text.to_string())
}

/// Apply `options.edit` to the selected entry, or to all entries.
pub fn apply_edit(
    entries: &mut [SubtitleEntry],
    options: &SubtitleOptions,
) -> Result<usize, ConversionError> {
    let edit = match &options.edit {
        SubtitleEdit::SetText(text) => SubtitleEdit::SetText(entry_text(text)?),
        other => other.clone(),
    };
    let mut touched = 0;
    for entry in entries
        .iter_mut()
        .filter(|e| options.entry.is_none_or(|id| e.index == id))
    {
        entry.apply(&edit);
        touched += 1;
    }
    match options.entry {
        Some(index) if touched == 0 => Err(ConversionError::EntryNotFound { index }),
        _ => Ok(touched),
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

/// Subtitle edit strategy.
#[derive(Debug, Clone)]
pub struct SubtitleEditor {
    options: SubtitleOptions,
}

impl SubtitleEditor {
    pub fn new(options: SubtitleOptions) -> Self {
        Self { options }
    }
}

impl FormatConverter for SubtitleEditor {
    fn tool(&self) -> Tool {
        Tool::SubtitleEdit
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::IsolateAndContinue
    }

    fn output_name(&self, input_name: &str) -> String {
        swap_extension(input_name, "srt")
    }

    fn convert(&self, item: &InputItem) -> Result<Vec<u8>, ConversionError> {
        let text = std::str::from_utf8(&item.bytes).map_err(|e| {
            ConversionError::corrupt(format!("{} is not UTF-8 text: {e}", base_name(&item.name)))
        })?;
        let mut entries = parse(text)?;
        let touched = apply_edit(&mut entries, &self.options)?;
        debug!(
            "{}: edited {} of {} entries",
            base_name(&item.name),
            touched,
            entries.len()
        );
        Ok(serialize(&entries).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:00,500 --> 00:00:02,000\nHello\n\n\
                          2\n00:00:03,000 --> 00:00:05,250\nTwo\nlines\n\n";

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn edit(entry: Option<u32>, edit: SubtitleEdit) -> SubtitleOptions {
        SubtitleOptions { entry, edit }
    }

    #[test]
    fn timestamp_parse_and_display() {
        let t = ts("01:02:03,045");
        assert_eq!((t.hours(), t.minutes(), t.seconds(), t.millis()), (1, 2, 3, 45));
        assert_eq!(t.to_string(), "01:02:03,045");
        assert_eq!(t.as_millis(), 3_723_045);
    }

    #[test]
    fn timestamp_rejects_bad_grammar() {
        assert!("1:02:03,045".parse::<Timestamp>().is_err());
        assert!("01:02:03.045".parse::<Timestamp>().is_err());
        assert!("01:60:03,045".parse::<Timestamp>().is_err());
        assert!("01:02:61,045".parse::<Timestamp>().is_err());
    }

    #[test]
    fn negative_shift_saturates_keeping_millis() {
        assert_eq!(ts("00:00:00,500").shift(-5), ts("00:00:00,500"));
        assert_eq!(ts("00:00:03,250").shift(-5), ts("00:00:00,250"));
        assert_eq!(ts("00:00:07,250").shift(-5), ts("00:00:02,250"));
    }

    #[test]
    fn positive_shift_saturates_at_max() {
        assert_eq!(ts("99:59:58,100").shift(10), ts("99:59:59,100"));
        assert_eq!(ts("00:59:30,000").shift(45), ts("01:00:15,000"));
        assert_eq!(ts("00:00:01,000").shift(i64::MAX), ts("99:59:59,000"));
    }

    #[test]
    fn timestamp_serde_is_string() {
        let json = serde_json::to_string(&ts("00:01:02,003")).unwrap();
        assert_eq!(json, "\"00:01:02,003\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts("00:01:02,003"));
        assert!(serde_json::from_str::<Timestamp>("\"nope\"").is_err());
    }

    #[test]
    fn parse_sample() {
        let entries = parse(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].end, ts("00:00:05,250"));
        assert_eq!(entries[1].text, "Two\nlines");
    }

    #[test]
    fn parse_tolerates_bom_crlf_and_extra_blank_lines() {
        let input = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nHi\r\n\r\n\r\n\r\n\
                     7\r\n00:00:03,000 --> 00:00:04,000 X1:10 X2:20\r\nThere\r\n";
        let entries = parse(input).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "Hi");
        assert_eq!(entries[1].index, 7);
        assert_eq!(entries[1].end, ts("00:00:04,000"));
    }

    #[test]
    fn parse_reports_line_of_bad_block() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\nok\n\n2\n00:00:01 --> 00:00:02,000\nbad\n";
        match parse(input).unwrap_err() {
            ConversionError::MalformedSubtitle { line, .. } => assert_eq!(line, 6),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse("").is_err());
        assert!(parse("abc\n00:00:01,000 --> 00:00:02,000\n").is_err());
    }

    #[test]
    fn serialize_preserves_ids_and_order() {
        let mut entries = parse(SAMPLE).unwrap();
        entries.swap(0, 1);
        let out = serialize(&entries);
        assert!(out.starts_with("2\n00:00:03,000 --> 00:00:05,250\nTwo\nlines\n\n1\n"));
        assert_eq!(serialize(&parse(SAMPLE).unwrap()), SAMPLE);
    }

    #[test]
    fn shift_one_entry() {
        let mut entries = parse(SAMPLE).unwrap();
        let opts = edit(
            Some(1),
            SubtitleEdit::Shift {
                field: TimeField::Start,
                seconds: -5,
            },
        );
        assert_eq!(apply_edit(&mut entries, &opts).unwrap(), 1);
        assert_eq!(entries[0].start, ts("00:00:00,500"));
        assert_eq!(entries[1].start, ts("00:00:03,000"));
    }

    #[test]
    fn shift_all_entries_end_field() {
        let mut entries = parse(SAMPLE).unwrap();
        let opts = edit(
            None,
            SubtitleEdit::Shift {
                field: TimeField::End,
                seconds: 2,
            },
        );
        assert_eq!(apply_edit(&mut entries, &opts).unwrap(), 2);
        assert_eq!(entries[0].end, ts("00:00:04,000"));
        assert_eq!(entries[1].end, ts("00:00:07,250"));
    }

    #[test]
    fn set_time_and_text() {
        let mut entries = parse(SAMPLE).unwrap();
        apply_edit(
            &mut entries,
            &edit(
                Some(2),
                SubtitleEdit::SetTime {
                    field: TimeField::End,
                    value: ts("00:00:09,999"),
                },
            ),
        )
        .unwrap();
        apply_edit(&mut entries, &edit(Some(2), SubtitleEdit::SetText("New".into()))).unwrap();
        assert_eq!(entries[1].end, ts("00:00:09,999"));
        assert_eq!(entries[1].text, "New");
        assert_eq!(entries[0].text, "Hello");
    }

    #[test]
    fn multi_line_text_survives_a_reparse() {
        let mut entries = parse(SAMPLE).unwrap();
        apply_edit(
            &mut entries,
            &edit(Some(1), SubtitleEdit::SetText("first\r\nsecond\n".into())),
        )
        .unwrap();
        let reparsed = parse(&serialize(&entries)).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[0].text, "first\nsecond");
        assert_eq!(reparsed[1].index, 2);
    }

    #[test]
    fn text_with_blank_line_is_refused() {
        let mut entries = parse(SAMPLE).unwrap();
        for text in ["a\n\nb", "a\r\n  \r\nb"] {
            let err = apply_edit(&mut entries, &edit(Some(1), SubtitleEdit::SetText(text.into())))
                .unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOptions, "{text:?}");
        }
        assert_eq!(entries[0].text, "Hello");
        assert!(parse(&serialize(&entries)).is_ok());
    }

    #[test]
    fn editor_refuses_blank_line_text_without_output() {
        let editor = SubtitleEditor::new(edit(None, SubtitleEdit::SetText("a\n\nb".into())));
        let err = editor
            .convert(&InputItem::new("movie.srt", SAMPLE.as_bytes().to_vec()))
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidOptions(_)));
    }

    #[test]
    fn unknown_entry_is_an_error() {
        let mut entries = parse(SAMPLE).unwrap();
        let err = apply_edit(&mut entries, &edit(Some(9), SubtitleEdit::SetText("x".into())))
            .unwrap_err();
        assert_eq!(err, ConversionError::EntryNotFound { index: 9 });
    }

    #[test]
    fn editor_converts_item() {
        let editor = SubtitleEditor::new(edit(
            Some(1),
            SubtitleEdit::Shift {
                field: TimeField::Start,
                seconds: -5,
            },
        ));
        let out = editor
            .convert(&InputItem::new("movie.srt", SAMPLE.as_bytes().to_vec()))
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("1\n00:00:00,500 --> 00:00:02,000\nHello\n\n"));
        assert_eq!(editor.output_name("dir/movie.SRT"), "movie.srt");
        assert_eq!(editor.failure_policy(), FailurePolicy::IsolateAndContinue);
    }

    #[test]
    fn editor_rejects_binary() {
        let editor = SubtitleEditor::new(SubtitleOptions::default());
        let err = editor
            .convert(&InputItem::new("x.srt", vec![0xff, 0xfe, 0x00]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedOrCorrupt);
    }
}
