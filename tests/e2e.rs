//! End-to-end tests for edgequake-convert.
//!
//! Every fixture is generated in memory (PNG/JPEG via `image`, PDFs via
//! `lopdf`), so these run offline and need no files on disk.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use edgequake_convert::pipeline::pages::PageMerger;
use edgequake_convert::{
    ConversionError, ConversionOptions, ErrorKind, FailurePolicy, FixedAllowance,
    FormatConverter, InputItem, JobError, JobRequest, JobState, Orchestrator, PageMergeOptions,
    RasterOptions, ServiceConfig, SubtitleEdit, SubtitleOptions, TimeField, Tool,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use lopdf::{dictionary, Document, Object};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// A PDF whose pages are tagged by MediaBox width, so order is observable.
fn pdf_with_widths(widths: &[i64]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = widths
        .iter()
        .map(|&w| {
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(w),
                    Object::Integer(792),
                ]),
            }))
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => widths.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn page_widths(bytes: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            let page = doc.get_object(id).unwrap().as_dict().unwrap();
            page.get(b"MediaBox").unwrap().as_array().unwrap()[2]
                .as_i64()
                .unwrap()
        })
        .collect()
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(ServiceConfig::default())
}

/// Delegates to an inner strategy, counting `convert` calls.
struct Counting {
    inner: Arc<dyn FormatConverter>,
    calls: Arc<AtomicUsize>,
}

impl Counting {
    fn wrap(inner: Arc<dyn FormatConverter>) -> (Arc<dyn FormatConverter>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let spy = Arc::new(Self {
            inner,
            calls: calls.clone(),
        });
        (spy, calls)
    }
}

impl FormatConverter for Counting {
    fn tool(&self) -> Tool {
        self.inner.tool()
    }
    fn failure_policy(&self) -> FailurePolicy {
        self.inner.failure_policy()
    }
    fn output_name(&self, input_name: &str) -> String {
        self.inner.output_name(input_name)
    }
    fn convert(&self, item: &InputItem) -> Result<Vec<u8>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.convert(item)
    }
    fn assemble(
        &self,
        converted: Vec<edgequake_convert::model::Converted>,
    ) -> Result<Vec<edgequake_convert::model::Converted>, ConversionError> {
        self.inner.assemble(converted)
    }
}

// ── Raster ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_photos_become_a_zip_of_decodable_jpegs() {
    let items = vec![
        InputItem::new("holiday/beach.png", image_bytes(64, 48, ImageFormat::Png)),
        InputItem::new("sunset.png", image_bytes(32, 32, ImageFormat::Png)),
    ];
    let output = orchestrator()
        .run(JobRequest::new(Tool::PngToJpg, items))
        .await
        .unwrap();

    assert!(output.artifact.bundled);
    assert_eq!(output.artifact.file_name, "converted-png-to-jpg.zip");
    assert_eq!(output.report.succeeded, 2);
    assert_eq!(output.report.failed, 0);
    assert_eq!(output.report.states.last(), Some(&JobState::Complete));

    let mut zip = zip::ZipArchive::new(Cursor::new(output.artifact.bytes)).unwrap();
    assert_eq!(zip.len(), 2);
    for (i, expected) in ["beach.jpg", "sunset.jpg"].iter().enumerate() {
        let mut entry = zip.by_index(i).unwrap();
        assert_eq!(entry.name(), *expected);
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        let img = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap();
        assert!(img.width() > 0);
    }
}

#[tokio::test]
async fn png_named_webp_is_recovered_by_sniffing() {
    let items = vec![InputItem::new(
        "mislabelled.webp",
        image_bytes(20, 10, ImageFormat::Png),
    )];
    let output = orchestrator()
        .run(JobRequest::new(Tool::WebpToJpg, items))
        .await
        .unwrap();

    assert!(!output.artifact.bundled);
    assert_eq!(output.artifact.file_name, "mislabelled.jpg");
    assert_eq!(output.artifact.content_type, "image/jpeg");
    let img = image::load_from_memory(&output.artifact.bytes).unwrap();
    assert_eq!((img.width(), img.height()), (20, 10));
}

#[tokio::test]
async fn resize_fits_without_upscaling() {
    let items = vec![
        InputItem::new("big.png", image_bytes(400, 200, ImageFormat::Png)),
        InputItem::new("small.jpg", image_bytes(50, 40, ImageFormat::Jpeg)),
    ];
    let request = JobRequest::new(Tool::ImageResize, items).with_options(
        ConversionOptions::Raster(RasterOptions {
            target_width: Some(100),
            target_height: Some(100),
            ..RasterOptions::default()
        }),
    );
    let output = orchestrator().run(request).await.unwrap();

    let mut zip = zip::ZipArchive::new(Cursor::new(output.artifact.bytes)).unwrap();
    let mut dims = Vec::new();
    for name in ["big.png", "small.jpg"] {
        let mut bytes = Vec::new();
        zip.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        dims.push((img.width(), img.height()));
    }
    assert_eq!(dims, vec![(100, 50), (50, 40)]);
}

#[tokio::test]
async fn corrupt_photo_is_isolated() {
    let items = vec![
        InputItem::new("ok.png", image_bytes(8, 8, ImageFormat::Png)),
        InputItem::new("broken.png", b"definitely not a png".to_vec()),
        InputItem::new("also-ok.png", image_bytes(8, 8, ImageFormat::Png)),
    ];
    let output = orchestrator()
        .run(JobRequest::new(Tool::PngToJpg, items))
        .await
        .unwrap();

    assert_eq!(output.report.succeeded, 2);
    assert_eq!(output.report.failed, 1);
    let failure = output.report.items[1].error.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::UnsupportedOrCorrupt);

    let zip = zip::ZipArchive::new(Cursor::new(output.artifact.bytes)).unwrap();
    let names: Vec<&str> = zip.file_names().collect();
    assert_eq!(names.len(), 2);
    assert!(!names.contains(&"broken.jpg"));
}

// ── Validation and tiers ─────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_upload_is_rejected_before_conversion() {
    let items = vec![
        InputItem::new("small.png", image_bytes(4, 4, ImageFormat::Png)),
        InputItem::new("huge.png", vec![0u8; 40 * MIB]),
    ];
    let orchestrator = orchestrator();
    let (spy, calls) = Counting::wrap(
        edgequake_convert::pipeline::converter_for(
            Tool::PngToJpg,
            &ConversionOptions::defaults_for(Tool::PngToJpg),
        )
        .unwrap(),
    );

    let err = orchestrator
        .run_with_converter(JobRequest::new(Tool::PngToJpg, items), spy)
        .await
        .unwrap_err();

    match &err {
        JobError::ItemTooLarge { name, size, .. } => {
            assert_eq!(name, "huge.png");
            assert_eq!(*size, (40 * MIB) as u64);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind().http_status(), 413);
    assert!(err.kind().is_quota());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn privileged_tier_accepts_the_same_upload() {
    let items = vec![InputItem::new("big.png", image_bytes(4, 4, ImageFormat::Png))
        .with_declared_size((40 * MIB) as u64)];
    let output = orchestrator()
        .run(JobRequest::new(Tool::PngToJpg, items).privileged(true))
        .await
        .unwrap();
    assert_eq!(output.artifact.file_name, "big.jpg");
}

#[tokio::test]
async fn exhausted_quota_is_refused() {
    let orchestrator = orchestrator().with_usage_counter(Arc::new(FixedAllowance::new(0)));
    let items = vec![InputItem::new("a.png", image_bytes(4, 4, ImageFormat::Png))];
    let (spy, calls) = Counting::wrap(
        edgequake_convert::pipeline::converter_for(
            Tool::PngToJpg,
            &ConversionOptions::defaults_for(Tool::PngToJpg),
        )
        .unwrap(),
    );
    let err = orchestrator
        .run_with_converter(JobRequest::new(Tool::PngToJpg, items).tenant("acme"), spy)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(err.kind().http_status(), 403);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── Page merge ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_honours_requested_order() {
    let items = vec![
        InputItem::new("a.pdf", pdf_with_widths(&[100, 101])),
        InputItem::new("b.pdf", pdf_with_widths(&[200])),
        InputItem::new("c.pdf", pdf_with_widths(&[300, 301])),
    ];
    let request = JobRequest::new(Tool::PdfMerge, items).with_options(
        ConversionOptions::PageMerge(PageMergeOptions {
            order: vec![2, 0, 1],
        }),
    );
    let output = orchestrator().run(request).await.unwrap();

    assert!(!output.artifact.bundled);
    assert_eq!(output.artifact.file_name, "merged.pdf");
    assert_eq!(output.artifact.content_type, "application/pdf");
    assert_eq!(
        page_widths(&output.artifact.bytes),
        vec![300, 301, 100, 101, 200]
    );
}

#[tokio::test]
async fn merge_aborts_on_first_corrupt_file() {
    let items = vec![
        InputItem::new("one.pdf", pdf_with_widths(&[100])),
        InputItem::new("two.pdf", b"GIF89a not a pdf".to_vec()),
        InputItem::new("three.pdf", pdf_with_widths(&[300])),
    ];
    let (spy, calls) =
        Counting::wrap(Arc::new(PageMerger::new(PageMergeOptions::default())));

    let result = orchestrator()
        .run_with_converter(JobRequest::new(Tool::PdfMerge, items), spy)
        .await;

    let Err(err) = result else {
        panic!("a partial merge must not produce an artifact");
    };
    match &err {
        JobError::ConversionFailed { name, .. } => assert_eq!(name, "two.pdf"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::UnsupportedOrCorrupt);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
#[tokio::test]
async fn merge_names_the_source_with_a_corrupt_body() {
    let items = vec![
        InputItem::new("a.pdf", pdf_with_widths(&[100])),
        InputItem::new("b.pdf", b"%PDF-1.5 garbage garbage".to_vec()),
        InputItem::new("c.pdf", pdf_with_widths(&[300])),
    ];
    let (spy, calls) =
        Counting::wrap(Arc::new(PageMerger::new(PageMergeOptions::default())));

    let err = orchestrator()
        .run_with_converter(JobRequest::new(Tool::PdfMerge, items), spy)
        .await
        .unwrap_err();

    assert_eq!(err.offending_item(), Some("b.pdf"));
    assert_eq!(err.kind(), ErrorKind::UnsupportedOrCorrupt);
    assert!(!err.to_string().contains("merged.pdf"), "{err}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn merge_fails_on_unreadable_file_left_out_of_order() {
    let items = vec![
        InputItem::new("a.pdf", pdf_with_widths(&[100])),
        InputItem::new("b.pdf", b"%PDF-1.5 garbage".to_vec()),
    ];
    let request = JobRequest::new(Tool::PdfMerge, items)
        .with_options(ConversionOptions::PageMerge(PageMergeOptions { order: vec![0] }));

    let err = orchestrator().run(request).await.unwrap_err();
    assert_eq!(err.offending_item(), Some("b.pdf"));
}

// ── Subtitles ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn subtitle_text_with_blank_line_leaves_no_artifact() {
    let srt = "1\n00:00:01,000 --> 00:00:02,000\nHi\n\n2\n00:00:03,000 --> 00:00:04,000\nYo\n";
    let request = JobRequest::new(
        Tool::SubtitleEdit,
        vec![InputItem::new("a.srt", srt.as_bytes().to_vec())],
    )
    .with_options(ConversionOptions::Subtitle(SubtitleOptions {
        entry: Some(1),
        edit: SubtitleEdit::SetText("a\n\nb".into()),
    }));

    let err = orchestrator().run(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOptions);
}

#[tokio::test]
async fn subtitle_shift_saturates_at_zero() {
    let srt = "1\r\n00:00:01,500 --> 00:00:03,000\r\nHello\r\n\r\n\
               2\r\n00:00:10,000 --> 00:00:12,250\r\nWorld\r\n";
    let request = JobRequest::new(
        Tool::SubtitleEdit,
        vec![InputItem::new("movie.srt", srt.as_bytes().to_vec())],
    )
    .with_options(ConversionOptions::Subtitle(SubtitleOptions {
        entry: None,
        edit: SubtitleEdit::Shift {
            field: TimeField::Start,
            seconds: -5,
        },
    }));
    let output = orchestrator().run(request).await.unwrap();

    assert_eq!(output.artifact.file_name, "movie.srt");
    let text = String::from_utf8(output.artifact.bytes).unwrap();
    assert!(text.contains("00:00:00,500 --> 00:00:03,000"), "{text}");
    assert!(text.contains("00:00:05,000 --> 00:00:12,250"), "{text}");
    assert!(text.contains("Hello"));
}
