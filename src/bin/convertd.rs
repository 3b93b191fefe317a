//! CLI binary for edgequake-convert.
//!
//! `convertd serve` runs the HTTP service; `convertd run` performs one job
//! on local files. Both are thin shims that map flags onto `ServiceConfig`
//! and a `JobRequest`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_convert::{
    write_artifact, FormFields, InputItem, JobProgressCallback, JobRequest, JobState,
    Orchestrator, ProgressCallback, ServiceConfig, TierLimits, Tool,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the job validates, then a
/// bar with one log line per item.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-item wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Checking limits…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_state_change(&self, _from: &JobState, to: &JobState) {
        match to {
            JobState::Converting => self.activate_bar(),
            JobState::Packaging => {
                self.bar.set_prefix("Packaging");
                self.bar.set_message("");
            }
            JobState::Complete | JobState::Failed(_) => self.bar.finish_and_clear(),
            _ => {}
        }
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&format!("{output_len:>9} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, total: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        if failed > 0 {
            self.bar.println(format!(
                "{} {}/{} files converted  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            ));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service
  convertd serve --bind 127.0.0.1:8080

  # Convert two photos to JPEG (bundled as converted-webp-to-jpg.zip)
  convertd run webp-to-jpg a.webp b.webp

  # Resize, keeping aspect ratio, into a chosen file
  convertd run image-resize --width 640 --height 480 photo.png -o small.png

  # Merge PDFs, third file first
  convertd run pdf-merge --order 2,0,1 a.pdf b.pdf c.pdf

  # Shift every subtitle start 2 seconds earlier
  convertd run srt-edit --field start --shift-seconds -2 movie.srt

TOOLS:
  webp-to-jpg  png-to-jpg  jpg-to-png  image-to-jpg  image-resize
  pdf-merge    srt-edit

ENVIRONMENT VARIABLES:
  Every flag has a CONVERTD_* counterpart, e.g. CONVERTD_BIND,
  CONVERTD_QUALITY, CONVERTD_STANDARD_MAX_ITEMS. RUST_LOG overrides the
  log filter.
"#;

/// Batch file conversion service and CLI.
#[derive(Parser, Debug)]
#[command(
    name = "convertd",
    version,
    about = "Batch file conversion: raster transcode, PDF merge, subtitle edit",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CONVERTD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CONVERTD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP conversion service.
    Serve(ServeArgs),
    /// Convert local files once and write the result.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "CONVERTD_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Seconds before an in-flight job is discarded.
    #[arg(long, env = "CONVERTD_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    #[command(flatten)]
    engine: EngineArgs,
}

/// Limits and concurrency shared by both subcommands.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Raster items converted at once within a job (1–64).
    #[arg(long, env = "CONVERTD_RASTER_CONCURRENCY", default_value_t = 1)]
    raster_concurrency: usize,

    /// Unprivileged: max files per job.
    #[arg(long, env = "CONVERTD_STANDARD_MAX_ITEMS", default_value_t = TierLimits::STANDARD.max_items)]
    standard_max_items: usize,

    /// Unprivileged: max MiB per file.
    #[arg(long, env = "CONVERTD_STANDARD_MAX_ITEM_MB", default_value_t = TierLimits::STANDARD.max_item_bytes / MIB)]
    standard_max_item_mb: u64,

    /// Unprivileged: max MiB per job.
    #[arg(long, env = "CONVERTD_STANDARD_MAX_TOTAL_MB", default_value_t = TierLimits::STANDARD.max_total_bytes / MIB)]
    standard_max_total_mb: u64,

    /// Privileged: max files per job.
    #[arg(long, env = "CONVERTD_PRIVILEGED_MAX_ITEMS", default_value_t = TierLimits::PRIVILEGED.max_items)]
    privileged_max_items: usize,

    /// Privileged: max MiB per file.
    #[arg(long, env = "CONVERTD_PRIVILEGED_MAX_ITEM_MB", default_value_t = TierLimits::PRIVILEGED.max_item_bytes / MIB)]
    privileged_max_item_mb: u64,

    /// Privileged: max MiB per job.
    #[arg(long, env = "CONVERTD_PRIVILEGED_MAX_TOTAL_MB", default_value_t = TierLimits::PRIVILEGED.max_total_bytes / MIB)]
    privileged_max_total_mb: u64,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Conversion tool, e.g. png-to-jpg or pdf-merge.
    #[arg(value_parser = parse_tool)]
    tool: Tool,

    /// Input files, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output path. Default: the artifact's own name in the current directory.
    #[arg(short, long, env = "CONVERTD_OUTPUT")]
    output: Option<PathBuf>,

    /// JPEG quality (1–100).
    #[arg(long, env = "CONVERTD_QUALITY")]
    quality: Option<u8>,

    /// Resize target width.
    #[arg(long, env = "CONVERTD_WIDTH")]
    width: Option<u32>,

    /// Resize target height.
    #[arg(long, env = "CONVERTD_HEIGHT")]
    height: Option<u32>,

    /// Stretch to exactly width×height instead of fitting inside.
    #[arg(long, env = "CONVERTD_EXACT")]
    exact: bool,

    /// PDF merge order: comma-separated 0-based file indices.
    #[arg(long, env = "CONVERTD_ORDER")]
    order: Option<String>,

    /// Subtitle entry id to edit. Default: every entry.
    #[arg(long, env = "CONVERTD_ENTRY")]
    entry: Option<u32>,

    /// Subtitle timestamp to edit: start or end.
    #[arg(long, env = "CONVERTD_FIELD")]
    field: Option<String>,

    /// Shift the timestamp by whole seconds (negative moves earlier).
    #[arg(long, env = "CONVERTD_SHIFT_SECONDS", allow_hyphen_values = true)]
    shift_seconds: Option<i64>,

    /// Replace the timestamp with HH:MM:SS,mmm.
    #[arg(long, env = "CONVERTD_SET_TIME")]
    set_time: Option<String>,

    /// Replace the entry text.
    #[arg(long, env = "CONVERTD_SET_TEXT")]
    set_text: Option<String>,

    /// Apply privileged-tier limits.
    #[arg(long, env = "CONVERTD_PRIVILEGED")]
    privileged: bool,

    /// Print the job report as JSON on stdout.
    #[arg(long, env = "CONVERTD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CONVERTD_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    engine: EngineArgs,
}

fn parse_tool(s: &str) -> std::result::Result<Tool, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = match &cli.command {
        Command::Run(run) => !cli.quiet && !run.no_progress && !run.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run(args, cli.quiet, show_progress).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = engine_config(&args.engine)
        .bind_addr(args.bind)
        .request_timeout_secs(args.timeout)
        .build()
        .context("Invalid configuration")?;
    tracing::info!(?config, "Starting conversion service");
    edgequake_convert::serve(Orchestrator::new(config))
        .await
        .context("Server failed")
}

async fn run(args: RunArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let mut items = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        items.push(InputItem::new(path.to_string_lossy(), bytes));
    }

    let fields = run_fields(&args);
    let options = fields
        .options_for(args.tool)
        .context("Invalid conversion options")?;

    let mut builder = engine_config(&args.engine);
    if show_progress {
        let cb = CliProgressCallback::new(items.len());
        builder = builder.progress_callback(cb as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    let request = JobRequest::new(args.tool, items)
        .with_options(options)
        .privileged(args.privileged)
        .tenant("cli");
    let output = Orchestrator::new(config)
        .run(request)
        .await
        .context("Conversion failed")?;

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&output.artifact.file_name));
    write_artifact(&output.artifact, &path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&output.report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !quiet {
        let report = &output.report;
        eprintln!(
            "{}  {}/{} files  {}ms  →  {} {}",
            if report.failed == 0 { green("✔") } else { cyan("⚠") },
            report.succeeded,
            report.item_count,
            report.processing_time_ms,
            bold(&path.display().to_string()),
            dim(&format!("({} bytes)", report.total_output_bytes)),
        );
    }

    Ok(())
}

/// Map flags to the same text fields the HTTP form uses.
fn run_fields(args: &RunArgs) -> FormFields {
    let mut fields = FormFields::new();
    let mut put = |name: &str, value: Option<String>| {
        if let Some(v) = value {
            fields.insert(name, v);
        }
    };
    put("quality", args.quality.map(|v| v.to_string()));
    put("width", args.width.map(|v| v.to_string()));
    put("height", args.height.map(|v| v.to_string()));
    put("preserve_aspect", Some((!args.exact).to_string()));
    put("order", args.order.clone());
    put("entry", args.entry.map(|v| v.to_string()));
    put("field", args.field.clone());
    put("shift_seconds", args.shift_seconds.map(|v| v.to_string()));
    put("set_time", args.set_time.clone());
    put("set_text", args.set_text.clone());
    fields
}

fn engine_config(args: &EngineArgs) -> edgequake_convert::ServiceConfigBuilder {
    ServiceConfig::builder()
        .raster_concurrency(args.raster_concurrency)
        .standard_limits(TierLimits {
            max_items: args.standard_max_items,
            max_item_bytes: args.standard_max_item_mb * MIB,
            max_total_bytes: args.standard_max_total_mb * MIB,
        })
        .privileged_limits(TierLimits {
            max_items: args.privileged_max_items,
            max_item_bytes: args.privileged_max_item_mb * MIB,
            max_total_bytes: args.privileged_max_total_mb * MIB,
        })
}
