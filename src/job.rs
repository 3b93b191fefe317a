//! Job orchestrator: sequences tier lookup, validation, conversion and
//! packaging for one request.
//!
//! ## State machine
//!
//! ```text
//! Collecting ─▶ Validating ─▶ Converting ─▶ Packaging ─▶ Complete
//!     │             │             │             │
//!     └─────────────┴─────────────┴─────────────┴──▶ Failed(kind)
//! ```
//!
//! Every job ends in `Complete` or `Failed`, and every terminal state emits
//! exactly one [`OutcomeEvent`]. The transition history is returned in the
//! [`JobReport`] so callers can see where a job spent its life.

use crate::archive;
use crate::config::ServiceConfig;
use crate::error::{ErrorKind, JobError};
use crate::model::{
    base_name, ConversionOptions, ConversionOutcome, InputItem, ItemFailure, ItemReport,
    JobOutput, JobReport, Tool,
};
use crate::pipeline::{converter_for, FormatConverter};
use crate::policy::{run_batch, FailurePolicy};
use crate::progress::ProgressCallback;
use crate::report::{OutcomeEvent, OutcomeSink, TracingOutcomeSink, UnmeteredUsage, UsageCounter};
use crate::validate::{validate, validate_types};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── States ───────────────────────────────────────────────────────────────

/// Lifecycle state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Collecting,
    Validating,
    Converting,
    Packaging,
    Complete,
    Failed(ErrorKind),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed(_))
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Complete | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Collecting, Validating)
            | (Validating, Converting)
            | (Converting, Packaging)
            | (Packaging, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Collecting => f.write_str("collecting"),
            JobState::Validating => f.write_str("validating"),
            JobState::Converting => f.write_str("converting"),
            JobState::Packaging => f.write_str("packaging"),
            JobState::Complete => f.write_str("complete"),
            JobState::Failed(kind) => write!(f, "failed({kind:?})"),
        }
    }
}

/// State holder for one job; records history and fires progress hooks.
struct Job {
    state: JobState,
    history: Vec<JobState>,
    progress: Option<ProgressCallback>,
}

impl Job {
    fn new(progress: Option<ProgressCallback>) -> Self {
        Self {
            state: JobState::Collecting,
            history: vec![JobState::Collecting],
            progress,
        }
    }

    fn advance(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(&next) {
            return Err(JobError::Internal(format!(
                "illegal job transition {} → {}",
                self.state, next
            )));
        }
        debug!("Job {} → {}", self.state, next);
        if let Some(ref cb) = self.progress {
            cb.on_state_change(&self.state, &next);
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, kind: ErrorKind) {
        if !self.state.is_terminal() {
            // Failed is reachable from every non-terminal state.
            let _ = self.advance(JobState::Failed(kind));
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// Everything the orchestrator needs for one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub tool: Tool,
    /// Trusted tier flag supplied by the caller.
    pub privileged: bool,
    /// Tenant id used for usage counting.
    pub tenant: String,
    pub items: Vec<InputItem>,
    pub options: ConversionOptions,
}

impl JobRequest {
    /// Unprivileged anonymous request with the tool's default options.
    pub fn new(tool: Tool, items: Vec<InputItem>) -> Self {
        Self {
            tool,
            privileged: false,
            tenant: "anonymous".to_string(),
            items,
            options: ConversionOptions::defaults_for(tool),
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Runs jobs against a fixed configuration and collaborator set.
///
/// Cheap to clone; share one between HTTP handlers.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ServiceConfig>,
    usage: Arc<dyn UsageCounter>,
    sink: Arc<dyn OutcomeSink>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Unmetered orchestrator that logs outcomes through `tracing`.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            usage: Arc::new(UnmeteredUsage),
            sink: Arc::new(TracingOutcomeSink),
        }
    }

    pub fn with_usage_counter(mut self, usage: Arc<dyn UsageCounter>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_outcome_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run one job with the strategy selected by `request.tool`.
    ///
    /// # Errors
    /// Returns `Err(JobError)` when the job ends in `Failed`: validation and
    /// quota rejections, an aborted or fully failed batch, and packaging
    /// errors. Isolated item failures are reported in
    /// [`JobReport::items`] instead.
    pub async fn run(&self, request: JobRequest) -> Result<JobOutput, JobError> {
        self.execute(request, None, None).await
    }

    /// Run one job, discarding it with [`JobError::TimedOut`] once `limit`
    /// elapses.
    ///
    /// The discarded job still reports its outcome. Items already handed to
    /// the blocking pool finish in the background; no further items start.
    pub async fn run_with_timeout(
        &self,
        request: JobRequest,
        limit: Duration,
    ) -> Result<JobOutput, JobError> {
        self.execute(request, None, Some(limit)).await
    }

    /// Run one job with an explicit strategy instead of the tool's default.
    pub async fn run_with_converter(
        &self,
        request: JobRequest,
        converter: Arc<dyn FormatConverter>,
    ) -> Result<JobOutput, JobError> {
        self.execute(request, Some(converter), None).await
    }

    async fn execute(
        &self,
        request: JobRequest,
        converter: Option<Arc<dyn FormatConverter>>,
        limit: Option<Duration>,
    ) -> Result<JobOutput, JobError> {
        let start = Instant::now();
        let tool = request.tool;
        let item_count = request.items.len();
        let input_bytes: u64 = request.items.iter().map(|i| i.declared_size).sum();
        info!(
            "Job started: {} with {} items ({} bytes, privileged={})",
            tool, item_count, input_bytes, request.privileged
        );

        let mut job = Job::new(self.config.progress_callback.clone());
        let result = match limit {
            Some(limit) => {
                tokio::time::timeout(limit, self.drive(&mut job, request, converter, start))
                    .await
                    .unwrap_or_else(|_| {
                        Err(JobError::TimedOut {
                            secs: limit.as_secs(),
                        })
                    })
            }
            None => self.drive(&mut job, request, converter, start).await,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let event = match &result {
            Ok(output) => OutcomeEvent {
                tool,
                success: true,
                item_count,
                total_bytes: output.report.total_output_bytes,
                processing_time_ms: elapsed_ms,
                error_kind: None,
            },
            Err(e) => {
                job.fail(e.kind());
                warn!("Job failed in {}ms: {}", elapsed_ms, e);
                OutcomeEvent {
                    tool,
                    success: false,
                    item_count,
                    total_bytes: input_bytes,
                    processing_time_ms: elapsed_ms,
                    error_kind: Some(e.kind()),
                }
            }
        };
        self.sink.report(&event);
        result
    }

    async fn drive(
        &self,
        job: &mut Job,
        request: JobRequest,
        converter: Option<Arc<dyn FormatConverter>>,
        start: Instant,
    ) -> Result<JobOutput, JobError> {
        let JobRequest {
            tool,
            privileged,
            tenant,
            items,
            options,
        } = request;

        // ── Collecting ───────────────────────────────────────────────────
        let converter = match converter {
            Some(c) => c,
            None => converter_for(tool, &options)?,
        };
        if self.usage.remaining(&tenant, tool).await == Some(0) {
            return Err(JobError::QuotaExceeded {
                tool: tool.slug().to_string(),
            });
        }

        // ── Validating ───────────────────────────────────────────────────
        job.advance(JobState::Validating)?;
        let limits = self.config.tiers.limits_for(privileged);
        validate(&items, &limits)?;
        validate_types(&items, tool)?;

        // ── Converting ───────────────────────────────────────────────────
        job.advance(JobState::Converting)?;
        let total = items.len();
        let input_bytes: u64 = items.iter().map(|i| i.declared_size).sum();
        let names: Vec<String> = items
            .iter()
            .map(|i| base_name(&i.name).to_string())
            .collect();
        let batch = run_batch(
            items,
            Arc::clone(&converter),
            self.config.raster_concurrency,
            self.config.progress_callback.as_ref(),
        )
        .await;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_complete(total, batch.success_count());
        }

        if converter.failure_policy() == FailurePolicy::AbortOnFirstFailure {
            if let Some((name, error)) = batch.first_failure() {
                return Err(JobError::ConversionFailed {
                    name: name.to_string(),
                    source: error.clone(),
                });
            }
        }
        if batch.success_count() == 0 {
            let first = batch
                .first_failure()
                .map(|(_, e)| e.clone())
                .ok_or(JobError::NothingToPackage)?;
            return Err(JobError::AllItemsFailed { total, first });
        }

        let successes = batch.successes();
        let assembler = Arc::clone(&converter);
        let outputs = tokio::task::spawn_blocking(move || assembler.assemble(successes))
            .await
            .map_err(|e| JobError::Internal(format!("assemble task failed: {e}")))?
            .map_err(|source| JobError::AssemblyFailed { source })?;

        // ── Packaging ────────────────────────────────────────────────────
        job.advance(JobState::Packaging)?;
        let artifact = archive::pack(outputs, &archive::bundle_name(tool.slug()))?;

        // ── Complete ─────────────────────────────────────────────────────
        job.advance(JobState::Complete)?;
        self.usage.record_success(&tenant, tool).await;

        let items: Vec<ItemReport> = batch
            .outcomes
            .iter()
            .map(|o| match o {
                ConversionOutcome::Success(c) => ItemReport {
                    name: names[c.index].clone(),
                    output_name: Some(c.name.clone()),
                    output_bytes: c.bytes.len() as u64,
                    error: None,
                },
                ConversionOutcome::Failure { name, error, .. } => ItemReport {
                    name: name.clone(),
                    output_name: None,
                    output_bytes: 0,
                    error: Some(ItemFailure {
                        kind: error.kind(),
                        message: error.to_string(),
                    }),
                },
            })
            .collect();

        let report = JobReport {
            tool,
            success: true,
            item_count: total,
            succeeded: batch.success_count(),
            failed: batch.failure_count(),
            total_input_bytes: input_bytes,
            total_output_bytes: artifact.bytes.len() as u64,
            processing_time_ms: start.elapsed().as_millis() as u64,
            items,
            states: job.history.clone(),
        };
        info!(
            "Job complete: {}/{} items → {} ({} bytes) in {}ms",
            report.succeeded,
            report.item_count,
            artifact.file_name,
            artifact.bytes.len(),
            report.processing_time_ms
        );

        Ok(JobOutput { artifact, report })
    }
}
