//! Collaborators the orchestrator reports to: usage counting and outcome
//! events.
//!
//! Both are traits so a deployment can plug in its own metering service and
//! telemetry transport. The defaults keep the library usable standalone:
//! [`UnmeteredUsage`] never limits and [`TracingOutcomeSink`] logs events.

use crate::error::ErrorKind;
use crate::model::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Server-side per-tenant usage counter.
///
/// Read before validation, incremented after a successful job only. Client
/// reported counts are never consulted.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    /// Jobs this tenant may still run today with this tool; `None` is unlimited.
    async fn remaining(&self, tenant: &str, tool: Tool) -> Option<u32>;

    /// Record one successful job.
    async fn record_success(&self, tenant: &str, tool: Tool);
}

/// Counter that never limits and records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmeteredUsage;

#[async_trait]
impl UsageCounter for UnmeteredUsage {
    async fn remaining(&self, _tenant: &str, _tool: Tool) -> Option<u32> {
        None
    }

    async fn record_success(&self, _tenant: &str, _tool: Tool) {}
}

/// In-process daily allowance, one budget per tenant and tool.
///
/// Suitable for a single instance and for tests; multi-instance deployments
/// supply their own [`UsageCounter`].
#[derive(Debug)]
pub struct FixedAllowance {
    per_tool: u32,
    used: Mutex<HashMap<(String, Tool), u32>>,
}

impl FixedAllowance {
    pub fn new(per_tool: u32) -> Self {
        Self {
            per_tool,
            used: Mutex::new(HashMap::new()),
        }
    }

    pub fn used(&self, tenant: &str, tool: Tool) -> u32 {
        self.used
            .lock()
            .map(|m| m.get(&(tenant.to_string(), tool)).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl UsageCounter for FixedAllowance {
    async fn remaining(&self, tenant: &str, tool: Tool) -> Option<u32> {
        Some(self.per_tool.saturating_sub(self.used(tenant, tool)))
    }

    async fn record_success(&self, tenant: &str, tool: Tool) {
        if let Ok(mut used) = self.used.lock() {
            *used.entry((tenant.to_string(), tool)).or_insert(0) += 1;
        }
    }
}

/// Metadata emitted once per job, on success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub tool: Tool,
    pub success: bool,
    pub item_count: usize,
    /// Output bytes on success, input bytes on failure.
    pub total_bytes: u64,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Receives job outcome events. Must not block.
pub trait OutcomeSink: Send + Sync {
    fn report(&self, event: &OutcomeEvent);
}

/// Logs each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutcomeSink;

impl OutcomeSink for TracingOutcomeSink {
    fn report(&self, event: &OutcomeEvent) {
        info!(
            target: "edgequake_convert::outcome",
            tool = %event.tool,
            success = event.success,
            items = event.item_count,
            bytes = event.total_bytes,
            elapsed_ms = event.processing_time_ms,
            error_kind = ?event.error_kind,
            "job finished"
        );
    }
}
