//! Subscription tier → batch limits.
//!
//! The bounds themselves are configuration; the only logic is the mapping
//! and the monotonicity rule: a privileged tenant never gets less than an
//! unprivileged one on any axis.

use crate::error::JobError;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Limits applied to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub max_items: usize,
    pub max_item_bytes: u64,
    pub max_total_bytes: u64,
}

impl TierLimits {
    /// Default limits for free tenants: 5 files, 25 MiB each, 100 MiB total.
    pub const STANDARD: TierLimits = TierLimits {
        max_items: 5,
        max_item_bytes: 25 * MIB,
        max_total_bytes: 100 * MIB,
    };

    /// Default limits for paying tenants: 30 files, 200 MiB each, 1 GiB total.
    pub const PRIVILEGED: TierLimits = TierLimits {
        max_items: 30,
        max_item_bytes: 200 * MIB,
        max_total_bytes: 1024 * MIB,
    };

    /// True when every bound of `self` is at least the matching bound of `other`.
    pub fn dominates(&self, other: &TierLimits) -> bool {
        self.max_items >= other.max_items
            && self.max_item_bytes >= other.max_item_bytes
            && self.max_total_bytes >= other.max_total_bytes
    }
}

/// The pair of limits the service hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    standard: TierLimits,
    privileged: TierLimits,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            standard: TierLimits::STANDARD,
            privileged: TierLimits::PRIVILEGED,
        }
    }
}

impl TierPolicy {
    /// Build a policy, rejecting one where privileged limits are lower.
    pub fn new(standard: TierLimits, privileged: TierLimits) -> Result<Self, JobError> {
        if !privileged.dominates(&standard) {
            return Err(JobError::InvalidConfig(format!(
                "privileged limits {privileged:?} must not be lower than standard limits {standard:?}"
            )));
        }
        if standard.max_items == 0 || standard.max_item_bytes == 0 || standard.max_total_bytes == 0
        {
            return Err(JobError::InvalidConfig(
                "tier limits must all be ≥ 1".into(),
            ));
        }
        Ok(Self {
            standard,
            privileged,
        })
    }

    pub fn limits_for(&self, privileged: bool) -> TierLimits {
        if privileged {
            self.privileged
        } else {
            self.standard
        }
    }

    pub fn privileged(&self) -> TierLimits {
        self.privileged
    }
}
