//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config between the HTTP handlers and the CLI, and to
//! log it once at startup.

use crate::error::JobError;
use crate::progress::ProgressCallback;
use crate::tier::{TierLimits, TierPolicy};
use std::fmt;
use std::net::SocketAddr;

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_convert::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .raster_concurrency(4)
///     .request_timeout_secs(60)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Socket address the HTTP service listens on. Default: `0.0.0.0:8080`.
    pub bind_addr: SocketAddr,

    /// Per-tier batch limits. Default: [`TierLimits::STANDARD`] /
    /// [`TierLimits::PRIVILEGED`].
    pub tiers: TierPolicy,

    /// Raster items converted at once within one job. Default: 1.
    ///
    /// Decoded rasters dominate peak memory: a 24-megapixel photo is roughly
    /// 96 MB once decoded. At 1 the job holds one decoded image at a time.
    /// Raising this trades memory for wall-clock time; page merges ignore it.
    pub raster_concurrency: usize,

    /// Seconds before an in-flight HTTP job is discarded. Default: 120.
    pub request_timeout_secs: u64,

    /// Optional per-item / per-state progress hooks.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tiers: TierPolicy::default(),
            raster_concurrency: 1,
            request_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("tiers", &self.tiers)
            .field("raster_concurrency", &self.raster_concurrency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
            standard: TierLimits::STANDARD,
            privileged: TierLimits::PRIVILEGED,
        }
    }

    /// Upload body cap: the largest privileged batch plus multipart overhead.
    pub fn body_limit_bytes(&self) -> usize {
        let max = self.tiers.privileged().max_total_bytes + 1024 * 1024;
        usize::try_from(max).unwrap_or(usize::MAX)
    }
}

/// Builder for [`ServiceConfig`].
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
    standard: TierLimits,
    privileged: TierLimits,
}

impl ServiceConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn standard_limits(mut self, limits: TierLimits) -> Self {
        self.standard = limits;
        self
    }

    pub fn privileged_limits(mut self, limits: TierLimits) -> Self {
        self.privileged = limits;
        self
    }

    pub fn raster_concurrency(mut self, n: usize) -> Self {
        self.config.raster_concurrency = n.clamp(1, 64);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ServiceConfig, JobError> {
        self.config.tiers = TierPolicy::new(self.standard, self.privileged)?;
        if self.config.request_timeout_secs == 0 {
            return Err(JobError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builds() {
        let config = ServiceConfig::builder().build().unwrap();
        assert_eq!(config.raster_concurrency, 1);
        assert_eq!(config.tiers, TierPolicy::default());
    }

    #[test]
    fn concurrency_is_clamped() {
        let config = ServiceConfig::builder().raster_concurrency(0).build().unwrap();
        assert_eq!(config.raster_concurrency, 1);
        let config = ServiceConfig::builder().raster_concurrency(1000).build().unwrap();
        assert_eq!(config.raster_concurrency, 64);
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ServiceConfig::builder().request_timeout_secs(0).build().unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn inverted_tiers_rejected() {
        let err = ServiceConfig::builder()
            .standard_limits(TierLimits::PRIVILEGED)
            .privileged_limits(TierLimits::STANDARD)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn body_limit_covers_privileged_batch() {
        let config = ServiceConfig::default();
        assert!(config.body_limit_bytes() as u64 > TierLimits::PRIVILEGED.max_total_bytes);
    }
}
