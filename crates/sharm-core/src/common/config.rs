//! Per-session tunables.
//!
//! Every synthesis/analysis call reads its thresholds and block sizing from a
//! [`SessionConfig`] owned by the caller's session, never from process-wide
//! state. Configurations can be stored as JSON next to the data they were used
//! for.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FftPolicy {
    /// FFT for grids with at least `fft_min_nlon` equally spaced longitudes.
    #[default]
    Auto,
    Always,
    /// Direct trigonometric sums everywhere.
    Never,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tolerance of the longitude checks: equal spacing for the FFT and equal
    /// cell widths.
    pub threshold: f64,
    /// Looser tolerance of the global cell layout accepted by the approximate
    /// cell analysis.
    pub threshold2: f64,
    /// Coefficient block capacity is `block_nmax_multiplier * (nmax + 1)`.
    pub block_nmax_multiplier: usize,
    pub fft_policy: FftPolicy,
    pub fft_min_nlon: usize,
    /// Worker team size for order sweeps; 0 uses the rayon pool size.
    pub threads: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threshold: 100.0 * f64::EPSILON,
            threshold2: 1.0e-6,
            block_nmax_multiplier: 4,
            fft_policy: FftPolicy::Auto,
            fft_min_nlon: 32,
            threads: 0,
        }
    }
}

impl SessionConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_block_multiplier(mut self, multiplier: usize) -> Self {
        self.block_nmax_multiplier = multiplier;
        self
    }

    pub fn with_fft_policy(mut self, policy: FftPolicy) -> Self {
        self.fft_policy = policy;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn validate(&self) -> Result<(), SessionConfigError> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(SessionConfigError::Invalid {
                field: "threshold",
                reason: format!("must be positive and finite, got {}", self.threshold),
            });
        }
        if !(self.threshold2.is_finite() && self.threshold2 > 0.0) {
            return Err(SessionConfigError::Invalid {
                field: "threshold2",
                reason: format!("must be positive and finite, got {}", self.threshold2),
            });
        }
        if self.block_nmax_multiplier == 0 {
            return Err(SessionConfigError::Invalid {
                field: "block_nmax_multiplier",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        if self.threads == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.threads
        }
    }

    pub fn use_fft(&self, nlon: usize) -> bool {
        match self.fft_policy {
            FftPolicy::Always => nlon > 0,
            FftPolicy::Never => false,
            FftPolicy::Auto => nlon >= self.fft_min_nlon,
        }
    }

    /// Spacing tolerance handed to [`RowTransform::new`](crate::numerics::RowTransform::new),
    /// `None` when the policy rules the FFT out for `nlon` longitudes.
    pub fn fft_tolerance(&self, nlon: usize) -> Option<f64> {
        self.use_fft(nlon).then_some(self.threshold)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionConfigError {
    #[error("failed to read session config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse session config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid session config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<SessionConfigError> for crate::domain::HarmError {
    fn from(error: SessionConfigError) -> Self {
        match error {
            SessionConfigError::Invalid { .. } => {
                Self::invalid_argument("INPUT.CONFIG", error.to_string())
            }
            _ => Self::io("IO.CONFIG", error.to_string()),
        }
    }
}

pub fn load_session_config(
    config_path: impl AsRef<Path>,
) -> Result<SessionConfig, SessionConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| SessionConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config: SessionConfig =
        serde_json::from_str(&source).map_err(|source| SessionConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
