//! Moving-window z-score detector.
//!
//! Pure computation over a window snapshot. The window passed to
//! [`ZScoreDetector::evaluate`] is the post-update snapshot, so it already
//! ends with the value being scored.

use crate::window::DEFAULT_WINDOW_CAPACITY;
use serde::{Deserialize, Serialize};

pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Which values form the baseline a new value is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Mean and deviation include the new value itself. With N values the
    /// z-score can never exceed sqrt(N - 1) in magnitude.
    #[default]
    Inclusive,
    /// Mean and deviation come from the values preceding the new one.
    Preceding,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Values required before any decision is made.
    pub capacity: usize,
    /// A reading is anomalous when |z| is strictly greater than this.
    pub threshold: f64,
    pub baseline: BaselineMode,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            threshold: DEFAULT_Z_THRESHOLD,
            baseline: BaselineMode::Inclusive,
        }
    }
}

/// Outcome of scoring one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyDecision {
    /// Window not yet full; no decision on cold start.
    Warming { len: usize, capacity: usize },
    /// Zero variance, z-score undefined.
    Flat { mean: f64 },
    Scored {
        mean: f64,
        std_dev: f64,
        z_score: f64,
        is_anomalous: bool,
    },
}

impl AnomalyDecision {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, Self::Scored { is_anomalous: true, .. })
    }

    pub fn z_score(&self) -> Option<f64> {
        match self {
            Self::Scored { z_score, .. } => Some(*z_score),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZScoreDetector {
    config: DetectorConfig,
}

impl ZScoreDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn evaluate(&self, window: &[f64], value: f64) -> AnomalyDecision {
        let capacity = self.config.capacity.max(1);
        if window.len() < capacity {
            return AnomalyDecision::Warming {
                len: window.len(),
                capacity,
            };
        }

        let baseline = match self.config.baseline {
            BaselineMode::Inclusive => window,
            BaselineMode::Preceding => &window[..window.len() - 1],
        };

        let Some((mean, std_dev)) = population_stats(baseline) else {
            // Preceding mode with a single-slot window has no baseline
            return AnomalyDecision::Warming {
                len: window.len(),
                capacity,
            };
        };

        if std_dev == 0.0 || all_equal(baseline) {
            return AnomalyDecision::Flat { mean };
        }

        let z_score = (value - mean) / std_dev;
        AnomalyDecision::Scored {
            mean,
            std_dev,
            z_score,
            is_anomalous: z_score.abs() > self.config.threshold,
        }
    }
}

/// Mean and population standard deviation (divides by N).
pub fn population_stats(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some((mean, variance.sqrt()))
}

// Summation rounding can leave a tiny non-zero deviation on identical values
fn all_equal(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}
