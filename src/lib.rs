//! Campus energy aggregator.
//!
//! Ingests streams of per-floor wattage readings, keeps a sliding window per
//! building, scores each reading against that window and posts an alert when
//! the z-score crosses the threshold.

pub mod alert;
pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reading;
pub mod server;
pub mod transport;
pub mod window;

pub use alert::{Alert, AlertDispatcher, AlertSink, DispatchConfig, HttpAlertSink};
pub use detector::{AnomalyDecision, BaselineMode, DetectorConfig, ZScoreDetector};
pub use error::{AlertError, ConfigError, IngestError, MetricsError};
pub use metrics::{EnergyMetrics, MetricsSink};
pub use pipeline::{Pipeline, PipelineConfig};
pub use reading::{GroupBy, Reading, StreamAck};
pub use window::{Window, WindowStore};
