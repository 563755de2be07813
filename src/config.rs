//! Service configuration, from flags or environment.

use crate::alert::{DEFAULT_ALERT_URL, DispatchConfig};
use crate::detector::{BaselineMode, DEFAULT_Z_THRESHOLD, DetectorConfig};
use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;
use crate::reading::GroupBy;
use crate::transport::DEFAULT_MAX_LINE_BYTES;
use crate::window::DEFAULT_WINDOW_CAPACITY;
use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "aggregator")]
#[command(about = "Streams building power readings, tracks baselines and raises z-score alerts")]
pub struct ServiceConfig {
    /// Address for the streaming ingest endpoint
    #[arg(long, env = "INGEST_ADDR", default_value = "0.0.0.0:50051")]
    pub ingest_addr: String,

    /// Address for the Prometheus scrape endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:2112")]
    pub metrics_addr: String,

    /// Alert endpoint receiving anomaly notifications
    #[arg(long, env = "ALERT_URL", default_value = DEFAULT_ALERT_URL)]
    pub alert_url: String,

    /// Per-request timeout for alert delivery
    #[arg(long, env = "ALERT_TIMEOUT_MS", default_value_t = 5000)]
    pub alert_timeout_ms: u64,

    /// Alerts buffered before new ones are dropped
    #[arg(long, env = "ALERT_QUEUE_CAPACITY", default_value_t = 1024)]
    pub alert_queue_capacity: usize,

    /// Concurrent alert deliveries
    #[arg(long, env = "ALERT_MAX_IN_FLIGHT", default_value_t = 32)]
    pub alert_max_in_flight: usize,

    /// Readings kept per grouping key
    #[arg(long, env = "WINDOW_CAPACITY", default_value_t = DEFAULT_WINDOW_CAPACITY)]
    pub window_capacity: usize,

    /// Alert when |z| exceeds this
    #[arg(long, env = "Z_THRESHOLD", default_value_t = DEFAULT_Z_THRESHOLD)]
    pub z_threshold: f64,

    /// Whether the scored value is part of its own baseline
    #[arg(long, env = "BASELINE_MODE", value_enum, default_value_t = BaselineMode::Inclusive)]
    pub baseline: BaselineMode,

    /// How readings are partitioned into windows
    #[arg(long, env = "GROUP_BY", value_enum, default_value_t = GroupBy::Building)]
    pub group_by: GroupBy,

    /// Window store shards (default: 4 per core)
    #[arg(long, env = "WINDOW_SHARDS")]
    pub window_shards: Option<usize>,

    /// Longest accepted NDJSON line
    #[arg(long, env = "MAX_LINE_BYTES", default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,

    /// How long open streams may keep running after a shutdown signal
    #[arg(long, env = "SHUTDOWN_GRACE_MS", default_value_t = 10_000)]
    pub shutdown_grace_ms: u64,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !self.z_threshold.is_finite() || self.z_threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.z_threshold));
        }
        if self.alert_queue_capacity == 0 {
            return Err(ConfigError::ZeroLimit("alert queue capacity"));
        }
        if self.alert_max_in_flight == 0 {
            return Err(ConfigError::ZeroLimit("alert max in flight"));
        }
        if self.window_shards == Some(0) {
            return Err(ConfigError::ZeroLimit("window shards"));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ZeroLimit("max line bytes"));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            detector: DetectorConfig {
                capacity: self.window_capacity,
                threshold: self.z_threshold,
                baseline: self.baseline,
            },
            group_by: self.group_by,
            shards: self.window_shards,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: self.alert_queue_capacity,
            max_in_flight: self.alert_max_in_flight,
        }
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServiceConfig {
        ServiceConfig::try_parse_from(std::iter::once("aggregator").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);

        assert_eq!(config.ingest_addr, "0.0.0.0:50051");
        assert_eq!(config.metrics_addr, "0.0.0.0:2112");
        assert_eq!(config.alert_url, "http://alert-service:8000/alert");
        assert_eq!(config.window_capacity, 10);
        assert_eq!(config.z_threshold, 3.0);
        assert_eq!(config.baseline, BaselineMode::Inclusive);
        assert_eq!(config.group_by, GroupBy::Building);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shutdown_grace_flag() {
        let config = parse(&["--shutdown-grace-ms", "250"]);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--window-capacity",
            "30",
            "--z-threshold",
            "2.5",
            "--baseline",
            "preceding",
            "--group-by",
            "building-floor",
            "--window-shards",
            "8",
        ]);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.detector.capacity, 30);
        assert_eq!(pipeline.detector.threshold, 2.5);
        assert_eq!(pipeline.detector.baseline, BaselineMode::Preceding);
        assert_eq!(pipeline.group_by, GroupBy::BuildingFloor);
        assert_eq!(pipeline.shards, Some(8));
    }

    #[test]
    fn test_validation() {
        let mut config = parse(&[]);
        config.window_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let mut config = parse(&[]);
        config.z_threshold = -1.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(-1.0)));

        let mut config = parse(&[]);
        config.alert_max_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroLimit(_))));
    }
}
