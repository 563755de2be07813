//! Prometheus export of live wattage and pipeline counters.
//!
//! Everything lives in an explicitly constructed [`Registry`]; nothing is
//! registered with the process-wide default registry.

use crate::error::MetricsError;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Destination for the last-seen wattage of a building floor.
pub trait MetricsSink: Send + Sync {
    fn set_wattage(&self, building_id: &str, floor_id: &str, watts: f64) -> Result<(), MetricsError>;
}

pub struct EnergyMetrics {
    registry: Registry,
    wattage: GaugeVec,
    pub(crate) readings_total: IntCounter,
    pub(crate) anomalies_total: IntCounter,
    pub(crate) sink_errors_total: IntCounter,
    pub(crate) active_streams: IntGauge,
    pub(crate) streams_total: IntCounterVec,
    pub(crate) tracked_windows: IntGauge,
    pub(crate) processing_latency: Histogram,
}

impl EnergyMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let wattage = GaugeVec::new(
            Opts::new(
                "energy_current_wattage",
                "Current wattage consumption per building/floor",
            ),
            &["building_id", "floor_id"],
        )?;
        let readings_total = IntCounter::new("energy_readings_total", "Total readings ingested")?;
        let anomalies_total =
            IntCounter::new("energy_anomalies_total", "Total anomalous readings detected")?;
        let sink_errors_total = IntCounter::new(
            "energy_metrics_sink_errors_total",
            "Wattage updates the metrics sink rejected",
        )?;
        let active_streams =
            IntGauge::new("energy_active_streams", "Inbound reading streams currently open")?;
        let streams_total = IntCounterVec::new(
            Opts::new("energy_streams_total", "Finished inbound streams by outcome"),
            &["outcome"],
        )?;
        let tracked_windows =
            IntGauge::new("energy_tracked_windows", "Grouping keys with a live window")?;
        let processing_latency = Histogram::with_opts(HistogramOpts::new(
            "energy_processing_duration_seconds",
            "Per-reading processing latency",
        ))?;

        registry.register(Box::new(wattage.clone()))?;
        registry.register(Box::new(readings_total.clone()))?;
        registry.register(Box::new(anomalies_total.clone()))?;
        registry.register(Box::new(sink_errors_total.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(streams_total.clone()))?;
        registry.register(Box::new(tracked_windows.clone()))?;
        registry.register(Box::new(processing_latency.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            wattage,
            readings_total,
            anomalies_total,
            sink_errors_total,
            active_streams,
            streams_total,
            tracked_windows,
            processing_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn readings(&self) -> u64 {
        self.readings_total.get()
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies_total.get()
    }
}

impl MetricsSink for EnergyMetrics {
    fn set_wattage(&self, building_id: &str, floor_id: &str, watts: f64) -> Result<(), MetricsError> {
        self.wattage
            .get_metric_with_label_values(&[building_id, floor_id])?
            .set(watts);
        Ok(())
    }
}
