//! Ingestion loop: one stream of readings in, metrics and alerts out.
//!
//! A single [`Pipeline`] is shared by every open connection. Each connection
//! drives its own [`Pipeline::run_stream`]; the window store is the only
//! state they share.

use crate::alert::{Alert, AlertDispatcher};
use crate::detector::{AnomalyDecision, DetectorConfig, ZScoreDetector};
use crate::error::IngestError;
use crate::metrics::{EnergyMetrics, MetricsSink};
use crate::reading::{GroupBy, Reading, StreamAck};
use crate::window::WindowStore;
use futures::{Stream, StreamExt};
use std::pin::pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub group_by: GroupBy,
    /// Window store shards; defaults to 4 per core.
    pub shards: Option<usize>,
}

pub struct Pipeline {
    store: WindowStore,
    detector: ZScoreDetector,
    group_by: GroupBy,
    metrics: Arc<EnergyMetrics>,
    sink: Arc<dyn MetricsSink>,
    dispatcher: AlertDispatcher,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, metrics: Arc<EnergyMetrics>, dispatcher: AlertDispatcher) -> Self {
        let capacity = config.detector.capacity;
        let store = match config.shards {
            Some(shards) => WindowStore::with_shards(capacity, shards),
            None => WindowStore::new(capacity),
        };

        Self {
            store,
            detector: ZScoreDetector::new(config.detector),
            group_by: config.group_by,
            sink: metrics.clone(),
            metrics,
            dispatcher,
        }
    }

    /// Export wattage somewhere other than the built-in registry.
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn detector(&self) -> &ZScoreDetector {
        &self.detector
    }

    pub fn metrics(&self) -> &EnergyMetrics {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Run one reading through export, window update, scoring and alerting.
    pub fn process(&self, reading: &Reading) -> AnomalyDecision {
        let timer = self.metrics.processing_latency.start_timer();
        self.metrics.readings_total.inc();

        debug!(
            building = %reading.building_id,
            floor = %reading.floor_id,
            wattage = reading.current_wattage,
            timestamp = reading.timestamp,
            "Received reading"
        );

        if let Err(e) = self
            .sink
            .set_wattage(&reading.building_id, &reading.floor_id, reading.current_wattage)
        {
            self.metrics.sink_errors_total.inc();
            warn!(error = %e, building = %reading.building_id, "Failed to export wattage");
        }

        let key = reading.group_key(self.group_by);
        let window = self.store.update(&key, reading.current_wattage);
        let decision = self.detector.evaluate(&window, reading.current_wattage);

        if let AnomalyDecision::Scored {
            z_score,
            is_anomalous: true,
            ..
        } = decision
        {
            self.metrics.anomalies_total.inc();
            warn!(
                key = %key,
                wattage = reading.current_wattage,
                z_score = %format!("{z_score:.2}"),
                "ANOMALY DETECTED"
            );
            self.dispatcher.dispatch(Alert::from_reading(reading, z_score));
        }

        timer.observe_duration();
        decision
    }

    /// Consume a stream until it ends or fails.
    ///
    /// A clean end yields a success acknowledgment. The first error stops
    /// consumption and is returned as-is; readings already processed stay
    /// in their windows.
    pub async fn run_stream<S, E>(&self, readings: S) -> Result<StreamAck, IngestError>
    where
        S: Stream<Item = Result<Reading, E>>,
        E: Into<IngestError>,
    {
        let _active = ActiveStream::open(&self.metrics);
        let mut readings = pin!(readings);
        let mut processed: u64 = 0;

        info!("New stream connection established");

        while let Some(item) = readings.next().await {
            match item {
                Ok(reading) => {
                    self.process(&reading);
                    processed += 1;
                }
                Err(e) => {
                    let error: IngestError = e.into();
                    self.metrics.streams_total.with_label_values(&["failed"]).inc();
                    warn!(error = %error, processed, "Error receiving data");
                    return Err(error);
                }
            }
        }

        self.metrics.streams_total.with_label_values(&["closed"]).inc();
        info!(processed, "Stream closed");
        Ok(StreamAck::closed())
    }
}

/// Keeps the open-stream gauge accurate even if the stream future is dropped.
struct ActiveStream<'a> {
    metrics: &'a EnergyMetrics,
}

impl<'a> ActiveStream<'a> {
    fn open(metrics: &'a EnergyMetrics) -> Self {
        metrics.active_streams.inc();
        Self { metrics }
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        self.metrics.active_streams.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::DispatchConfig;
    use crate::alert::tests::RecordingSink;
    use crate::detector::BaselineMode;
    use crate::error::MetricsError;
    use futures::stream;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn setup(threshold: f64) -> (Pipeline, mpsc::UnboundedReceiver<Alert>) {
        let (sink, rx) = RecordingSink::new();
        let dispatcher = AlertDispatcher::spawn(sink, DispatchConfig::default());
        let config = PipelineConfig {
            detector: DetectorConfig {
                capacity: 10,
                threshold,
                baseline: BaselineMode::Inclusive,
            },
            group_by: GroupBy::Building,
            shards: Some(4),
        };
        let metrics = Arc::new(EnergyMetrics::new().unwrap());
        (Pipeline::new(config, metrics, dispatcher), rx)
    }

    fn spike_stream() -> Vec<Result<Reading, IngestError>> {
        (0..9)
            .map(|i| Reading::new("Engineering", format!("Floor-{}", i % 4 + 1), 100.0, i))
            .chain(std::iter::once(Reading::new("Engineering", "Floor-2", 1000.0, 9)))
            .map(Ok)
            .collect()
    }

    struct BrokenSink {
        calls: AtomicUsize,
    }

    impl MetricsSink for BrokenSink {
        fn set_wattage(&self, _: &str, _: &str, _: f64) -> Result<(), MetricsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MetricsError::Prometheus(prometheus::Error::Msg("sink offline".into())))
        }
    }

    #[tokio::test]
    async fn test_clean_end_acknowledges() {
        let (pipeline, _rx) = setup(3.0);
        let readings = vec![
            Ok::<_, IngestError>(Reading::new("Library", "Floor-1", 640.0, 1)),
            Ok(Reading::new("Library", "Floor-2", 700.0, 2)),
        ];

        let ack = pipeline.run_stream(stream::iter(readings)).await.unwrap();

        assert_eq!(ack, StreamAck::closed());
        assert_eq!(pipeline.store().snapshot("Library"), Some(vec![640.0, 700.0]));
        assert_eq!(pipeline.metrics().readings(), 2);
        assert_eq!(pipeline.metrics().active_streams.get(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_stops_consumption() {
        let (pipeline, _rx) = setup(3.0);
        let readings = vec![
            Ok(Reading::new("Library", "Floor-1", 640.0, 1)),
            Err(IngestError::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection lost",
            ))),
            Ok(Reading::new("Library", "Floor-1", 650.0, 2)),
        ];

        let result = pipeline.run_stream(stream::iter(readings)).await;

        assert!(matches!(result, Err(IngestError::Transport(_))));
        assert_eq!(pipeline.store().snapshot("Library"), Some(vec![640.0]));
        assert_eq!(
            pipeline.metrics().streams_total.with_label_values(&["failed"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_anomaly_dispatches_exactly_once() {
        let (pipeline, mut rx) = setup(2.5);

        pipeline.run_stream(stream::iter(spike_stream())).await.unwrap();

        let alert = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            alert,
            Alert {
                building_id: "Engineering".into(),
                floor_id: "Floor-2".into(),
                wattage: 1000.0,
                timestamp: 9,
                message: "Z-Score Anomaly: 3.00".into(),
            }
        );
        assert_eq!(pipeline.metrics().anomalies(), 1);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_normal_readings_never_dispatch() {
        // z == 3.0 exactly at the default threshold
        let (pipeline, mut rx) = setup(3.0);

        pipeline.run_stream(stream::iter(spike_stream())).await.unwrap();

        assert_eq!(pipeline.metrics().anomalies(), 0);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert_eq!(pipeline.dispatcher().stats().snapshot().queued, 0);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stall_ingestion() {
        let (pipeline, _rx) = setup(3.0);
        let sink = Arc::new(BrokenSink {
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline.with_sink(sink.clone());

        let ack = pipeline.run_stream(stream::iter(spike_stream())).await.unwrap();

        assert!(ack.success);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 10);
        assert_eq!(pipeline.metrics().sink_errors_total.get(), 10);
        assert_eq!(pipeline.store().snapshot("Engineering").unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_floors_share_building_window() {
        let (pipeline, _rx) = setup(3.0);

        pipeline.process(&Reading::new("DormA", "Floor-1", 1.0, 1));
        pipeline.process(&Reading::new("DormA", "Floor-3", 2.0, 2));

        assert_eq!(pipeline.store().snapshot("DormA"), Some(vec![1.0, 2.0]));
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn test_floor_grouping_keeps_slashed_ids_apart() {
        let (sink, _rx) = RecordingSink::new();
        let dispatcher = AlertDispatcher::spawn(sink, DispatchConfig::default());
        let config = PipelineConfig {
            group_by: GroupBy::BuildingFloor,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config, Arc::new(EnergyMetrics::new().unwrap()), dispatcher);

        pipeline.process(&Reading::new("A/B", "C", 1.0, 1));
        pipeline.process(&Reading::new("A", "B/C", 2.0, 2));

        assert_eq!(pipeline.store().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_streams_share_store() {
        let (sink, _rx) = RecordingSink::new();
        let dispatcher = AlertDispatcher::spawn(sink, DispatchConfig::default());
        let metrics = Arc::new(EnergyMetrics::new().unwrap());
        let config = PipelineConfig {
            detector: DetectorConfig {
                capacity: 1000,
                ..DetectorConfig::default()
            },
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(Pipeline::new(config, metrics, dispatcher));

        let handles: Vec<_> = (0..4)
            .map(|conn| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let readings: Vec<Result<Reading, IngestError>> = (0..100)
                        .map(|i| Ok(Reading::new("Science", "Floor-1", (conn * 100 + i) as f64, i)))
                        .collect();
                    pipeline.run_stream(stream::iter(readings)).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().success);
        }

        let window = pipeline.store().snapshot("Science").unwrap();
        assert_eq!(window.len(), 400);

        // Per-connection arrival order survives interleaving
        for conn in 0..4 {
            let own: Vec<f64> = window
                .iter()
                .copied()
                .filter(|v| (*v as usize) / 100 == conn)
                .collect();
            let mut sorted = own.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(own, sorted);
        }
    }
}
