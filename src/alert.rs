//! Fire-and-forget alert dispatch.
//!
//! Alerts go into a bounded queue without waiting. A single worker drains the
//! queue and spawns one detached delivery task per alert, with the number of
//! deliveries in flight capped by a semaphore. Delivery is attempted once;
//! failures are logged and counted, never reported back to ingestion.

use crate::error::AlertError;
use crate::reading::Reading;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

pub const DEFAULT_ALERT_URL: &str = "http://alert-service:8000/alert";

/// JSON body posted to the alert endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub building_id: String,
    pub floor_id: String,
    pub wattage: f64,
    pub timestamp: i64,
    pub message: String,
}

impl Alert {
    pub fn from_reading(reading: &Reading, z_score: f64) -> Self {
        Self {
            building_id: reading.building_id.clone(),
            floor_id: reading.floor_id.clone(),
            wattage: reading.current_wattage,
            timestamp: reading.timestamp,
            message: format!("Z-Score Anomaly: {z_score:.2}"),
        }
    }
}

/// Receiver of alerts. Returns the response status on success.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<u16, AlertError>;
}

/// Posts alerts as JSON over HTTP.
pub struct HttpAlertSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<u16, AlertError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(AlertError::Status(status.as_u16()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Alerts waiting for a delivery slot before new ones are dropped.
    pub queue_capacity: usize,
    /// Concurrent deliveries.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 32,
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle used by ingestion to hand off alerts. Cheap to clone.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Alert>,
    stats: Arc<DispatchStats>,
}

impl AlertDispatcher {
    /// Start the dispatch worker on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn AlertSink>, config: DispatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        tokio::spawn(Self::worker(rx, sink, permits, stats.clone()));

        Self { tx, stats }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Queue an alert. Returns false if it was dropped.
    pub fn dispatch(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(alert)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(building = %alert.building_id, "Alert queue full, dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(building = %alert.building_id, "Alert dispatcher stopped, dropping alert");
                false
            }
        }
    }

    async fn worker(
        mut rx: mpsc::Receiver<Alert>,
        sink: Arc<dyn AlertSink>,
        permits: Arc<Semaphore>,
        stats: Arc<DispatchStats>,
    ) {
        debug!("Alert dispatcher started");

        while let Some(alert) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let sink = sink.clone();
            let stats = stats.clone();

            tokio::spawn(async move {
                let _permit = permit;
                match sink.deliver(&alert).await {
                    Ok(status) => {
                        stats.sent.fetch_add(1, Ordering::Relaxed);
                        info!(status, building = %alert.building_id, "Alert sent");
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, building = %alert.building_id, "Failed to send alert");
                    }
                }
            });
        }

        debug!("Alert dispatcher stopped");
    }
}
