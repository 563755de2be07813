//! sensor-sim - streams synthetic floor readings to the aggregator
//!
//! Usage:
//!   sensor-sim --target http://localhost:50051 --interval-ms 500
//!   sensor-sim --count 200 --spike-probability 0.2

use anyhow::Context;
use bytes::Bytes;
use campus_energy::{Reading, StreamAck};
use clap::Parser;
use futures::stream;
use std::time::Duration;

const BUILDINGS: [&str; 4] = ["Engineering", "Science", "Library", "DormA"];

#[derive(Parser)]
#[command(name = "sensor-sim")]
#[command(about = "Synthetic building power readings with occasional spikes")]
struct Cli {
    /// Aggregator base URL
    #[arg(long, env = "AGGREGATOR_HOST", default_value = "http://localhost:50051")]
    target: String,

    /// Delay between readings
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Stop after this many readings (default: run forever)
    #[arg(long)]
    count: Option<u64>,

    /// Chance that a reading is a 4-6 kW spike
    #[arg(long, default_value_t = 0.05)]
    spike_probability: f64,
}

fn generate_reading(spike_probability: f64) -> Reading {
    let building = BUILDINGS[fastrand::usize(..BUILDINGS.len())];
    let floor = format!("Floor-{}", fastrand::u8(1..=4));

    // Normal draw 500-1000 W, spikes 4000-6000 W
    let wattage = if fastrand::f64() < spike_probability {
        println!("Generating SPIKE for {building}");
        4000.0 + fastrand::f64() * 2000.0
    } else {
        500.0 + fastrand::f64() * 500.0
    };

    Reading {
        building_id: building.to_string(),
        floor_id: floor,
        current_wattage: wattage,
        timestamp: chrono::Utc::now().timestamp(),
        voltage: Some(120.0),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let url = format!("{}/readings/stream", cli.target.trim_end_matches('/'));
    let interval = Duration::from_millis(cli.interval_ms);
    let spike_probability = cli.spike_probability;
    let limit = cli.count;

    println!("Starting sensor simulator -> {url}");

    let lines = stream::unfold(0u64, move |sent| async move {
        if limit.is_some_and(|limit| sent >= limit) {
            return None;
        }
        if sent > 0 {
            tokio::time::sleep(interval).await;
        }

        let reading = generate_reading(spike_probability);
        let line = match serde_json::to_vec(&reading) {
            Ok(mut line) => {
                line.push(b'\n');
                Ok(Bytes::from(line))
            }
            Err(e) => Err(e),
        };
        Some((line, sent + 1))
    });

    let response = reqwest::Client::new()
        .post(&url)
        .header("content-type", "application/x-ndjson")
        .body(reqwest::Body::wrap_stream(lines))
        .send()
        .await
        .context("stream request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("aggregator rejected stream ({status}): {body}");
    }

    let ack: StreamAck = response.json().await.context("invalid acknowledgment")?;
    println!("Server response: success={} message={}", ack.success, ack.message);
    Ok(())
}
