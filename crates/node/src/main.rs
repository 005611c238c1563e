mod sim;

use anyhow::{Context, Result};
use serde::Serialize;
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_hub::crypto::EventCipher;

use sim::RoomSim;

#[derive(Debug, Serialize)]
struct EventPayload {
    device_id: String,
    temperature: f64,
    humidity: f64,
    smoke: f64,
    motion: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Env config
    let hub_url = env::var("HUB_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let device_id = env::var("DEVICE_ID").unwrap_or_else(|_| "1000000001".to_string());
    let app_key = env::var("APP_KEY").context("APP_KEY env var is required (base64 32 bytes)")?;

    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    let cipher = EventCipher::from_base64(&app_key).context("invalid APP_KEY")?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let endpoint = format!("{}/api/history", hub_url.trim_end_matches('/'));
    info!(endpoint, device_id, "node started");

    let mut sim = RoomSim::new();

    loop {
        let s = sim.sample();
        let payload = EventPayload {
            device_id: device_id.clone(),
            temperature: s.temperature,
            humidity: s.humidity,
            smoke: s.smoke,
            motion: s.motion,
        };

        let body = cipher.encrypt(&serde_json::to_vec(&payload)?);

        match client.post(&endpoint).body(body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(temperature = s.temperature, smoke = s.smoke, "event accepted");
            }
            Ok(response) => {
                warn!(status = %response.status(), "hub rejected event");
            }
            Err(e) => {
                warn!(error = %e, "failed to reach hub");
            }
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
