//! Reqwest-backed client for the external realtime mirror store.
//!
//! Two concerns share one endpoint family: PATCH a live copy of each event
//! under `<base>/<device_id>/sensors.json`, and GET per-device threshold
//! limits from `<base>/<device_id>/thresholds/<metric>.json`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::db::now_timestamp;
use crate::event::SensorEvent;
use crate::pipeline::MirrorStore;
use crate::thresholds::Metric;

pub struct RealtimeMirror {
    client: Client,
    base_url: String,
}

impl RealtimeMirror {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build mirror http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn sensors_url(&self, device_id: &str) -> String {
        format!("{}/{}/sensors.json", self.base_url, device_id)
    }

    fn threshold_url(&self, device_id: &str, metric: Metric) -> String {
        format!(
            "{}/{}/thresholds/{}.json",
            self.base_url,
            device_id,
            metric.slug()
        )
    }
}

/// Body of the merge-write. Absent channels are sent as explicit nulls so
/// the mirror reflects what the device reported; motion is flattened to 0/1
/// (absent counts as 0). The timestamp is stamped here, server-side.
fn sensor_patch_body(event: &SensorEvent, recorded_at: &str) -> Value {
    json!({
        "device_id": event.device_id,
        "temperature": event.temperature,
        "humidity": event.humidity,
        "smoke": event.smoke,
        "motion": if event.motion == Some(true) { 1 } else { 0 },
        "recorded_at": recorded_at,
    })
}

#[async_trait]
impl MirrorStore for RealtimeMirror {
    async fn forward(&self, event: &SensorEvent) -> Result<()> {
        let url = self.sensors_url(&event.device_id);
        let body = sensor_patch_body(event, &now_timestamp());

        let response = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("mirror forward request failed: {url}"))?;

        response
            .error_for_status()
            .context("mirror rejected sensor update")?;
        Ok(())
    }

    async fn fetch_threshold(&self, device_id: &str, metric: Metric) -> Option<f64> {
        let url = self.threshold_url(device_id, metric);

        // Each fetch is isolated: any failure here degrades to "no limit
        // configured" rather than failing the request.
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                // The mirror returns a bare JSON number, or `null` when the
                // node does not exist.
                response.json::<Option<f64>>().await.unwrap_or_else(|e| {
                    warn!(url, error = %e, "threshold response was not a number");
                    None
                })
            }
            Ok(response) => {
                warn!(url, status = %response.status(), "threshold fetch rejected");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "threshold fetch failed");
                None
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
