//! Push notification dispatch to a broadcast topic.
//!
//! FCM legacy HTTP API: one POST per alert, addressed to `/topics/<topic>`.
//! Fire-and-forget: a failed dispatch is logged and dropped, never retried.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::Notifier;

pub struct FcmNotifier {
    client: Client,
    endpoint: String,
    server_key: String,
    topic: String,
}

impl FcmNotifier {
    pub fn new(endpoint: &str, server_key: &str, topic: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            server_key: server_key.to_string(),
            topic: topic.to_string(),
        })
    }

    fn payload(&self, title: &str, body: &str) -> Value {
        json!({
            "to": format!("/topics/{}", self.topic),
            "notification": {
                "title": title,
                "body": body,
            },
        })
    }
}

#[async_trait]
impl Notifier for FcmNotifier {
    async fn notify(&self, title: &str, body: &str) {
        let result = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&self.payload(title, body))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(title, topic = %self.topic, "notification dispatched");
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(title, error = %e, "notification dispatch failed");
            }
        }
    }
}

/// Stand-in used when no push backend is configured: breaches still show up
/// in the logs, nothing leaves the process.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) {
        info!(title, body, "alert (no push backend configured)");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_targets_the_broadcast_topic() {
        let notifier = FcmNotifier::new("https://fcm.example/send", "secret", "alerts").unwrap();
        let payload = notifier.payload("Warning Attic", "Smoke level is above threshold");

        assert_eq!(payload["to"], "/topics/alerts");
        assert_eq!(payload["notification"]["title"], "Warning Attic");
        assert_eq!(
            payload["notification"]["body"],
            "Smoke level is above threshold"
        );
    }
}
