//! Ingest pipeline: decrypt -> validate -> lookup -> forward/monitor ->
//! persist.
//!
//! Every external collaborator sits behind a trait so the pipeline can be
//! exercised against in-memory fakes. Each stage returns an explicit result;
//! the web layer maps [`IngestError`] onto the HTTP response envelope.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::crypto::EventCipher;
use crate::db::{Device, HistoryRecord};
use crate::event::{parse_event, FieldErrors, SensorEvent};
use crate::thresholds::{self, Metric};

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Lookup-only view of the device registry. Devices are registered by a
/// separate workflow (config seeding); the pipeline never creates them.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find_device(&self, id: &str) -> anyhow::Result<Option<Device>>;

    async fn list_devices(&self) -> anyhow::Result<Vec<Device>>;
}

/// Persistence for accepted events plus the read queries the API serves.
/// `recorded_at` is assigned by the store, never by the client.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &SensorEvent) -> anyhow::Result<HistoryRecord>;

    async fn recent_for_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<HistoryRecord>>;

    /// Records with `recorded_at` in `[start, end]` inclusive, newest first,
    /// optionally filtered to one device. Bounds are full timestamps.
    async fn records_between(
        &self,
        start: &str,
        end: &str,
        device_id: Option<&str>,
    ) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// The external realtime database that receives a live copy of every event
/// and hosts the per-device threshold configuration.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Merge-write the event under the device's node. Single attempt.
    async fn forward(&self, event: &SensorEvent) -> anyhow::Result<()>;

    /// Fetch one threshold limit. Absent, null, and failed fetches all
    /// collapse to `None`; the monitor treats that as "no limit configured".
    async fn fetch_threshold(&self, device_id: &str, metric: Metric) -> Option<f64>;
}

/// Broadcast push notifications. Fire-and-forget: delivery failures are the
/// implementation's problem to log, not the pipeline's to handle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

// ---------------------------------------------------------------------------
// Errors and outcome
// ---------------------------------------------------------------------------

/// Everything that can stop an inbound event short of persistence. All
/// variants surface as HTTP 400; the distinction is for the response message
/// and the logs.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Encrypted data is required.")]
    EmptyBody,

    #[error("Decrypted data is not valid JSON.")]
    InvalidPayload,

    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("failed to process data: {0}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for IngestError {
    fn from(e: anyhow::Error) -> Self {
        IngestError::Internal(e)
    }
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// Device was registered: event mirrored, thresholds checked, history
    /// row created.
    Stored(HistoryRecord),
    /// Device unknown: event mirrored only, nothing persisted.
    Relayed { device_id: String },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run one encrypted payload through the full ingest sequence.
pub async fn ingest(
    cipher: &EventCipher,
    registry: &dyn DeviceRegistry,
    store: &dyn EventStore,
    mirror: &dyn MirrorStore,
    notifier: &dyn Notifier,
    body: &[u8],
) -> Result<IngestOutcome, IngestError> {
    if body.is_empty() {
        return Err(IngestError::EmptyBody);
    }

    let plaintext = cipher.decrypt(body).map_err(|e| {
        warn!(error = %e, "payload decryption failed");
        IngestError::InvalidPayload
    })?;

    let value: Value =
        serde_json::from_slice(&plaintext).map_err(|_| IngestError::InvalidPayload)?;
    if !value.is_object() {
        return Err(IngestError::InvalidPayload);
    }

    let event = parse_event(&value).map_err(IngestError::Validation)?;

    let device = registry.find_device(&event.device_id).await?;

    // The mirror copy goes out on both branches. A failed forward is logged
    // and the request carries on: at-most-once, no retry.
    if let Err(e) = mirror.forward(&event).await {
        warn!(device_id = %event.device_id, error = %e, "mirror forward failed");
    }

    let Some(device) = device else {
        return Ok(IngestOutcome::Relayed {
            device_id: event.device_id,
        });
    };

    thresholds::check_thresholds(mirror, notifier, &event, &device.name).await;

    let record = store.insert_event(&event).await?;
    Ok(IngestOutcome::Stored(record))
}

// ===========================================================================
// Test fakes + tests
// ===========================================================================
