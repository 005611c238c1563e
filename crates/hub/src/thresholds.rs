//! Threshold monitor: compares a sensor event against per-device limits
//! hosted on the mirror store and raises broadcast alerts on breach.

use tracing::info;

use crate::event::SensorEvent;
use crate::pipeline::{MirrorStore, Notifier};

/// The three monitored metrics. The mirror keys its threshold nodes by the
/// legacy slugs the installed fleet already writes under, so those stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Smoke,
    Humidity,
    Temperature,
}

impl Metric {
    /// Checked in this order; each breach dispatches independently.
    pub const ALL: [Metric; 3] = [Metric::Smoke, Metric::Humidity, Metric::Temperature];

    /// Path segment of the threshold node on the mirror store.
    pub fn slug(&self) -> &'static str {
        match self {
            Metric::Smoke => "asap",
            Metric::Humidity => "kelembapan",
            Metric::Temperature => "suhu",
        }
    }

    /// Notification body for a breach of this metric.
    pub fn alert_body(&self) -> &'static str {
        match self {
            Metric::Smoke => "Smoke level is above threshold",
            Metric::Humidity => "Humidity level is above threshold",
            Metric::Temperature => "Temperature is above threshold",
        }
    }

    fn reading(&self, event: &SensorEvent) -> Option<f64> {
        match self {
            Metric::Smoke => event.smoke,
            Metric::Humidity => event.humidity,
            Metric::Temperature => event.temperature,
        }
    }
}

/// Fetch each limit fresh from the mirror and alert on every metric whose
/// reading strictly exceeds it. An absent reading or an absent/null limit
/// means no breach for that metric. Up to three notifications per event; no
/// de-duplication across repeated breaches.
pub async fn check_thresholds(
    mirror: &dyn MirrorStore,
    notifier: &dyn Notifier,
    event: &SensorEvent,
    device_name: &str,
) {
    for metric in Metric::ALL {
        let Some(value) = metric.reading(event) else {
            continue;
        };
        let Some(limit) = mirror.fetch_threshold(&event.device_id, metric).await else {
            continue;
        };
        if value > limit {
            info!(
                device_id = %event.device_id,
                metric = metric.slug(),
                value,
                limit,
                "threshold breached"
            );
            notifier
                .notify(&format!("Warning {device_name}"), metric.alert_body())
                .await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
