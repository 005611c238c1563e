//! Shared application state handed to every request handler.

use std::sync::Arc;

use crate::crypto::EventCipher;
use crate::pipeline::{DeviceRegistry, EventStore, MirrorStore, Notifier};

/// Collaborators behind trait objects so handler tests can wire in fakes.
/// Cloned per request by axum; everything inside is shared and immutable.
#[derive(Clone)]
pub struct AppState {
    pub cipher: Arc<EventCipher>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub store: Arc<dyn EventStore>,
    pub mirror: Arc<dyn MirrorStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(
        cipher: EventCipher,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn EventStore>,
        mirror: Arc<dyn MirrorStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            cipher: Arc::new(cipher),
            registry,
            store,
            mirror,
            notifier,
        }
    }
}
