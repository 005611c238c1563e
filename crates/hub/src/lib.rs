//! Telemetry hub: receives encrypted sensor events over HTTP, validates
//! them, persists history for registered devices, mirrors every event to an
//! external realtime store, and raises push alerts on threshold breaches.

pub mod config;
pub mod crypto;
pub mod db;
pub mod event;
pub mod mirror;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod thresholds;
pub mod web;
