//! TOML config file loading, validation, and device registry seeding.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::crypto::EventCipher;
use crate::db::{Db, Device};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub crypto: CryptoConfig,
    pub mirror: MirrorConfig,
    pub notifier: Option<NotifierConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte key shared with the device fleet.
    pub app_key: String,
}

#[derive(Debug, Deserialize)]
pub struct MirrorConfig {
    pub base_url: String,
    #[serde(default = "default_mirror_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct NotifierConfig {
    pub endpoint: String,
    pub server_key: String,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub name: String,
}

fn default_port() -> u16 {
    8080
}

fn default_db_url() -> String {
    "sqlite:telemetry.db?mode=rwc".to_string()
}

fn default_mirror_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = EventCipher::from_base64(&self.crypto.app_key) {
            errors.push(format!("crypto.app_key: {e}"));
        }

        if self.mirror.base_url.trim().is_empty() {
            errors.push("mirror.base_url is empty".to_string());
        } else if !self.mirror.base_url.starts_with("http://")
            && !self.mirror.base_url.starts_with("https://")
        {
            errors.push(format!(
                "mirror.base_url '{}' must be an http(s) URL",
                self.mirror.base_url
            ));
        }
        if self.mirror.timeout_secs == 0 {
            errors.push("mirror.timeout_secs must be positive".to_string());
        }

        if let Some(n) = &self.notifier {
            if n.endpoint.trim().is_empty() {
                errors.push("notifier.endpoint is empty".to_string());
            }
            if n.server_key.trim().is_empty() {
                errors.push("notifier.server_key is empty".to_string());
            }
            if n.topic.trim().is_empty() {
                errors.push("notifier.topic is empty".to_string());
            }
        }

        self.validate_devices(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_devices(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = || {
                if d.id.is_empty() {
                    format!("devices[{i}]")
                } else {
                    format!("device '{}'", d.id)
                }
            };

            if d.id.trim().is_empty() {
                errors.push(format!("{}: id is empty", ctx()));
            } else if !seen_ids.insert(&d.id) {
                errors.push(format!("{}: duplicate device id", ctx()));
            }

            if d.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert all configured devices into the registry. Registration is owned
/// here; the ingest pipeline only ever looks devices up.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for d in &config.devices {
        db.upsert_device(&Device {
            id: d.id.clone(),
            name: d.name.clone(),
        })
        .await
        .with_context(|| format!("failed to upsert device '{}'", d.id))?;
    }

    tracing::info!(devices = config.devices.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
