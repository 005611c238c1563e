use anyhow::Result;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use telemetry_hub::config;
use telemetry_hub::crypto::EventCipher;
use telemetry_hub::db::Db;
use telemetry_hub::mirror::RealtimeMirror;
use telemetry_hub::notify::{FcmNotifier, LogNotifier};
use telemetry_hub::pipeline::Notifier;
use telemetry_hub::state::AppState;
use telemetry_hub::web;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // --- Config file -------------------------------------------------
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // Env overrides for the deploy-specific knobs.
    let db_url = env::var("DB_URL").unwrap_or_else(|_| cfg.database.url.clone());
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(cfg.server.port);
    let app_key = env::var("APP_KEY").unwrap_or_else(|_| cfg.crypto.app_key.clone());

    // --- Database ----------------------------------------------------
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // Seed the device registry from config, which is the source of truth.
    config::apply(&cfg, &db).await?;
    let devices = db.load_devices().await?;
    if devices.is_empty() {
        tracing::warn!("no devices registered, all events will take the relay-only path");
    }
    tracing::info!(devices = devices.len(), "db ready");

    // --- Collaborators -----------------------------------------------
    let cipher = EventCipher::from_base64(&app_key)?;
    let mirror = RealtimeMirror::new(
        &cfg.mirror.base_url,
        Duration::from_secs(cfg.mirror.timeout_secs),
    )?;
    let notifier: Arc<dyn Notifier> = match &cfg.notifier {
        Some(n) => Arc::new(FcmNotifier::new(&n.endpoint, &n.server_key, &n.topic)?),
        None => {
            tracing::warn!("no [notifier] configured, breaches will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(
        cipher,
        Arc::new(db.clone()),
        Arc::new(db),
        Arc::new(mirror),
        notifier,
    );

    // --- Web server --------------------------------------------------
    web::serve(state, port).await
}
