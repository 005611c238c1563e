//! SQLite persistence: device registry and sensor history.
//!
//! `Db` owns the pool and the queries; the pipeline talks to it through the
//! [`DeviceRegistry`] and [`EventStore`] traits so tests can swap in fakes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::event::SensorEvent;
use crate::pipeline::{DeviceRegistry, EventStore};

/// Storage format for `recorded_at`: lexicographic order equals
/// chronological order, which the range queries rely on.
const TS_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Current UTC time in storage format.
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&TS_FORMAT)
        .expect("formatting a UTC timestamp cannot fail")
}

/// Today's UTC date as `YYYY-MM-DD` (default bound for the listing filter).
pub fn today_date() -> String {
    OffsetDateTime::now_utc()
        .date()
        .format(&DATE_FORMAT)
        .expect("formatting a UTC date cannot fail")
}

/// Check that a filter input is a well-formed `YYYY-MM-DD` date.
pub fn is_valid_date(s: &str) -> bool {
    time::Date::parse(s, &DATE_FORMAT).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub smoke: Option<f64>,
    pub motion: Option<bool>,
    pub recorded_at: String,
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/telemetry/hub.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Device registry
    // ----------------------------

    pub async fn upsert_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (id, name)
            VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .execute(&self.pool)
        .await
        .context("upsert_device failed")?;
        Ok(())
    }

    pub async fn load_devices(&self) -> Result<Vec<Device>> {
        sqlx::query_as::<_, Device>("SELECT id, name FROM devices ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("load_devices failed")
    }

    // ----------------------------
    // Sensor history
    // ----------------------------

    /// Insert with an explicit timestamp. Only `insert_event` (which stamps
    /// the current time) and tests that need deterministic ordering call
    /// this directly.
    pub(crate) async fn insert_event_at(
        &self,
        event: &SensorEvent,
        recorded_at: &str,
    ) -> Result<HistoryRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_histories
                (device_id, temperature, humidity, smoke, motion, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.device_id)
        .bind(event.temperature)
        .bind(event.humidity)
        .bind(event.smoke)
        .bind(event.motion)
        .bind(recorded_at)
        .execute(&self.pool)
        .await
        .context("insert_event failed")?;

        Ok(HistoryRecord {
            id: result.last_insert_rowid(),
            device_id: event.device_id.clone(),
            temperature: event.temperature,
            humidity: event.humidity,
            smoke: event.smoke,
            motion: event.motion,
            recorded_at: recorded_at.to_string(),
        })
    }
}

#[async_trait]
impl DeviceRegistry for Db {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>("SELECT id, name FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("find_device failed")
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.load_devices().await
    }
}

#[async_trait]
impl EventStore for Db {
    async fn insert_event(&self, event: &SensorEvent) -> Result<HistoryRecord> {
        self.insert_event_at(event, &now_timestamp()).await
    }

    async fn recent_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, device_id, temperature, humidity, smoke, motion, recorded_at
            FROM sensor_histories
            WHERE device_id = ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_for_device failed")
    }

    async fn records_between(
        &self,
        start: &str,
        end: &str,
        device_id: Option<&str>,
    ) -> Result<Vec<HistoryRecord>> {
        let records = match device_id {
            Some(device_id) => {
                sqlx::query_as::<_, HistoryRecord>(
                    r#"
                    SELECT id, device_id, temperature, humidity, smoke, motion, recorded_at
                    FROM sensor_histories
                    WHERE recorded_at BETWEEN ? AND ? AND device_id = ?
                    ORDER BY recorded_at DESC, id DESC
                    "#,
                )
                .bind(start)
                .bind(end)
                .bind(device_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, HistoryRecord>(
                    r#"
                    SELECT id, device_id, temperature, humidity, smoke, motion, recorded_at
                    FROM sensor_histories
                    WHERE recorded_at BETWEEN ? AND ?
                    ORDER BY recorded_at DESC, id DESC
                    "#,
                )
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await
            }
        };
        records.context("records_between failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
