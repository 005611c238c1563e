//! HTTP surface: ingest endpoint, history queries, device listing, and the
//! static listing page.

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

use crate::db::{is_valid_date, today_date};
use crate::pipeline::{self, IngestError, IngestOutcome};
use crate::state::AppState;

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Latest-history fetch returns at most this many records.
const LATEST_LIMIT: i64 = 5;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/history", get(list_history).post(store_event))
        .route("/api/history/latest", get(latest_history))
        .route("/api/devices", get(list_devices))
        .with_state(state)
}

async fn index_page() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

// ---------------------------------------------------------------------------
// Ingest (store)
// ---------------------------------------------------------------------------

async fn store_event(State(state): State<AppState>, body: Bytes) -> Response {
    let outcome = pipeline::ingest(
        &state.cipher,
        state.registry.as_ref(),
        state.store.as_ref(),
        state.mirror.as_ref(),
        state.notifier.as_ref(),
        &body,
    )
    .await;

    match outcome {
        Ok(IngestOutcome::Stored(record)) => Json(json!({
            "success": true,
            "message": "Data stored successfully",
            "data": record,
        }))
        .into_response(),
        Ok(IngestOutcome::Relayed { .. }) => Json(json!({
            "success": true,
            "message": "Device not found, but data was relayed",
        }))
        .into_response(),
        Err(err) => ingest_error_response(err),
    }
}

/// Every ingest failure surfaces as a 400 client-error envelope; the kinds
/// only differ in message shape. Internal faults additionally hit the log.
fn ingest_error_response(err: IngestError) -> Response {
    let payload = match &err {
        IngestError::Validation(errors) => json!({
            "success": false,
            "message": "Validation failed",
            "errors": errors,
        }),
        IngestError::Internal(e) => {
            error!(error = %format!("{e:#}"), "ingest failed");
            json!({ "success": false, "message": err.to_string() })
        }
        _ => json!({ "success": false, "message": err.to_string() }),
    };
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

// ---------------------------------------------------------------------------
// History queries
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LatestParams {
    device_id: Option<String>,
}

async fn latest_history(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Response {
    let Some(device_id) = params.device_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "device_id is required");
    };

    let device = match state.registry.find_device(&device_id).await {
        Ok(device) => device,
        Err(e) => return internal_error(e),
    };
    if device.is_none() {
        return error_response(StatusCode::NOT_FOUND, "Device not found.");
    }

    match state.store.recent_for_device(&device_id, LATEST_LIMIT).await {
        Ok(records) if records.is_empty() => {
            error_response(StatusCode::NOT_FOUND, "No sensor data found.")
        }
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    start_date: Option<String>,
    end_date: Option<String>,
    device_id: Option<String>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    // Empty form inputs arrive as empty strings; both default to today.
    let start_date = params
        .start_date
        .filter(|s| !s.is_empty())
        .unwrap_or_else(today_date);
    let end_date = params
        .end_date
        .filter(|s| !s.is_empty())
        .unwrap_or_else(today_date);

    for date in [&start_date, &end_date] {
        if !is_valid_date(date) {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("'{date}' is not a valid YYYY-MM-DD date"),
            );
        }
    }

    // Inclusive day bounds.
    let start = format!("{start_date} 00:00:00");
    let end = format!("{end_date} 23:59:59");
    let device_id = params.device_id.filter(|id| !id.is_empty());

    match state
        .store
        .records_between(&start, &end, device_id.as_deref())
        .await
    {
        Ok(records) => Json(json!({
            "success": true,
            "start_date": start_date,
            "end_date": end_date,
            "data": records,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_devices(State(state): State<AppState>) -> Response {
    match state.registry.list_devices().await {
        Ok(devices) => Json(devices).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    error!(error = %format!("{e:#}"), "query failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "hub listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EventCipher, KEY_LEN};
    use crate::db::Db;
    use crate::event::SensorEvent;
    use crate::pipeline::fakes::{FakeMirror, FakeNotifier};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const TEST_KEY: [u8; KEY_LEN] = [5u8; KEY_LEN];

    struct Harness {
        router: Router,
        db: Db,
        mirror: Arc<FakeMirror>,
        notifier: Arc<FakeNotifier>,
    }

    /// Real sqlite-in-memory registry/store, fake mirror/notifier.
    async fn harness_with(devices: &[(&str, &str)], mirror: FakeMirror) -> Harness {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        for (id, name) in devices {
            db.upsert_device(&crate::db::Device {
                id: id.to_string(),
                name: name.to_string(),
            })
            .await
            .unwrap();
        }

        let mirror = Arc::new(mirror);
        let notifier = Arc::new(FakeNotifier::default());
        let state = AppState::new(
            EventCipher::new(TEST_KEY),
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            mirror.clone(),
            notifier.clone(),
        );

        Harness {
            router: router(state),
            db,
            mirror,
            notifier,
        }
    }

    async fn harness(devices: &[(&str, &str)]) -> Harness {
        harness_with(devices, FakeMirror::default()).await
    }

    fn seal(value: &Value) -> String {
        EventCipher::new(TEST_KEY).encrypt(&serde_json::to_vec(value).unwrap())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn post_store(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/history")
            .body(body.into())
            .unwrap()
    }

    // -- store ---------------------------------------------------------------

    #[tokio::test]
    async fn store_persists_for_known_device() {
        let h = harness(&[("dev-1", "Server Room")]).await;

        let body = seal(&json!({ "device_id": "dev-1", "temperature": 22.5, "motion": 1 }));
        let (status, json) = send(&h.router, post_store(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["device_id"], "dev-1");
        assert_eq!(json["data"]["temperature"], 22.5);
        assert_eq!(json["data"]["motion"], true);
        assert!(json["data"]["recorded_at"].is_string());

        let records = crate::pipeline::EventStore::recent_for_device(&h.db, "dev-1", 5)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(h.mirror.forwards.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_unknown_device_relays_without_history() {
        let h = harness(&[("dev-1", "Server Room")]).await;

        let body = seal(&json!({ "device_id": "ghost", "smoke": 5 }));
        let (status, json) = send(&h.router, post_store(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(json["message"].as_str().unwrap().contains("relayed"));

        let records = crate::pipeline::EventStore::recent_for_device(&h.db, "ghost", 5)
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(h.mirror.forwards.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_empty_body_is_400() {
        let h = harness(&[]).await;
        let (status, json) = send(&h.router, post_store(Body::empty())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Encrypted data is required.");
    }

    #[tokio::test]
    async fn store_undecryptable_body_is_400() {
        let h = harness(&[]).await;
        let (status, json) = send(&h.router, post_store("not an envelope")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Decrypted data is not valid JSON.");
    }

    #[tokio::test]
    async fn store_missing_device_id_reports_field_error() {
        let h = harness(&[]).await;
        let body = seal(&json!({ "temperature": 21 }));
        let (status, json) = send(&h.router, post_store(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Validation failed");
        assert_eq!(json["errors"]["device_id"][0], "device_id is required");
    }

    #[tokio::test]
    async fn store_breach_dispatches_notification() {
        let mirror = FakeMirror::with_thresholds(&[("asap", 50.0)]);
        let h = harness_with(&[("dev-1", "Warehouse")], mirror).await;

        let body = seal(&json!({ "device_id": "dev-1", "smoke": 80 }));
        let (status, _) = send(&h.router, post_store(body)).await;
        assert_eq!(status, StatusCode::OK);

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Warning Warehouse");
        assert_eq!(sent[0].1, "Smoke level is above threshold");
    }

    #[tokio::test]
    async fn store_below_threshold_stays_quiet() {
        let mirror = FakeMirror::with_thresholds(&[("asap", 50.0)]);
        let h = harness_with(&[("dev-1", "Warehouse")], mirror).await;

        let body = seal(&json!({ "device_id": "dev-1", "smoke": 40 }));
        send(&h.router, post_store(body)).await;

        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    // -- latest --------------------------------------------------------------

    async fn seed_history(db: &Db, device_id: &str, stamps: &[&str]) {
        for ts in stamps {
            db.insert_event_at(
                &SensorEvent {
                    device_id: device_id.to_string(),
                    temperature: Some(20.0),
                    humidity: None,
                    smoke: None,
                    motion: None,
                },
                ts,
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn latest_returns_fewer_than_limit_newest_first() {
        let h = harness(&[("dev-1", "Server Room")]).await;
        seed_history(
            &h.db,
            "dev-1",
            &["2026-08-01 10:00:00", "2026-08-01 12:00:00"],
        )
        .await;

        let request = Request::builder()
            .uri("/api/history/latest?device_id=dev-1")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::OK);
        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["recorded_at"], "2026-08-01 12:00:00");
        assert_eq!(records[1]["recorded_at"], "2026-08-01 10:00:00");
    }

    #[tokio::test]
    async fn latest_caps_at_five_records() {
        let h = harness(&[("dev-1", "Server Room")]).await;
        let stamps: Vec<String> = (10..17)
            .map(|h| format!("2026-08-01 {h}:00:00"))
            .collect();
        let stamp_refs: Vec<&str> = stamps.iter().map(String::as_str).collect();
        seed_history(&h.db, "dev-1", &stamp_refs).await;

        let request = Request::builder()
            .uri("/api/history/latest?device_id=dev-1")
            .body(Body::empty())
            .unwrap();
        let (_, json) = send(&h.router, request).await;

        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0]["recorded_at"], "2026-08-01 16:00:00");
    }

    #[tokio::test]
    async fn latest_with_no_records_is_404() {
        let h = harness(&[("dev-1", "Server Room")]).await;

        let request = Request::builder()
            .uri("/api/history/latest?device_id=dev-1")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn latest_unknown_device_is_404() {
        let h = harness(&[]).await;

        let request = Request::builder()
            .uri("/api/history/latest?device_id=ghost")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Device not found.");
    }

    #[tokio::test]
    async fn latest_without_device_id_is_400() {
        let h = harness(&[]).await;

        let request = Request::builder()
            .uri("/api/history/latest")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- listing -------------------------------------------------------------

    #[tokio::test]
    async fn listing_filters_by_inclusive_range() {
        let h = harness(&[("dev-1", "Server Room")]).await;
        seed_history(
            &h.db,
            "dev-1",
            &[
                "2026-08-09 23:59:59",
                "2026-08-10 00:00:00",
                "2026-08-11 12:00:00",
                "2026-08-12 23:59:59",
                "2026-08-13 00:00:00",
            ],
        )
        .await;

        let request = Request::builder()
            .uri("/api/history?start_date=2026-08-10&end_date=2026-08-12")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::OK);
        let records = json["data"].as_array().unwrap();
        let stamps: Vec<&str> = records
            .iter()
            .map(|r| r["recorded_at"].as_str().unwrap())
            .collect();
        assert_eq!(
            stamps,
            vec![
                "2026-08-12 23:59:59",
                "2026-08-11 12:00:00",
                "2026-08-10 00:00:00",
            ]
        );
    }

    #[tokio::test]
    async fn listing_filters_by_device() {
        let h = harness(&[("dev-1", "A"), ("dev-2", "B")]).await;
        seed_history(&h.db, "dev-1", &["2026-08-10 10:00:00"]).await;
        seed_history(&h.db, "dev-2", &["2026-08-10 11:00:00"]).await;

        let request = Request::builder()
            .uri("/api/history?start_date=2026-08-10&end_date=2026-08-10&device_id=dev-2")
            .body(Body::empty())
            .unwrap();
        let (_, json) = send(&h.router, request).await;

        let records = json["data"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["device_id"], "dev-2");
    }

    #[tokio::test]
    async fn listing_defaults_to_today() {
        let h = harness(&[("dev-1", "Server Room")]).await;
        // One record stamped now, one long past.
        let record = crate::pipeline::EventStore::insert_event(
            &h.db,
            &SensorEvent {
                device_id: "dev-1".to_string(),
                temperature: None,
                humidity: None,
                smoke: None,
                motion: None,
            },
        )
        .await
        .unwrap();
        seed_history(&h.db, "dev-1", &["2000-01-01 00:00:00"]).await;

        let request = Request::builder()
            .uri("/api/history")
            .body(Body::empty())
            .unwrap();
        let (_, json) = send(&h.router, request).await;

        assert_eq!(json["start_date"], json["end_date"]);
        let records = json["data"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], record.id);
    }

    #[tokio::test]
    async fn listing_rejects_malformed_dates() {
        let h = harness(&[]).await;

        let request = Request::builder()
            .uri("/api/history?start_date=tomorrow")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    // -- devices / page --------------------------------------------------------

    #[tokio::test]
    async fn devices_endpoint_lists_registry() {
        let h = harness(&[("dev-1", "A"), ("dev-2", "B")]).await;

        let request = Request::builder()
            .uri("/api/devices")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&h.router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn index_page_serves_html() {
        let h = harness(&[]).await;
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }
}
