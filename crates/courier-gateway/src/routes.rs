//! API route handlers for the gateway.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use courier_core::CourierError;
use courier_scheduler::active_hours::ActiveHours;
use courier_scheduler::clock;
use courier_scheduler::store::seed_sandbox;

use super::server::AppState;

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(err: CourierError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        CourierError::InvalidParticipant(_) | CourierError::InvalidTimestamp(_) => {
            StatusCode::BAD_REQUEST
        }
        CourierError::MessageNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": err.to_string()})),
    )
}

fn not_found(what: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"ok": false, "error": format!("{what} not found")})),
    )
}

/// Optional `{"at": "2026-01-15T12:00:00Z"}` override on mark/evaluate calls,
/// so elapsed-time behavior can be exercised without waiting wall-clock time.
#[derive(Deserialize, Default)]
pub struct AtBody {
    pub at: Option<String>,
}

fn resolve_at(body: Option<Json<AtBody>>) -> Result<DateTime<Utc>, (StatusCode, Json<serde_json::Value>)> {
    match body.and_then(|Json(b)| b.at) {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|_| api_error(CourierError::InvalidTimestamp(s))),
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "courier-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    Json(serde_json::json!({
        "service": "courier",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": uptime.as_secs(),
        "gateway": {
            "host": state.gateway_config.host,
            "port": state.gateway_config.port,
        },
        "users": state.directory.list_users().len(),
    }))
}

// ─── Messages ─────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SendRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// Send a message now; delivered or delayed per the receiver's window.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> ApiResult {
    let _guard = state.write_lock.lock().await;
    let record = state
        .scheduler
        .send_now(&req.sender_id, &req.receiver_id, &req.content, Utc::now())
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "message": record})))
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Wall-clock time in the sender's timezone, e.g. "2026-03-01T15:00".
    pub deliver_at: String,
}

/// Schedule a message for a sender-local wall-clock time.
pub async fn schedule_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult {
    let _guard = state.write_lock.lock().await;
    let record = state
        .scheduler
        .schedule(
            &req.sender_id,
            &req.receiver_id,
            &req.content,
            &req.deliver_at,
            Utc::now(),
        )
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "message": record})))
}

/// Fetch one message record.
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let record = state.messages.find(&id).ok_or_else(|| not_found("message"))?;
    Ok(Json(serde_json::json!({"ok": true, "message": record})))
}

/// Computed status (replied > read > delivered priority).
pub async fn message_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let view = state.scheduler.message_status(&id).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "status": view})))
}

pub async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AtBody>>,
) -> ApiResult {
    let at = resolve_at(body)?;
    let _guard = state.write_lock.lock().await;
    let view = state.scheduler.mark_delivered(&id, at).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "status": view})))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AtBody>>,
) -> ApiResult {
    let at = resolve_at(body)?;
    let _guard = state.write_lock.lock().await;
    let view = state.scheduler.mark_read(&id, at).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "status": view})))
}

pub async fn mark_replied(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AtBody>>,
) -> ApiResult {
    let at = resolve_at(body)?;
    let _guard = state.write_lock.lock().await;
    let view = state.scheduler.mark_replied(&id, at).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "status": view})))
}

/// Run one rule-evaluation pass over a message.
pub async fn evaluate_rules(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<AtBody>>,
) -> ApiResult {
    let now = resolve_at(body)?;
    let _guard = state.write_lock.lock().await;
    let evaluation = state
        .evaluator
        .evaluate_message(&id, now)
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "evaluation": evaluation})))
}

// ─── Users and windows ────────────────────────────────────────

pub async fn list_users(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let users: Vec<_> = state
        .directory
        .list_users()
        .into_iter()
        .map(|(user_id, timezone)| {
            let hours = state.active_hours.get(&user_id);
            serde_json::json!({
                "user_id": user_id,
                "timezone": timezone,
                "active_hours": hours,
            })
        })
        .collect();
    Json(serde_json::json!({"ok": true, "users": users}))
}

#[derive(Deserialize)]
pub struct UpsertUserRequest {
    pub user_id: String,
    pub timezone: String,
}

pub async fn upsert_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpsertUserRequest>,
) -> ApiResult {
    state
        .directory
        .upsert_user(&req.user_id, &req.timezone)
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "user_id": req.user_id})))
}

/// Messages sent by a user, newest first.
pub async fn messages_sent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "messages": state.messages.by_sender(&id)}))
}

/// Messages received by a user, newest first.
pub async fn messages_received(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "messages": state.messages.by_receiver(&id)}))
}

pub async fn get_active_hours(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let hours = state.active_hours.get(&id).ok_or_else(|| not_found("active hours"))?;
    Ok(Json(serde_json::json!({"ok": true, "user_id": id, "active_hours": hours})))
}

#[derive(Deserialize)]
pub struct SetHoursRequest {
    pub start_hour: u32,
    pub end_hour: u32,
}

pub async fn set_active_hours(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetHoursRequest>,
) -> ApiResult {
    if req.start_hour > 23 || req.end_hour > 23 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": "hours must be 0-23"})),
        ));
    }
    let hours = ActiveHours::new(req.start_hour, req.end_hour);
    state.active_hours.set(&id, hours).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "user_id": id, "active_hours": hours})))
}

/// Deliverability probe: is this user inside their window right now, and if
/// not, when does it next open?
pub async fn deliverability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let timezone = state
        .directory
        .find_timezone(&id)
        .ok_or_else(|| not_found("user"))?;
    let now = Utc::now();
    let local_hour = clock::local_hour(now, &timezone);
    let hours = state.active_hours.get(&id);
    let deliverable = state.policy.can_deliver_now(local_hour, hours.as_ref());
    let next_slot = if deliverable {
        None
    } else {
        hours.map(|h| state.policy.next_allowed_delivery(now, &timezone, &h))
    };
    Ok(Json(serde_json::json!({
        "ok": true,
        "user_id": id,
        "timezone": timezone,
        "local_time": clock::local_string(now, &timezone),
        "local_hour": local_hour,
        "active_hours": hours,
        "deliverable": deliverable,
        "next_slot": next_slot,
    })))
}

// ─── Audit trail ──────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct AuditQuery {
    /// Filter by event type, e.g. `?type=rule_fired`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

pub async fn audit_all(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<AuditQuery>,
) -> Json<serde_json::Value> {
    let events = match query.event_type {
        Some(tag) => state.audit.by_type(&tag),
        None => state.audit.all(),
    };
    Json(serde_json::json!({"ok": true, "events": events}))
}

pub async fn audit_for_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "events": state.audit.for_user(&id)}))
}

pub async fn audit_for_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "events": state.audit.for_reference(&id)}))
}

// ─── Sandbox ──────────────────────────────────────────────────

/// Seed the three demo users and their windows.
pub async fn seed_sandbox_users(State(state): State<Arc<AppState>>) -> ApiResult {
    seed_sandbox(&*state.directory, &*state.active_hours).map_err(api_error)?;
    Ok(Json(serde_json::json!({"ok": true, "seeded": 3})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{build_router, AppState};
    use courier_core::config::CourierConfig;
    use courier_scheduler::CourierDb;
    use tower::util::ServiceExt;

    fn test_state(name: &str) -> AppState {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("gateway-test.db");
        std::fs::remove_file(&path).ok();
        let db = Arc::new(CourierDb::open(&path).unwrap());
        AppState::from_parts(&CourierConfig::default(), db)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state("courier-gw-health"));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_seed_then_send_roundtrip() {
        let app = build_router(test_state("courier-gw-send"));

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/seed")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/messages/send")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({
                            "sender_id": "user_us",
                            "receiver_id": "user_ng",
                            "content": "hello"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        let status = json["message"]["status"].as_str().unwrap();
        assert!(status == "delivered" || status == "delayed");
    }

    #[tokio::test]
    async fn test_unknown_sender_is_bad_request() {
        let app = build_router(test_state("courier-gw-badsender"));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/messages/send")
                    .header("Content-Type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({
                            "sender_id": "ghost",
                            "receiver_id": "ghost2",
                            "content": "x"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_message_status_not_found() {
        let app = build_router(test_state("courier-gw-notfound"));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/messages/msg-missing/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
