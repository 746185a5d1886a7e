//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use courier_core::config::{CourierConfig, GatewayConfig};
use courier_scheduler::active_hours::DeliveryPolicy;
use courier_scheduler::rules::{RuleSet, RuleThresholds};
use courier_scheduler::store::{
    ActiveHoursStore, AuditSink, LifecycleStore, MessageStore, UserDirectory,
};
use courier_scheduler::{CourierDb, MessageScheduler, RuleEvaluator};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub start_time: std::time::Instant,
    pub directory: Arc<dyn UserDirectory>,
    pub active_hours: Arc<dyn ActiveHoursStore>,
    pub messages: Arc<dyn MessageStore>,
    pub audit: Arc<dyn AuditSink>,
    pub scheduler: Arc<MessageScheduler>,
    pub evaluator: Arc<RuleEvaluator>,
    pub policy: DeliveryPolicy,
    /// Serializes every lifecycle write (evaluate, mark-*). One writer per
    /// state record at a time is what keeps the one-shot flags at-most-once.
    pub write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    /// Wire up scheduler + evaluator over one shared database handle.
    pub fn from_parts(config: &CourierConfig, db: Arc<CourierDb>) -> Self {
        let directory: Arc<dyn UserDirectory> = db.clone();
        let active_hours: Arc<dyn ActiveHoursStore> = db.clone();
        let messages: Arc<dyn MessageStore> = db.clone();
        let lifecycle: Arc<dyn LifecycleStore> = db.clone();
        let audit: Arc<dyn AuditSink> = db.clone();
        let policy = DeliveryPolicy::new(config.rules.wraparound_windows);

        let scheduler = Arc::new(MessageScheduler::new(
            directory.clone(),
            active_hours.clone(),
            messages.clone(),
            lifecycle.clone(),
            audit.clone(),
            policy,
        ));
        let evaluator = Arc::new(RuleEvaluator::new(
            directory.clone(),
            active_hours.clone(),
            messages.clone(),
            lifecycle,
            audit.clone(),
            policy,
            RuleSet::standard(RuleThresholds::from(&config.rules)),
        ));

        Self {
            gateway_config: config.gateway.clone(),
            start_time: std::time::Instant::now(),
            directory,
            active_hours,
            messages,
            audit,
            scheduler,
            evaluator,
            policy,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let api = Router::new()
        .route("/api/v1/info", get(super::routes::system_info))
        // Messages
        .route("/api/v1/messages/send", post(super::routes::send_message))
        .route(
            "/api/v1/messages/schedule",
            post(super::routes::schedule_message),
        )
        .route("/api/v1/messages/{id}", get(super::routes::get_message))
        .route(
            "/api/v1/messages/{id}/status",
            get(super::routes::message_status),
        )
        .route(
            "/api/v1/messages/{id}/delivered",
            post(super::routes::mark_delivered),
        )
        .route("/api/v1/messages/{id}/read", post(super::routes::mark_read))
        .route(
            "/api/v1/messages/{id}/replied",
            post(super::routes::mark_replied),
        )
        .route(
            "/api/v1/messages/{id}/evaluate",
            post(super::routes::evaluate_rules),
        )
        // Users and their windows
        .route("/api/v1/users", get(super::routes::list_users))
        .route("/api/v1/users", post(super::routes::upsert_user))
        .route(
            "/api/v1/users/{id}/sent",
            get(super::routes::messages_sent),
        )
        .route(
            "/api/v1/users/{id}/received",
            get(super::routes::messages_received),
        )
        .route(
            "/api/v1/users/{id}/active-hours",
            get(super::routes::get_active_hours),
        )
        .route(
            "/api/v1/users/{id}/active-hours",
            put(super::routes::set_active_hours),
        )
        .route(
            "/api/v1/users/{id}/deliverable",
            get(super::routes::deliverability),
        )
        // Audit trail
        .route("/api/v1/audit", get(super::routes::audit_all))
        .route(
            "/api/v1/audit/user/{id}",
            get(super::routes::audit_for_user),
        )
        .route(
            "/api/v1/audit/message/{id}",
            get(super::routes::audit_for_message),
        )
        // Sandbox seeding
        .route("/api/v1/seed", post(super::routes::seed_sandbox_users))
        // Health check
        .route("/health", get(super::routes::health_check));

    api.layer({
        let cors = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(Any)
            .max_age(std::time::Duration::from_secs(3600));

        // Restrict CORS origins in production via env var
        // Example: COURIER_CORS_ORIGINS=https://courier.example.com
        if let Ok(origins_str) = std::env::var("COURIER_CORS_ORIGINS") {
            let origins: Vec<_> = origins_str
                .split(',')
                .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins)
        } else {
            cors.allow_origin(Any)
        }
    })
    .layer(TraceLayer::new_for_http())
    .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &CourierConfig) -> anyhow::Result<()> {
    let db_path = config.storage.resolved_db_path();
    let db = Arc::new(CourierDb::open(&db_path)?);
    tracing::info!("💾 Courier DB opened: {}", db_path.display());

    let state = AppState::from_parts(config, db);
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Courier gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
