use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sliding_detector::models::{self, ModelSelection};
use sliding_detector::{DetectConfig, DetectError, DetectOverrides, Detection, LevelSummary};

mod inference;

#[derive(Clone)]
struct AppState {
    inference: Arc<inference::InferenceContext>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    classifier: Option<ModelSelection>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    detect: DetectConfig,
    versions: Vec<String>,
    selected: Option<ModelSelection>,
    classifier_loaded: bool,
}

#[derive(Deserialize)]
struct DetectRequest {
    /// Base64 PNG or JPEG.
    image: String,
    #[serde(default)]
    overrides: DetectOverrides,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectResponse {
    request_id: String,
    processed_at: String,
    elapsed_ms: u64,
    candidates: usize,
    levels: Vec<LevelSummary>,
    detections: Vec<Detection>,
}

fn models_dir() -> String {
    std::env::var("MODELS_DIR").unwrap_or_else(|_| "models".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,axum=info,hyper=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = match std::env::var("DETECT_CONFIG") {
        Ok(path) => DetectConfig::from_json_file(&path)
            .with_context(|| format!("failed to load detect config from {path}"))?,
        Err(_) => DetectConfig::default(),
    };
    let state = AppState {
        inference: Arc::new(inference::InferenceContext::new(&models_dir(), config)),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/config", get(config_handler))
        .route("/detect", post(detect_handler))
        .layer(DefaultBodyLimit::max(16 << 20))
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_origin(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = std::env::var("DETECT_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()
        .context("invalid DETECT_ADDR")?;
    info!("listening" = %addr, "event" = "server.start");

    let listener = TcpListener::bind(addr).await.context("failed to bind")?;
    if let Err(err) = axum::serve(listener, app).await {
        error!(%err, "server error");
    }
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthResponse {
        status: if state.inference.classifier.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        classifier: state.inference.selected_model.clone(),
    };
    (StatusCode::OK, Json(body))
}

async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = ConfigResponse {
        detect: state.inference.config.clone(),
        versions: models::inspect_models_dir(models_dir()),
        selected: state.inference.selected_model.clone(),
        classifier_loaded: state.inference.classifier.is_some(),
    };
    (StatusCode::OK, Json(body))
}

fn error_body(status: StatusCode, message: String) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": message })))
}

async fn detect_handler(
    State(state): State<AppState>,
    Json(req): Json<DetectRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Some(classifier) = state.inference.classifier.clone() else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "no classifier loaded".to_string());
    };
    let config = state.inference.config.with_overrides(&req.overrides);
    if let Err(err) = config.validate() {
        return error_body(StatusCode::BAD_REQUEST, err.to_string());
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(req.image.as_bytes()) {
        Ok(b) => b,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, format!("invalid base64: {err}")),
    };
    let gray = match image::load_from_memory(&bytes) {
        Ok(img) => img.to_luma8(),
        Err(err) => return error_body(StatusCode::BAD_REQUEST, format!("invalid image: {err}")),
    };
    info!("event" = "detect.request", request_id = %request_id, width = gray.width(), height = gray.height());

    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || {
        sliding_detector::detect_with_summary(&classifier, &gray, &config, FilterType::Triangle)
    })
    .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let summary = match result {
        Ok(Ok(summary)) => summary,
        Ok(Err(DetectError::Config(err))) => return error_body(StatusCode::BAD_REQUEST, err.to_string()),
        Ok(Err(err)) => {
            warn!("event" = "detect.fail", request_id = %request_id, error = %err);
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
        Err(err) => {
            error!("event" = "detect.fail", request_id = %request_id, error = %err);
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "detection task failed".to_string());
        }
    };

    let processed_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    let body = DetectResponse {
        request_id,
        processed_at,
        elapsed_ms,
        candidates: summary.candidates,
        levels: summary.levels,
        detections: summary.detections,
    };
    match serde_json::to_value(&body) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(err) => error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
