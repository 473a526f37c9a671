//! mock_parser.rs — Stand-in for the external trace parser service
//!
//! Serves `POST /api/upload` with the same multipart request and JSON response
//! shape as the real parser, but the curve is synthetic: the uploaded file is
//! never decoded, only its name and byte size are used.
//!
//! Failure shape matches the real service:
//! - no `file` part            → 400 `{"error": "No file part in the request"}`
//! - empty filename            → 400 `{"error": "No file selected"}`
//! - analysis failure (random) → 500 `{"error": "Failed to analyze sor file with error ..."}`

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use otdr_types::{ParserErrorBody, ParserResponse};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::scenarios::synthesize_from_upload;
use crate::trace_physics::PhysicsConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockParserConfig {
    pub port:      u16,
    /// Keep every n-th sample in responses (the real service sends every 10th)
    pub decimate:  usize,
    /// Probability that an upload fails with a simulated analysis error
    pub fail_rate: f64,
}

impl Default for MockParserConfig {
    fn default() -> Self {
        Self { port: 8000, decimate: 10, fail_rate: 0.0 }
    }
}

#[derive(Clone)]
struct MockParserState {
    physics: Arc<PhysicsConfig>,
    cfg:     Arc<MockParserConfig>,
}

type UploadResult = Result<Json<ParserResponse>, (StatusCode, Json<ParserErrorBody>)>;

pub fn router(physics: PhysicsConfig, cfg: MockParserConfig) -> Router {
    let state = MockParserState {
        physics: Arc::new(physics),
        cfg:     Arc::new(cfg),
    };
    Router::new()
        .route("/api/upload", post(upload))
        .route("/health", get(|| async { "otdr-sim ok" }))
        .with_state(state)
}

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ParserErrorBody>) {
    (status, Json(ParserErrorBody { error: message.into() }))
}

async fn upload(State(state): State<MockParserState>, mut multipart: Multipart) -> UploadResult {
    let mut upload: Option<(String, u64)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return Err(reject(StatusCode::BAD_REQUEST, format!("Malformed upload: {e}"))),
        };
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("Malformed upload: {e}")))?;
        upload = Some((file_name, bytes.len() as u64));
    }

    let Some((file_name, size)) = upload else {
        return Err(reject(StatusCode::BAD_REQUEST, "No file part in the request"));
    };
    if file_name.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "No file selected"));
    }

    respond(&file_name, size, Utc::now(), &state.physics, &state.cfg, &mut rand::thread_rng())
}

fn respond(
    file_name: &str,
    size: u64,
    now: DateTime<Utc>,
    physics: &PhysicsConfig,
    cfg: &MockParserConfig,
    rng: &mut impl Rng,
) -> UploadResult {
    if rng.gen_bool(cfg.fail_rate.clamp(0.0, 1.0)) {
        warn!("Mock parser: injecting analysis failure for {file_name}");
        return Err(reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to analyze sor file with error simulated analysis failure",
        ));
    }

    let body = build_response(file_name, size, now, physics, cfg.decimate, rng);
    info!(
        "Mock parser: {file_name} ({size} bytes) → {} samples, {} events",
        body.distance.len(),
        body.events.len()
    );
    Ok(Json(body))
}

/// Response body for one upload. Samples are decimated the way the real
/// service thins them before sending.
pub fn build_response(
    file_name: &str,
    size: u64,
    now: DateTime<Utc>,
    physics: &PhysicsConfig,
    decimate: usize,
    rng: &mut impl Rng,
) -> ParserResponse {
    let trace = synthesize_from_upload(String::new(), file_name, size, now, physics, rng);
    let mut body = ParserResponse::from_trace(&trace);

    let step = decimate.max(1);
    body.distance = trace.distance.iter().step_by(step).copied().collect();
    body.power = trace.power.iter().step_by(step).copied().collect();
    body.info = Some(serde_json::json!({
        "logs": format!(
            "Successfully analyzed sor file with {} events",
            trace.events.len()
        ),
    }));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_response_is_decimated_and_convertible() {
        let physics = PhysicsConfig::default();
        let now: DateTime<Utc> = "2024-03-01T14:15:00Z".parse().unwrap();
        let body = build_response("a.sor", 60_000, now, &physics, 10, &mut StdRng::seed_from_u64(5));

        // 6 km at 0.01 km → 601 samples → every 10th → 61
        assert_eq!(body.distance.len(), 61);
        assert_eq!(body.power.len(), 61);
        assert_eq!(body.timestamp, 1_709_302_500);
        assert_eq!(body.file_name, "a.sor");

        let trace = body.into_trace("x".into()).unwrap();
        assert_eq!(trace.timestamp, now);
    }

    #[test]
    fn test_fail_rate_one_always_rejects() {
        let cfg = MockParserConfig { fail_rate: 1.0, ..Default::default() };
        let res = respond(
            "a.sor",
            1,
            Utc::now(),
            &PhysicsConfig::default(),
            &cfg,
            &mut StdRng::seed_from_u64(0),
        );
        let (status, Json(body)) = res.err().unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error.starts_with("Failed to analyze sor file"));
    }
}
