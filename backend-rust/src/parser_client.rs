//! # parser_client
//!
//! HTTP client for the external trace parser service.
//!
//! The service decodes binary trace files and runs event detection; this
//! module only speaks its contract:
//!   - request: `POST <PARSER_URL>` multipart with a single `file` part
//!   - success: JSON [`ParserResponse`] with parallel `distance`/`power` arrays
//!   - failure: non-2xx status and/or a JSON `error` field
//!
//! A JSON `error` string is surfaced verbatim as the error message so the UI
//! shows exactly what the parser said.

use std::time::Duration;

use otdr_types::{ParserResponse, Trace, TraceError};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ingest::FileUpload;

#[derive(Debug, Error)]
pub enum ParserError {
    /// The service answered with an `error` field
    #[error("{0}")]
    Rejected(String),

    #[error("Parser returned HTTP {0}")]
    Status(u16),

    #[error("Failed to reach parser service: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed parser response: {0}")]
    Malformed(String),

    #[error("Invalid trace from parser: {0}")]
    InvalidTrace(#[from] TraceError),
}

pub struct ParserClient {
    http: reqwest::Client,
    upload_url: String,
}

impl ParserClient {
    pub fn new(upload_url: &str, timeout: Duration) -> Result<Self, ParserError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, upload_url: upload_url.to_string() })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Send `upload` to the parser and convert its answer into a trace with id `id`.
    pub async fn parse(&self, upload: &FileUpload, id: String) -> Result<Trace, ParserError> {
        let part = Part::bytes(upload.bytes.clone()).file_name(upload.file_name.clone());
        let form = Form::new().part("file", part);

        debug!("Parser: POST {} ({} bytes)", self.upload_url, upload.size());
        let res = self.http.post(&self.upload_url).multipart(form).send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        // Look for `error` before committing to the full response shape: a
        // failure body may carry other fields in any form.
        let value = match serde_json::from_slice::<Value>(&body) {
            Ok(v) => v,
            Err(e) if status.is_success() => return Err(ParserError::Malformed(e.to_string())),
            Err(_) => return Err(ParserError::Status(status.as_u16())),
        };

        if let Some(message) = value.get("error").and_then(Value::as_str) {
            warn!("Parser rejected {}: {message}", upload.file_name);
            return Err(ParserError::Rejected(message.to_string()));
        }
        if !status.is_success() {
            return Err(ParserError::Status(status.as_u16()));
        }

        let parsed = serde_json::from_value::<ParserResponse>(value)
            .map_err(|e| ParserError::Malformed(e.to_string()))?;
        Ok(parsed.into_trace(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use otdr_simulator::mock_parser::{self, MockParserConfig};
    use otdr_simulator::PhysicsConfig;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/upload")
    }

    fn upload() -> FileUpload {
        FileUpload { file_name: "port1.sor".into(), bytes: vec![0u8; 70_000] }
    }

    fn client(url: &str) -> ParserClient {
        ParserClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_parse_against_mock_parser() {
        let url = serve(mock_parser::router(PhysicsConfig::default(), MockParserConfig::default())).await;
        let trace = client(&url).parse(&upload(), "t-1".into()).await.unwrap();

        assert_eq!(trace.id, "t-1");
        assert_eq!(trace.file_name, "port1.sor");
        assert!(!trace.is_empty());
        assert_eq!(trace.distance.len(), trace.power.len());
    }

    #[tokio::test]
    async fn test_error_field_is_surfaced_verbatim() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Failed to analyze sor file with error bad block" })),
                )
            }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to analyze sor file with error bad block");
    }

    #[tokio::test]
    async fn test_error_field_wins_even_on_200() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async { Json(json!({ "error": "No file selected" })) }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert!(matches!(err, ParserError::Rejected(ref m) if m == "No file selected"));
    }

    #[tokio::test]
    async fn test_error_field_survives_odd_failure_body() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "x", "timestamp": "n/a", "distance": null })),
                )
            }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert!(matches!(err, ParserError::Rejected(ref m) if m == "x"));
    }

    #[tokio::test]
    async fn test_success_body_of_wrong_shape_is_malformed() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async { Json(json!({ "distance": "lots", "power": [] })) }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert!(matches!(err, ParserError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_non_json_failure_reports_status() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down for maintenance") }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "Parser returned HTTP 503");
    }

    #[tokio::test]
    async fn test_mismatched_arrays_are_rejected() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async {
                Json(json!({
                    "fileName": "a.sor", "fiberId": "F", "timestamp": 0,
                    "distance": [0.0, 1.0], "power": [0.0], "events": []
                }))
            }),
        );
        let url = serve(app).await;
        let err = client(&url).parse(&upload(), "x".into()).await.unwrap_err();
        assert!(matches!(err, ParserError::InvalidTrace(TraceError::LengthMismatch { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}/api/upload"))
            .parse(&upload(), "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::Transport(_)));
    }
}
