//! # ingest
//!
//! Turns an uploaded file into a trace in the store.
//!
//! Three paths, tried in order:
//!   1. a pre-built trace supplied with the upload is appended verbatim
//!   2. the external parser service, when `PARSER_URL` is configured
//!   3. local synthesis from the file's name and byte size
//!
//! The store lock is never held across the parser call or the synthesis
//! delay. Completion (append + select + busy off) or failure (error + busy
//! off) is a single write, so no client can observe a half-applied ingest.
//!
//! Overlapping ingests are not serialized: each finishes on its own and the
//! last one to complete owns the selection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use otdr_simulator::{synthesize_from_upload, PhysicsConfig};
use otdr_types::Trace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::parser_client::{ParserClient, ParserError};
use crate::state::{StoreSnapshot, StoreState};

pub type SharedStore = Arc<RwLock<StoreState>>;

/// An uploaded file, as received from the browser.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("Failed to synthesize trace: {0}")]
    Synthesis(String),

    #[error("A trace with id {0} already exists")]
    DuplicateId(String),
}

/// Timestamp-derived trace id, unique even for uploads in the same millisecond.
pub fn new_trace_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..8])
}

pub struct Ingestor {
    parser: Option<ParserClient>,
    physics: PhysicsConfig,
    synth_delay: Duration,
    rng: Mutex<StdRng>,
}

impl Ingestor {
    pub fn new(parser: Option<ParserClient>, physics: PhysicsConfig, synth_delay: Duration) -> Self {
        Self::with_rng(parser, physics, synth_delay, StdRng::from_entropy())
    }

    /// Same as [`Ingestor::new`] with a caller-chosen randomness source for
    /// local synthesis.
    pub fn with_rng(
        parser: Option<ParserClient>,
        physics: PhysicsConfig,
        synth_delay: Duration,
        rng: StdRng,
    ) -> Self {
        Self { parser, physics, synth_delay, rng: Mutex::new(rng) }
    }

    /// Ingest one upload. On success the new trace is appended and selected;
    /// on failure the store's error is set and nothing is appended. Either
    /// way busy is cleared and the store stays usable.
    ///
    /// `notify` receives a snapshot when the ingest starts (busy on) and when
    /// it settles. Callers that must not abandon a half-done ingest run this
    /// on its own task.
    pub async fn ingest(
        &self,
        store: &SharedStore,
        upload: FileUpload,
        prebuilt: Option<Trace>,
        notify: &(dyn Fn(StoreSnapshot) + Send + Sync),
    ) -> Result<Trace, IngestError> {
        let started = {
            let mut state = store.write().await;
            state.begin_ingest();
            state.snapshot()
        };
        notify(started);

        let result = match prebuilt {
            Some(trace) => {
                info!("Ingest: pre-built trace {} for {}", trace.id, upload.file_name);
                Ok(trace)
            }
            None => self.produce(&upload).await,
        };

        let (result, settled) = {
            let mut state = store.write().await;
            let result = result.and_then(|trace| match state.trace(&trace.id) {
                Some(_) => Err(IngestError::DuplicateId(trace.id)),
                None => Ok(trace),
            });
            match &result {
                Ok(trace) => state.complete_ingest(trace.clone()),
                Err(e) => {
                    warn!("Ingest of {} failed: {e}", upload.file_name);
                    state.fail_ingest(e.to_string());
                }
            }
            (result, state.snapshot())
        };
        notify(settled);

        result
    }

    async fn produce(&self, upload: &FileUpload) -> Result<Trace, IngestError> {
        let id = new_trace_id(Utc::now());
        match &self.parser {
            Some(client) => {
                info!("Ingest: sending {} to parser at {}", upload.file_name, client.upload_url());
                Ok(client.parse(upload, id).await?)
            }
            None => {
                tokio::time::sleep(self.synth_delay).await;
                self.synthesize(id, upload)
            }
        }
    }

    fn synthesize(&self, id: String, upload: &FileUpload) -> Result<Trace, IngestError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| IngestError::Synthesis("random source poisoned".into()))?;

        let trace = synthesize_from_upload(
            id,
            &upload.file_name,
            upload.size(),
            Utc::now(),
            &self.physics,
            &mut *rng,
        );
        trace
            .check_invariants()
            .map_err(|e| IngestError::Synthesis(e.to_string()))?;
        if trace.is_empty() {
            return Err(IngestError::Synthesis("generator produced an empty trace".into()));
        }

        info!(
            "Ingest: synthesized {} for {} ({} samples, {} events)",
            trace.id,
            upload.file_name,
            trace.len(),
            trace.events.len()
        );
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    fn store() -> SharedStore {
        Arc::new(RwLock::new(StoreState::with_samples(
            &PhysicsConfig::default(),
            &mut StdRng::seed_from_u64(2),
        )))
    }

    fn local_ingestor() -> Ingestor {
        Ingestor::with_rng(None, PhysicsConfig::default(), Duration::ZERO, StdRng::seed_from_u64(8))
    }

    fn upload(name: &str, size: usize) -> FileUpload {
        FileUpload { file_name: name.into(), bytes: vec![7u8; size] }
    }

    fn quiet(_: StoreSnapshot) {}

    #[tokio::test]
    async fn test_local_synthesis_appends_and_selects() {
        let store = store();
        let ingestor = local_ingestor();

        let trace = ingestor.ingest(&store, upload("new.sor", 90_000), None, &quiet).await.unwrap();

        let s = store.read().await;
        assert_eq!(s.traces().len(), 3);
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some(trace.id.as_str()));
        assert!(!s.is_busy());
        assert!(s.error().is_none());

        let added = s.traces().last().unwrap();
        assert_eq!(added.file_name, "new.sor");
        assert!(!added.distance.is_empty());
        assert_eq!(added.distance.len(), added.power.len());
    }

    #[tokio::test]
    async fn test_prebuilt_trace_is_inserted_verbatim() {
        let store = store();
        let ingestor = local_ingestor();
        let prebuilt = Trace {
            id: "ext-1".into(),
            file_name: "parsed.sor".into(),
            fiber_id: "CABLE-9".into(),
            timestamp: "2024-05-01T08:00:00Z".parse().unwrap(),
            distance: vec![0.0, 1.0],
            power: vec![0.0, -0.3],
            events: vec![],
        };

        ingestor
            .ingest(&store, upload("parsed.sor", 10), Some(prebuilt.clone()), &quiet)
            .await
            .unwrap();

        let s = store.read().await;
        assert_eq!(s.traces().last(), Some(&prebuilt));
        assert_eq!(s.selected_trace(), Some(&prebuilt));
        assert!(!s.is_busy());
    }

    #[tokio::test]
    async fn test_parser_failure_sets_error_and_appends_nothing() {
        let app = Router::new().route(
            "/api/upload",
            post(|| async {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": "No file selected" })))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = ParserClient::new(&format!("http://{addr}/api/upload"), Duration::from_secs(5)).unwrap();
        let ingestor = Ingestor::new(Some(client), PhysicsConfig::default(), Duration::ZERO);
        let store = store();
        store.write().await.select("1");

        let err = ingestor.ingest(&store, upload("x.sor", 100), None, &quiet).await.unwrap_err();
        assert_eq!(err.to_string(), "No file selected");

        let s = store.read().await;
        assert_eq!(s.traces().len(), 2);
        assert_eq!(s.error(), Some("No file selected"));
        assert!(!s.is_busy());
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some("1"));
        drop(s);

        // next attempt clears the old error
        let ok = local_ingestor();
        ok.ingest(&store, upload("y.sor", 100), None, &quiet).await.unwrap();
        assert!(store.read().await.error().is_none());
    }

    #[tokio::test]
    async fn test_busy_is_visible_while_in_flight() {
        let store = store();
        let ingestor = Arc::new(Ingestor::with_rng(
            None,
            PhysicsConfig::default(),
            Duration::from_millis(200),
            StdRng::seed_from_u64(3),
        ));

        let task = {
            let store = store.clone();
            let ingestor = ingestor.clone();
            tokio::spawn(async move { ingestor.ingest(&store, upload("slow.sor", 10), None, &quiet).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let s = store.read().await;
            assert!(s.is_busy());
            assert_eq!(s.traces().len(), 2);
        }

        task.await.unwrap().unwrap();
        assert!(!store.read().await.is_busy());
    }

    #[tokio::test]
    async fn test_overlapping_ingests_last_to_finish_is_selected() {
        let store = store();
        let slow = Arc::new(Ingestor::with_rng(None, PhysicsConfig::default(), Duration::from_millis(150), StdRng::seed_from_u64(4)));
        let fast = local_ingestor();

        let slow_task = {
            let store = store.clone();
            let slow = slow.clone();
            tokio::spawn(async move { slow.ingest(&store, upload("slow.sor", 10), None, &quiet).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        fast.ingest(&store, upload("fast.sor", 10), None, &quiet).await.unwrap();
        let slow_trace = slow_task.await.unwrap().unwrap();

        let s = store.read().await;
        assert_eq!(s.traces().len(), 4);
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some(slow_trace.id.as_str()));
    }

    #[tokio::test]
    async fn test_notify_sees_busy_then_settled() {
        let store = store();
        let seen = Mutex::new(Vec::new());
        let record = |snap: StoreSnapshot| {
            seen.lock().unwrap().push((snap.is_loading, snap.traces.len()));
        };

        local_ingestor().ingest(&store, upload("a.sor", 10), None, &record).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(true, 2), (false, 3)]);
    }

    #[tokio::test]
    async fn test_notify_reports_failure_with_busy_cleared() {
        let store = store();
        let seen = Mutex::new(Vec::new());
        let record = |snap: StoreSnapshot| {
            seen.lock().unwrap().push((snap.is_loading, snap.error));
        };
        let dup = store.read().await.trace("1").cloned().unwrap();

        let err = local_ingestor()
            .ingest(&store, upload("dup.sor", 10), Some(dup), &record)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateId(ref id) if id == "1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (true, None));
        assert_eq!(seen[1], (false, Some("A trace with id 1 already exists".to_string())));
    }

    #[tokio::test]
    async fn test_duplicate_prebuilt_id_is_rejected() {
        let store = store();
        store.write().await.select("2");
        let mut dup = store.read().await.trace("1").cloned().unwrap();
        dup.file_name = "again.sor".into();

        local_ingestor()
            .ingest(&store, upload("again.sor", 10), Some(dup), &quiet)
            .await
            .unwrap_err();

        let s = store.read().await;
        assert_eq!(s.traces().len(), 2);
        assert_eq!(s.trace("1").map(|t| t.file_name.as_str()), Some("sample_trace_1.sor"));
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some("2"));
        assert!(!s.is_busy());
    }

    #[test]
    fn test_trace_ids_are_unique_within_a_millisecond() {
        let now = Utc::now();
        assert_ne!(new_trace_id(now), new_trace_id(now));
        assert!(new_trace_id(now).starts_with(&now.timestamp_millis().to_string()));
    }
}
