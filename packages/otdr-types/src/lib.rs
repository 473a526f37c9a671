//! # otdr-types
//!
//! Shared OTDR trace structures for the trace workbench.
//!
//! These types are used by:
//! - `backend-rust`: the trace store, filter evaluator and parser-service client
//! - `otdr-simulator`: the synthetic trace generator and the mock parser service
//! - the browser UI, which receives them as camelCase JSON
//!
//! ## Units
//!
//! - **distance**: kilometers from the instrument front panel
//! - **power / loss / reflection**: dB
//! - **timestamp**: UTC instant, RFC 3339 on the wire (parser responses carry
//!   Unix epoch seconds instead, see [`ParserResponse`])
//!
//! ## Invariants
//! - `distance.len() == power.len()`
//! - `distance` is non-decreasing
//! - events are not physically linked to the sampling grid; use
//!   [`Trace::nearest_sample`] to map an event onto it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum distance (km) between an event and a grid sample for the two to be
/// considered the same point. Sparse grids will leave events unmatched.
pub const EVENT_MATCH_TOLERANCE_KM: f64 = 0.01;

/// Power reported for an event that has no grid sample within tolerance.
pub const UNMATCHED_EVENT_POWER_DB: f64 = 0.0;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum TraceError {
    #[error("distance and power length mismatch: {distance} distance samples, {power} power samples")]
    LengthMismatch { distance: usize, power: usize },

    #[error("distance grid decreases at sample {index} ({previous} km -> {current} km)")]
    DecreasingDistance { index: usize, previous: f64, current: f64 },

    #[error("timestamp {0} is outside the representable range")]
    InvalidTimestamp(i64),
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// Classification of a discrete anomaly along the fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Reflection,
    Loss,
    Break,
    Splice,
    Connector,
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reflection => "Reflection",
            Self::Loss => "Loss Event",
            Self::Break => "Possible Break",
            Self::Splice => "Splice",
            Self::Connector => "Connector",
            Self::Other => "Event",
        }
    }
}

/// One detected event. `loss` is non-negative by convention (not enforced);
/// `reflection` is typically negative, more negative meaning a weaker reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Position along the fiber, km
    pub distance: f64,
    /// Insertion loss, dB
    pub loss: f64,
    /// Reflectance, dB
    pub reflection: f64,
    pub description: String,
}

// ── Trace ─────────────────────────────────────────────────────────────────────

/// One full distance/power measurement plus its detected events.
/// Immutable once created; the store only ever adds whole traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub file_name: String,
    pub fiber_id: String,
    pub timestamp: DateTime<Utc>,
    /// Sampling grid, km, non-decreasing
    pub distance: Vec<f64>,
    /// Measured power at `distance[i]`, dB
    pub power: Vec<f64>,
    /// Ordered by distance
    #[serde(default)]
    pub events: Vec<Event>,
}

/// An event paired with the power drawn at its position on the chart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMarker<'a> {
    pub event: &'a Event,
    pub power: f64,
    /// False when no sample lay within tolerance and the fallback power was used
    pub matched: bool,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    /// Check the grid invariants. Traces from the generator always pass;
    /// externally supplied traces may not.
    pub fn check_invariants(&self) -> Result<(), TraceError> {
        if self.distance.len() != self.power.len() {
            return Err(TraceError::LengthMismatch {
                distance: self.distance.len(),
                power: self.power.len(),
            });
        }
        for (i, pair) in self.distance.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(TraceError::DecreasingDistance {
                    index: i + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        Ok(())
    }

    /// Index of the sample nearest to `distance_km`, provided it lies strictly
    /// within [`EVENT_MATCH_TOLERANCE_KM`].
    pub fn nearest_sample(&self, distance_km: f64) -> Option<usize> {
        self.distance
            .iter()
            .enumerate()
            .map(|(i, d)| (i, (d - distance_km).abs()))
            .filter(|(_, diff)| *diff < EVENT_MATCH_TOLERANCE_KM)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Power at the sample nearest to `distance_km`, or
    /// [`UNMATCHED_EVENT_POWER_DB`] when no sample is close enough.
    pub fn power_at(&self, distance_km: f64) -> f64 {
        self.nearest_sample(distance_km)
            .and_then(|i| self.power.get(i).copied())
            .unwrap_or(UNMATCHED_EVENT_POWER_DB)
    }

    /// Marker positions for every event, in event order.
    pub fn event_markers(&self) -> Vec<EventMarker<'_>> {
        self.events
            .iter()
            .map(|event| {
                let idx = self.nearest_sample(event.distance);
                EventMarker {
                    event,
                    power: idx
                        .and_then(|i| self.power.get(i).copied())
                        .unwrap_or(UNMATCHED_EVENT_POWER_DB),
                    matched: idx.is_some(),
                }
            })
            .collect()
    }

    /// Fiber length covered by the grid, km
    pub fn span_km(&self) -> f64 {
        self.distance.last().copied().unwrap_or(0.0)
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Active trace filter. Empty strings mean "unconstrained"; nothing is
/// validated when the filter is assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    /// Substring of the trace's fiber id
    pub fiber_id: String,
    /// Lower bound on capture time (RFC 3339 or YYYY-MM-DD)
    pub start_date: String,
    /// Upper bound on capture time (RFC 3339 or YYYY-MM-DD)
    pub end_date: String,
    /// Case-insensitive substring of file name or fiber id
    pub search: String,
}

/// Partial filter update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiber_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl Filter {
    /// Merge-assign: every field present in the patch replaces the current one.
    pub fn apply(&mut self, patch: FilterPatch) {
        if let Some(v) = patch.fiber_id {
            self.fiber_id = v;
        }
        if let Some(v) = patch.start_date {
            self.start_date = v;
        }
        if let Some(v) = patch.end_date {
            self.end_date = v;
        }
        if let Some(v) = patch.search {
            self.search = v;
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.fiber_id.is_empty()
            && self.start_date.is_empty()
            && self.end_date.is_empty()
            && self.search.is_empty()
    }
}

// ── Parser Service Wire Format ────────────────────────────────────────────────

/// JSON body returned by the external trace parser for `POST /api/upload`.
///
/// On failure the service answers with only `{"error": "..."}`, so every data
/// field defaults to empty and `error` must be checked before conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub file_name: String,
    pub fiber_id: String,
    /// Capture time, Unix epoch seconds
    pub timestamp: i64,
    pub distance: Vec<f64>,
    pub power: Vec<f64>,
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

/// Error body shared by the parser service and the backend HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserErrorBody {
    pub error: String,
}

impl ParserResponse {
    /// Build the store record for this response. Events are ordered by
    /// distance and the grid invariants are checked.
    pub fn into_trace(self, id: String) -> Result<Trace, TraceError> {
        let timestamp = DateTime::from_timestamp(self.timestamp, 0)
            .ok_or(TraceError::InvalidTimestamp(self.timestamp))?;

        let mut events = self.events;
        events.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let trace = Trace {
            id,
            file_name: self.file_name,
            fiber_id: self.fiber_id,
            timestamp,
            distance: self.distance,
            power: self.power,
            events,
        };
        trace.check_invariants()?;
        Ok(trace)
    }

    /// Wire form of a trace, as the parser service would send it.
    pub fn from_trace(trace: &Trace) -> Self {
        Self {
            success: Some(true),
            error: None,
            file_name: trace.file_name.clone(),
            fiber_id: trace.fiber_id.clone(),
            timestamp: trace.timestamp.timestamp(),
            distance: trace.distance.clone(),
            power: trace.power.clone(),
            events: trace.events.clone(),
            plot_image: Some(String::new()),
            info: None,
        }
    }
}
