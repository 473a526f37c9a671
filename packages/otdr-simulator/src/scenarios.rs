//! scenarios.rs — Fault layouts for synthetic traces
//!
//! Each preset places a fixed set of events along a fiber of a given length,
//! so the chart and marker code can be exercised against known shapes.
//! `random_events` draws the ad-hoc layouts used for local upload synthesis,
//! where the uploaded file's byte size stands in for the fiber length.

use chrono::{DateTime, Utc};
use otdr_types::{Event, EventType, Trace};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::trace_physics::{generate_trace, sample_count_for, PhysicsConfig, TraceSpec};

/// Shortest and longest fiber a local upload can map to, km
pub const MIN_UPLOAD_LENGTH_KM: f64 = 5.0;
pub const MAX_UPLOAD_LENGTH_KM: f64 = 50.0;
/// Bytes of uploaded file per km of synthetic fiber
const BYTES_PER_KM: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultScenario {
    /// No events: baseline + backscatter only
    Clean,
    /// Patch-panel connectors at both ends and one mid-span
    ConnectorChain,
    /// Splice, then a hard break two thirds along
    FiberBreak,
    /// Two non-reflective bend losses
    Macrobend,
    /// One of everything
    Mixed,
}

impl FaultScenario {
    pub fn all() -> &'static [FaultScenario] {
        &[
            Self::Clean,
            Self::ConnectorChain,
            Self::FiberBreak,
            Self::Macrobend,
            Self::Mixed,
        ]
    }

    /// Events for a fiber of `length_km`, ordered by distance.
    pub fn events(&self, length_km: f64) -> Vec<Event> {
        let at = |frac: f64| (length_km * frac * 100.0).round() / 100.0;
        let layout: Vec<(EventType, f64, f64, f64)> = match self {
            Self::Clean => vec![],
            Self::ConnectorChain => vec![
                (EventType::Connector, at(0.05), 0.5, -40.0),
                (EventType::Connector, at(0.5), 0.3, -45.0),
                (EventType::Connector, at(0.95), 0.6, -35.0),
            ],
            Self::FiberBreak => vec![
                (EventType::Splice, at(0.3), 0.1, -70.0),
                (EventType::Break, at(0.66), 15.0, -20.0),
            ],
            Self::Macrobend => vec![
                (EventType::Loss, at(0.25), 0.8, -65.0),
                (EventType::Loss, at(0.7), 1.2, -65.0),
            ],
            Self::Mixed => vec![
                (EventType::Connector, at(0.1), 0.5, -40.0),
                (EventType::Splice, at(0.3), 0.1, -70.0),
                (EventType::Reflection, at(0.45), 0.3, -30.0),
                (EventType::Loss, at(0.6), 0.5, -60.0),
                (EventType::Break, at(0.85), 15.0, -20.0),
            ],
        };

        layout
            .into_iter()
            .enumerate()
            .map(|(i, (event_type, distance, loss, reflection))| {
                make_event(i, event_type, distance, loss, reflection)
            })
            .collect()
    }
}

fn make_event(index: usize, event_type: EventType, distance: f64, loss: f64, reflection: f64) -> Event {
    Event {
        id: format!("ev-{index}"),
        event_type,
        distance,
        loss,
        reflection,
        description: format!("{} at {:.2}km", event_type.label(), distance),
    }
}

// ── Random layouts (local upload synthesis) ───────────────────────────────────

/// Crude fiber length proxy: bigger files describe longer fibers.
pub fn fiber_length_for_file_size(file_size: u64) -> f64 {
    (file_size as f64 / BYTES_PER_KM).clamp(MIN_UPLOAD_LENGTH_KM, MAX_UPLOAD_LENGTH_KM)
}

/// Loss and reflection typical of each event type.
fn draw_event_params(event_type: EventType, rng: &mut impl Rng) -> (f64, f64) {
    match event_type {
        EventType::Reflection => (0.3, rng.gen_range(-35.0..-25.0)),
        EventType::Loss => (rng.gen_range(0.2..1.0), -60.0),
        EventType::Break => (rng.gen_range(10.0..20.0), rng.gen_range(-22.0..-14.0)),
        EventType::Splice => (rng.gen_range(0.05..0.3), -70.0),
        EventType::Connector | EventType::Other => {
            (rng.gen_range(0.2..0.75), rng.gen_range(-45.0..-35.0))
        }
    }
}

/// Between one and four events placed uniformly along the fiber, away from
/// both ends, ordered by distance.
pub fn random_events(length_km: f64, rng: &mut impl Rng) -> Vec<Event> {
    const TYPES: [EventType; 5] = [
        EventType::Reflection,
        EventType::Loss,
        EventType::Break,
        EventType::Splice,
        EventType::Connector,
    ];

    let margin = (length_km * 0.1).min(0.5);
    let span = Uniform::new_inclusive(margin, (length_km - margin).max(margin));
    let count = rng.gen_range(1..=4);

    let mut placed: Vec<(EventType, f64)> = (0..count)
        .map(|_| {
            let t = TYPES[rng.gen_range(0..TYPES.len())];
            let d = (span.sample(&mut *rng) * 100.0).round() / 100.0;
            (t, d)
        })
        .collect();
    placed.sort_by(|a, b| a.1.total_cmp(&b.1));

    placed
        .into_iter()
        .enumerate()
        .map(|(i, (t, d))| {
            let (loss, reflection) = draw_event_params(t, &mut *rng);
            make_event(i, t, d, loss, reflection)
        })
        .collect()
}

/// Random layout sized for an uploaded file of `file_size` bytes.
pub fn events_for_file_size(file_size: u64, rng: &mut impl Rng) -> Vec<Event> {
    random_events(fiber_length_for_file_size(file_size), rng)
}

/// Build a whole trace for an uploaded file that could not (or need not) be
/// parsed: random fiber id and layout, length derived from `file_size`.
pub fn synthesize_from_upload(
    id: String,
    file_name: &str,
    file_size: u64,
    captured_at: DateTime<Utc>,
    cfg: &PhysicsConfig,
    rng: &mut impl Rng,
) -> Trace {
    let length_km = fiber_length_for_file_size(file_size);
    let fiber_id = format!("FIBER-{:08X}", rng.gen::<u32>());
    let events = events_for_file_size(file_size, rng);

    let spec = TraceSpec {
        id,
        file_name: file_name.to_string(),
        fiber_id,
        timestamp: captured_at,
        sample_count: sample_count_for(length_km, cfg),
    };
    generate_trace(spec, events, cfg, rng)
}
