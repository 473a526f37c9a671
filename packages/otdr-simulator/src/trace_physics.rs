//! trace_physics.rs — OTDR backscatter trace synthesis
//!
//! Models the power-vs-distance curve an OTDR records along a fiber:
//! 1. Linear baseline attenuation (dB/km)
//! 2. Per-sample uniform noise so the curve is never perfectly smooth
//! 3. Logarithmic Rayleigh backscatter falloff
//! 4. Per-event step loss that saturates exponentially past the event, plus a
//!    reflective spike just after events stronger than the weak-reflection
//!    threshold
//!
//! The randomness source is always passed in. Seeded `StdRng` gives a
//! reproducible curve; `thread_rng()` gives the usual jittery one.

use chrono::{DateTime, Utc};
use otdr_types::{Event, Trace};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Deserialize;

// ── Physics configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Grid spacing, km
    pub step_km:                 f64,
    /// Linear attenuation coefficient k, dB/km
    pub attenuation_db_per_km:   f64,
    /// Backscatter coefficient c in `-c * ln(d + 1)`
    pub backscatter_coeff:       f64,
    /// Noise is drawn uniformly from ±this value, dB
    pub noise_amplitude_db:      f64,
    /// Exponential rate at which an event's loss saturates, 1/km
    pub loss_rate_per_km:        f64,
    /// Events reflecting above this level produce a spike, dB
    pub reflection_threshold_db: f64,
    /// Spike extends this far past the event, km
    pub reflection_window_km:    f64,
    /// dB of spike per dB of reflection above threshold, at the event itself
    pub spike_gain:              f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            step_km:                 0.01,
            attenuation_db_per_km:   0.25,
            backscatter_coeff:       0.5,
            noise_amplitude_db:      0.1,
            loss_rate_per_km:        10.0,
            reflection_threshold_db: -50.0,
            reflection_window_km:    0.1,
            spike_gain:              0.1,
        }
    }
}

// ── Trace identity ────────────────────────────────────────────────────────────

/// Everything about a synthetic trace except its curve and events.
#[derive(Debug, Clone)]
pub struct TraceSpec {
    pub id:           String,
    pub file_name:    String,
    pub fiber_id:     String,
    pub timestamp:    DateTime<Utc>,
    pub sample_count: usize,
}

// ── Power model ───────────────────────────────────────────────────────────────

/// Contribution of one event to the power at distance `d`.
/// Always zero before the event.
pub fn event_contribution(d: f64, event: &Event, cfg: &PhysicsConfig) -> f64 {
    if event.distance > d {
        return 0.0;
    }
    let past = d - event.distance;
    let mut delta = -event.loss * (1.0 - (-past * cfg.loss_rate_per_km).exp());

    if event.reflection > cfg.reflection_threshold_db && past < cfg.reflection_window_km {
        let proximity = 1.0 - past / cfg.reflection_window_km;
        delta += proximity * (event.reflection - cfg.reflection_threshold_db) * cfg.spike_gain;
    }
    delta
}

/// Noise-free power at distance `d`.
pub fn clean_power(d: f64, events: &[Event], cfg: &PhysicsConfig) -> f64 {
    let baseline = -cfg.attenuation_db_per_km * d;
    let backscatter = -cfg.backscatter_coeff * (d + 1.0).ln();
    // every event is folded in; order does not matter
    let events_db: f64 = events.iter().map(|e| event_contribution(d, e, cfg)).sum();
    baseline + backscatter + events_db
}

/// Synthesize one trace on a uniform grid of `spec.sample_count` points.
/// Events are stored as given; they may be out of distance order.
pub fn generate_trace(
    spec: TraceSpec,
    events: Vec<Event>,
    cfg: &PhysicsConfig,
    rng: &mut impl Rng,
) -> Trace {
    let amp = cfg.noise_amplitude_db.abs();
    let noise = Uniform::new_inclusive(-amp, amp);

    let distance: Vec<f64> = (0..spec.sample_count)
        .map(|i| i as f64 * cfg.step_km)
        .collect();

    let power: Vec<f64> = distance
        .iter()
        .map(|&d| clean_power(d, &events, cfg) + noise.sample(&mut *rng))
        .collect();

    Trace {
        id: spec.id,
        file_name: spec.file_name,
        fiber_id: spec.fiber_id,
        timestamp: spec.timestamp,
        distance,
        power,
        events,
    }
}

/// Number of grid points needed to cover `length_km` (inclusive of both ends).
pub fn sample_count_for(length_km: f64, cfg: &PhysicsConfig) -> usize {
    if cfg.step_km <= 0.0 || length_km <= 0.0 {
        return 1;
    }
    (length_km / cfg.step_km).round() as usize + 1
}
