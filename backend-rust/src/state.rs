use chrono::{DateTime, Utc};
use otdr_simulator::{generate_trace, FaultScenario, PhysicsConfig, TraceSpec};
use otdr_types::{Filter, FilterPatch, Trace};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::filter::matches;

// ─── Store State ─────────────────────────────────────────────────────────────

/// The trace collection and everything derived from it.
///
/// Selection and comparison entries are trace ids, never copies. All
/// mutation goes through the methods below; fields are private so the
/// comparison-mode rules cannot be bypassed.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    traces: Vec<Trace>,
    selected: Option<String>,
    comparison: Vec<String>,
    comparison_mode: bool,
    filters: Filter,
    busy: bool,
    error: Option<String>,
}

/// Serializable view sent to clients (`init-state`, `state-update`,
/// `GET /api/state`). Traces are sent without their sample arrays; clients
/// fetch full traces by id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub traces: Vec<TraceSummary>,
    pub selected_trace_id: Option<String>,
    pub comparison_trace_ids: Vec<String>,
    pub is_comparison_mode: bool,
    pub filters: Filter,
    pub filtered_trace_ids: Vec<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub id: String,
    pub file_name: String,
    pub fiber_id: String,
    pub timestamp: DateTime<Utc>,
    pub sample_count: usize,
    pub span_km: f64,
    pub event_count: usize,
}

impl From<&Trace> for TraceSummary {
    fn from(t: &Trace) -> Self {
        Self {
            id: t.id.clone(),
            file_name: t.file_name.clone(),
            fiber_id: t.fiber_id.clone(),
            timestamp: t.timestamp,
            sample_count: t.len(),
            span_km: t.span_km(),
            event_count: t.events.len(),
        }
    }
}

/// Length of each built-in sample trace, km
const SAMPLE_LENGTH_KM: f64 = 10.0;

impl StoreState {
    pub fn new(traces: Vec<Trace>) -> Self {
        Self { traces, ..Default::default() }
    }

    /// Store pre-populated with two synthetic traces so the UI has something
    /// to draw before the first upload.
    pub fn with_samples(cfg: &PhysicsConfig, rng: &mut impl Rng) -> Self {
        let samples = [
            ("1", "sample_trace_1.sor", "FIBER001", "2024-02-15T10:30:00Z", FaultScenario::ConnectorChain),
            ("2", "sample_trace_2.sor", "FIBER002", "2024-03-01T14:15:00Z", FaultScenario::FiberBreak),
        ];
        let sample_count = otdr_simulator::trace_physics::sample_count_for(SAMPLE_LENGTH_KM, cfg);

        let traces = samples
            .into_iter()
            .filter_map(|(id, file_name, fiber_id, ts, scenario)| {
                let timestamp = ts.parse::<DateTime<Utc>>().ok()?;
                let spec = TraceSpec {
                    id: id.to_string(),
                    file_name: file_name.to_string(),
                    fiber_id: fiber_id.to_string(),
                    timestamp,
                    sample_count,
                };
                Some(generate_trace(spec, scenario.events(SAMPLE_LENGTH_KM), cfg, &mut *rng))
            })
            .collect::<Vec<_>>();

        info!("Store initialized with {} sample trace(s)", traces.len());
        Self::new(traces)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn trace(&self, id: &str) -> Option<&Trace> {
        self.traces.iter().find(|t| t.id == id)
    }

    pub fn selected_trace(&self) -> Option<&Trace> {
        self.selected.as_deref().and_then(|id| self.trace(id))
    }

    pub fn comparison_ids(&self) -> &[String] {
        &self.comparison
    }

    pub fn comparison_traces(&self) -> Vec<&Trace> {
        self.comparison.iter().filter_map(|id| self.trace(id)).collect()
    }

    pub fn is_comparison_mode(&self) -> bool {
        self.comparison_mode
    }

    pub fn filters(&self) -> &Filter {
        &self.filters
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Traces passing the active filter, in insertion order.
    pub fn filtered_traces(&self) -> Vec<&Trace> {
        self.traces.iter().filter(|t| matches(t, &self.filters)).collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            traces: self.traces().iter().map(TraceSummary::from).collect(),
            selected_trace_id: self.selected_trace().map(|t| t.id.clone()),
            comparison_trace_ids: self.comparison_ids().to_vec(),
            is_comparison_mode: self.is_comparison_mode(),
            filters: self.filters().clone(),
            filtered_trace_ids: self.filtered_traces().iter().map(|t| t.id.clone()).collect(),
            is_loading: self.is_busy(),
            error: self.error().map(str::to_string),
        }
    }

    // ── Selection & comparison ───────────────────────────────────────────────

    /// Select the trace with `id`; an unknown id clears the selection.
    pub fn select(&mut self, id: &str) {
        self.selected = self.trace(id).map(|t| t.id.clone());
        debug!("Selected trace: {:?}", self.selected);
    }

    /// Add a known trace to the comparison set and switch comparison mode on.
    /// Unknown or already-present ids are ignored.
    pub fn add_to_comparison(&mut self, id: &str) {
        if self.trace(id).is_none() || self.comparison.iter().any(|c| c == id) {
            return;
        }
        self.comparison.push(id.to_string());
        self.comparison_mode = true;
    }

    /// Remove `id` from the comparison set. Emptying the set turns
    /// comparison mode off.
    pub fn remove_from_comparison(&mut self, id: &str) {
        self.comparison.retain(|c| c != id);
        if self.comparison.is_empty() {
            self.comparison_mode = false;
        }
    }

    /// Flip comparison mode without touching the set.
    pub fn toggle_comparison_mode(&mut self) {
        self.comparison_mode = !self.comparison_mode;
    }

    pub fn clear_comparison(&mut self) {
        self.comparison.clear();
        self.comparison_mode = false;
    }

    // ── Filters ──────────────────────────────────────────────────────────────

    pub fn update_filters(&mut self, patch: FilterPatch) {
        self.filters.apply(patch);
    }

    pub fn reset_filters(&mut self) {
        self.filters = Filter::default();
    }

    // ── Ingest bookkeeping (driven by crate::ingest) ─────────────────────────

    /// Mark an ingest as started: busy on, previous error cleared.
    pub fn begin_ingest(&mut self) {
        self.busy = true;
        self.error = None;
    }

    /// Append a new trace, select it and clear busy in one step.
    pub fn complete_ingest(&mut self, trace: Trace) {
        info!("Ingested trace {} ({}, {} samples)", trace.id, trace.file_name, trace.len());
        self.selected = Some(trace.id.clone());
        self.traces.push(trace);
        self.busy = false;
    }

    /// Record a failed ingest; nothing is appended.
    pub fn fail_ingest(&mut self, message: String) {
        self.error = Some(message);
        self.busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trace(id: &str, fiber_id: &str, ts: &str) -> Trace {
        Trace {
            id: id.into(),
            file_name: format!("trace_{id}.sor"),
            fiber_id: fiber_id.into(),
            timestamp: ts.parse().unwrap(),
            distance: vec![0.0, 0.01],
            power: vec![0.0, -0.01],
            events: vec![],
        }
    }

    fn two_trace_store() -> StoreState {
        StoreState::new(vec![
            trace("1", "FIBER001", "2024-02-15T10:30:00Z"),
            trace("2", "FIBER002", "2024-03-01T14:15:00Z"),
        ])
    }

    fn ids(traces: Vec<&Trace>) -> Vec<&str> {
        traces.into_iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_fiber_filter_scenario() {
        let mut s = two_trace_store();
        s.update_filters(FilterPatch { fiber_id: Some("FIBER002".into()), ..Default::default() });
        assert_eq!(ids(s.filtered_traces()), vec!["2"]);

        s.reset_filters();
        assert_eq!(ids(s.filtered_traces()), vec!["1", "2"]);
    }

    #[test]
    fn test_select_unknown_clears_selection() {
        let mut s = two_trace_store();
        s.select("1");
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some("1"));
        s.select("999");
        assert!(s.selected_trace().is_none());
        assert!(s.error().is_none());
    }

    #[test]
    fn test_add_to_comparison_is_idempotent() {
        let mut s = two_trace_store();
        s.add_to_comparison("2");
        s.add_to_comparison("2");
        assert_eq!(s.comparison_ids(), ["2".to_string()]);
        assert!(s.is_comparison_mode());
    }

    #[test]
    fn test_add_unknown_to_comparison_is_ignored() {
        let mut s = two_trace_store();
        s.add_to_comparison("999");
        assert!(s.comparison_ids().is_empty());
        assert!(!s.is_comparison_mode());
    }

    #[test]
    fn test_removing_last_comparison_turns_mode_off() {
        let mut s = two_trace_store();
        s.add_to_comparison("1");
        s.add_to_comparison("2");
        s.remove_from_comparison("1");
        assert!(s.is_comparison_mode());
        s.remove_from_comparison("2");
        assert!(!s.is_comparison_mode());
    }

    #[test]
    fn test_toggle_keeps_comparison_set() {
        let mut s = two_trace_store();
        s.add_to_comparison("1");
        s.toggle_comparison_mode();
        assert!(!s.is_comparison_mode());
        assert_eq!(s.comparison_ids().len(), 1);
        s.toggle_comparison_mode();
        assert!(s.is_comparison_mode());

        // manual toggle works on an empty set too
        s.clear_comparison();
        s.toggle_comparison_mode();
        assert!(s.is_comparison_mode());
        assert!(s.comparison_ids().is_empty());
    }

    #[test]
    fn test_clear_comparison() {
        let mut s = two_trace_store();
        s.add_to_comparison("1");
        s.add_to_comparison("2");
        s.clear_comparison();
        assert!(s.comparison_traces().is_empty());
        assert!(!s.is_comparison_mode());
    }

    #[test]
    fn test_comparison_preserves_insertion_order() {
        let mut s = two_trace_store();
        s.add_to_comparison("2");
        s.add_to_comparison("1");
        assert_eq!(ids(s.comparison_traces()), vec!["2", "1"]);
    }

    #[test]
    fn test_ingest_bookkeeping() {
        let mut s = two_trace_store();
        s.fail_ingest("boom".into());
        s.begin_ingest();
        assert!(s.is_busy());
        assert!(s.error().is_none());

        s.complete_ingest(trace("3", "FIBER003", "2024-04-01T00:00:00Z"));
        assert!(!s.is_busy());
        assert_eq!(s.traces().len(), 3);
        assert_eq!(s.selected_trace().map(|t| t.id.as_str()), Some("3"));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut s = two_trace_store();
        s.select("2");
        s.add_to_comparison("1");
        s.update_filters(FilterPatch { search: Some("trace_2".into()), ..Default::default() });
        let snap = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(snap["selectedTraceId"], "2");
        assert_eq!(snap["comparisonTraceIds"], serde_json::json!(["1"]));
        assert_eq!(snap["isComparisonMode"], true);
        assert_eq!(snap["filteredTraceIds"], serde_json::json!(["2"]));
        assert_eq!(snap["traces"][0]["sampleCount"], 2);
    }

    #[test]
    fn test_with_samples_builds_two_valid_traces() {
        let s = StoreState::with_samples(&PhysicsConfig::default(), &mut StdRng::seed_from_u64(1));
        assert_eq!(s.traces().len(), 2);
        assert_eq!(s.traces()[0].fiber_id, "FIBER001");
        assert_eq!(s.traces()[1].fiber_id, "FIBER002");
        for t in s.traces() {
            assert!(t.check_invariants().is_ok());
            assert!(!t.events.is_empty());
        }
        assert!(s.selected_trace().is_none());
    }
}
