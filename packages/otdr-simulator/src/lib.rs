//! # otdr-simulator
//!
//! Synthetic OTDR traces for development without an instrument or a working
//! trace-file parser.
//!
//! - [`trace_physics`]: the power-vs-distance model and the trace generator
//! - [`scenarios`]: preset fault layouts and upload-driven random layouts
//! - [`mock_parser`]: an HTTP stand-in for the external parser service, speaking
//!   its upload contract

pub mod mock_parser;
pub mod scenarios;
pub mod trace_physics;

pub use scenarios::{synthesize_from_upload, FaultScenario};
pub use trace_physics::{generate_trace, PhysicsConfig, TraceSpec};
