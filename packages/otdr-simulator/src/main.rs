//! main.rs — OTDR simulator entry point
//!
//! Two modes:
//!   1. `generate`: write synthetic traces (JSON array) for a fault scenario,
//!      e.g. to seed a UI or a test fixture
//!   2. `serve`: run the mock parser service so the backend's parser path can
//!      be exercised end to end without the real decoder

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use otdr_simulator::mock_parser::{self, MockParserConfig};
use otdr_simulator::trace_physics::sample_count_for;
use otdr_simulator::{generate_trace, FaultScenario, PhysicsConfig, TraceSpec};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "otdr-sim", about = "OTDR Trace Workbench simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Generate synthetic traces as JSON
    Generate {
        /// Number of traces (overrides config)
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Fault scenario: clean, connector_chain, fiber_break, macrobend, mixed
        #[arg(long)]
        scenario: Option<String>,
        /// Fiber length in km (overrides config)
        #[arg(long)]
        length_km: Option<f64>,
        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the mock parser service
    Serve {
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Probability of a simulated analysis failure (overrides config)
        #[arg(long)]
        fail_rate: Option<f64>,
    },
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullConfig {
    physics:     PhysicsConfig,
    generate:    GenerateConfig,
    mock_parser: MockParserConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GenerateConfig {
    length_km: f64,
    count:     usize,
    scenario:  FaultScenario,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self { length_km: 20.0, count: 3, scenario: FaultScenario::Mixed }
    }
}

fn load_config(path: &str) -> Result<FullConfig> {
    let config_str = std::fs::read_to_string(path)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    toml::from_str(&config_str).with_context(|| format!("invalid config {path}"))
}

/// CLI flags win over `[mock_parser]` in the config file.
fn serve_overrides(mut cfg: MockParserConfig, port: Option<u16>, fail_rate: Option<f64>) -> MockParserConfig {
    if let Some(p) = port {
        cfg.port = p;
    }
    if let Some(r) = fail_rate {
        cfg.fail_rate = r;
    }
    cfg
}

fn parse_scenario(name: &str) -> Result<FaultScenario> {
    serde_json::from_value(serde_json::Value::String(name.to_string()))
        .with_context(|| format!("unknown scenario '{name}'"))
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otdr_simulator=info,otdr_sim=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = load_config(&args.config)?;

    match args.mode {
        Mode::Generate { count, scenario, length_km, seed, output } => {
            let scenario = match scenario {
                Some(name) => parse_scenario(&name)?,
                None => cfg.generate.scenario,
            };
            let count = count.unwrap_or(cfg.generate.count);
            let length_km = length_km.unwrap_or(cfg.generate.length_km);
            run_generate(&cfg.physics, scenario, count, length_km, seed, output)
        }
        Mode::Serve { port, fail_rate } => {
            let parser_cfg = serve_overrides(cfg.mock_parser, port, fail_rate);
            run_serve(cfg.physics, parser_cfg).await
        }
    }
}

fn run_generate(
    physics: &PhysicsConfig,
    scenario: FaultScenario,
    count: usize,
    length_km: f64,
    seed: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let now = Utc::now();

    info!("🔦 Generating {count} trace(s): {scenario:?}, {length_km} km");

    // One trace per day going back, all on the same fiber
    let traces: Vec<_> = (0..count)
        .map(|i| {
            let spec = TraceSpec {
                id: (i + 1).to_string(),
                file_name: format!("{scenario:?}_{:02}.sor", i + 1).to_lowercase(),
                fiber_id: "FIBER001".to_string(),
                timestamp: now - Duration::days((count - 1 - i) as i64),
                sample_count: sample_count_for(length_km, physics),
            };
            generate_trace(spec, scenario.events(length_km), physics, &mut rng)
        })
        .collect();

    let json = serde_json::to_string_pretty(&traces)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {} trace(s) to {}", traces.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_serve(physics: PhysicsConfig, parser_cfg: MockParserConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", parser_cfg.port);
    info!(
        "🧪 Mock parser listening on http://{addr}/api/upload (fail rate {:.0}%)",
        parser_cfg.fail_rate * 100.0
    );

    let app = mock_parser::router(physics, parser_cfg)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
