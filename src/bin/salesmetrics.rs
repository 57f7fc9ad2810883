use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use salesmetrics::{
    CalculatorRegistry, DashboardSession, FactRow, Hierarchy, HierarchyEdge, Identity,
    MemoryStore, MetricResponse, MetricsEngine, StaticIdentityProvider, ViewMode, Window,
};

#[derive(Parser)]
#[command(name = "salesmetrics", about = "Sales metric calculation and rollup CLI")]
struct Cli {
    /// Path to the JSON fixture (identities, hierarchy edges, facts)
    #[arg(long, default_value = "fixture.json")]
    fixture: String,

    /// Act as this identity (must exist in the fixture)
    #[arg(long = "as", value_name = "ID")]
    as_identity: String,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered metric identifiers
    Metrics,
    /// Compute one metric for an entity
    Get {
        /// Metric identifier (e.g. win_rate)
        metric: String,
        /// Scope entity; defaults to the acting identity
        #[arg(long)]
        entity: Option<String>,
        /// Time window: `30d` or `YYYY-MM-DD..YYYY-MM-DD`
        #[arg(long, default_value = "30d")]
        window: String,
        /// Aggregate the entity's transitive subordinates
        #[arg(long)]
        rollup: bool,
    },
    /// Compute one metric for many entities concurrently
    Batch {
        /// Metric identifier
        metric: String,
        /// Comma-separated entity ids (max 50)
        #[arg(long, value_delimiter = ',')]
        entities: Vec<String>,
        /// Time window: `30d` or `YYYY-MM-DD..YYYY-MM-DD`
        #[arg(long, default_value = "30d")]
        window: String,
    },
}

/// On-disk fixture shape: who exists, who reports to whom, and the raw
/// facts the calculators aggregate over.
#[derive(Deserialize)]
struct Fixture {
    identities: Vec<Identity>,
    #[serde(default)]
    edges: Vec<HierarchyEdge>,
    #[serde(default)]
    facts: Vec<FactRow>,
}

fn load_fixture(path: &str) -> anyhow::Result<Fixture> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read fixture {path}: {e}"))?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let fixture = load_fixture(&cli.fixture)?;
    let identity = fixture
        .identities
        .iter()
        .find(|i| i.id == cli.as_identity)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("identity {} not found in fixture", cli.as_identity))?;

    let engine = MetricsEngine::new(
        CalculatorRegistry::with_builtins(),
        Arc::new(MemoryStore::new(fixture.facts)),
        Hierarchy::from_edges(fixture.edges)?,
    );
    let provider = StaticIdentityProvider::new(identity);
    let session = DashboardSession::new(engine, &provider)?;

    match cli.command {
        Commands::Metrics => {
            for id in session.engine().registry().ids() {
                println!("{id}");
            }
        }
        Commands::Get {
            metric,
            entity,
            window,
            rollup,
        } => {
            let window = Window::parse(&window)?;
            let view_mode = if rollup {
                ViewMode::Rollup
            } else {
                ViewMode::Individual
            };
            let response = session
                .get_or_compute(&metric, entity.as_deref(), view_mode, rollup, Some(window))
                .await?;
            match &response {
                MetricResponse::Individual(result) => {
                    println!("{}", serde_json::to_string_pretty(result)?);
                }
                MetricResponse::Rollup(results) => {
                    println!("{}", serde_json::to_string_pretty(results)?);
                }
            }
        }
        Commands::Batch {
            metric,
            entities,
            window,
        } => {
            let window = Window::parse(&window)?;
            let outcome = session
                .calculate_batch(entities, &metric, Some(window))
                .await?;
            let summary = outcome.summary();
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            log::info!(
                "batch complete: {}/{} succeeded",
                summary.success_count,
                summary.total
            );
        }
    }

    Ok(())
}
