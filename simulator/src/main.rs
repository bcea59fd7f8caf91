//! Custodia Simulator
//!
//! Replays named scenarios against an in-memory bank, or drives it with
//! seeded random operations and checks every invariant after each step.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod market;
mod metrics;
mod scenario;

use custodia_bank::BankConfig;

use controller::SimulationController;
use scenario::{Scenario, SCENARIOS};

/// Custodia Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Custodia scenario runner and randomized invariant checker")]
struct Args {
    /// Built-in scenario to run, or "all"
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario to run, as a JSON file
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Number of random steps when no scenario is given
    #[arg(long, default_value = "500")]
    steps: usize,

    /// Number of simulated depositors
    #[arg(short, long, default_value = "3")]
    users: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = BankConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!("Starting Custodia Simulator");
    info!(
        bank_cap = config.bank_cap,
        withdrawal_threshold = config.withdrawal_threshold,
        admin = %config.admin,
        "Bank configuration loaded"
    );

    let mut controller = SimulationController::new(config, args.users, args.seed);

    if let Some(path) = &args.scenario_file {
        let scenario = Scenario::from_file(path)?;
        controller.run_scenario(&scenario).await?;
    } else if let Some(name) = &args.scenario {
        let names: Vec<&str> = if name == "all" {
            SCENARIOS.to_vec()
        } else {
            vec![name.as_str()]
        };
        for name in names {
            let scenario = Scenario::load(name)?;
            controller.run_scenario(&scenario).await?;
        }
    } else {
        info!("Running {} random steps with {} users", args.steps, args.users);
        controller.run(args.steps).await?;
    }

    // Print metrics
    let metrics = controller.metrics();
    info!("Simulation complete");
    info!("Total operations: {}", metrics.total_operations);
    info!("Successful: {}", metrics.successful_operations);
    info!("Failed: {}", metrics.failed_operations);
    info!("Success rate: {:.2}", metrics.success_rate());
    info!("Average latency: {}us", metrics.average_latency_us());
    info!("p99 latency: {}us", metrics.p99_latency_us());

    let summary = serde_json::json!({
        "simulation": metrics,
        "bank": controller.bank_metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
