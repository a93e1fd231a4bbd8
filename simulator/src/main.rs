//! Interstellar Simulator
//!
//! Drives concurrent deposits, swaps and transfers against an in-memory
//! ledger and checks the books balance afterwards.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;

use controller::SimulationController;

/// Interstellar Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Load simulator for the Interstellar wallet ledger")]
struct Args {
    /// Number of simulated wallets to open
    #[arg(short, long, default_value = "10")]
    wallets: usize,

    /// Total operations to run
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Concurrent workers
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut controller = SimulationController::new(args.wallets, args.concurrency, args.seed)?;
    info!(
        wallets = args.wallets,
        operations = args.operations,
        concurrency = args.concurrency,
        seed = controller.seed(),
        "Starting Interstellar Simulator"
    );

    controller.initialize().await?;
    let metrics = controller.run(args.operations).await?;
    let verification = controller.verify().await?;
    let ledger = controller.engine().metrics();
    let cache = controller.engine().rates().stats();

    if args.json {
        let report = serde_json::json!({
            "seed": controller.seed(),
            "simulation": metrics,
            "ledger": ledger,
            "verification": verification,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!("Simulation complete");
        info!("Total operations: {}", metrics.total_operations);
        info!("Successful: {}", metrics.successful());
        info!("Failed: {}", metrics.failed());
        for (code, count) in &metrics.failures {
            info!("  {}: {}", code, count);
        }
        info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
        info!("Average latency: {}µs (p99 {}µs)", metrics.average_latency_us(), metrics.p99_latency_us());
        info!("Optimistic retries: {}", ledger.optimistic_retries);
        info!("Rate fetches: {} ({} cache hits)", cache.upstream_fetches, cache.hits);
        for (currency, total) in &verification.totals {
            info!("  {} held: {}", currency, total);
        }
    }

    if !verification.is_consistent() {
        error!(
            negative = verification.negative_balances,
            mismatched = ?verification.mismatched,
            "Ledger verification failed"
        );
        anyhow::bail!("ledger verification failed");
    }

    info!("Ledger verification passed");
    Ok(())
}
