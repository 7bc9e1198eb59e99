use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use contention_bench::{BenchmarkConfig, RunController, Strategy};

/// Times 10 threads x 1,000,000 increments of one shared counter under each
/// locking strategy.
#[derive(Parser, Debug)]
#[command(name = "contention-bench", version, about, long_about = None)]
struct Args {
    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose, args.quiet)?;

    let config = BenchmarkConfig::default();
    println!(
        "{} workers x {} increments, strategies: {}",
        config.worker_count(),
        config.iterations_per_worker(),
        Strategy::REPORT_ORDER.map(Strategy::name).join(", ")
    );

    let controller = RunController::new();
    let updates = controller.subscribe();
    controller.start()?;

    let mut printed = 0;
    for snapshot in updates.iter() {
        for line in &snapshot.results[printed..] {
            println!("{line}");
        }
        printed = snapshot.results.len();
        if !snapshot.is_running {
            break;
        }
    }

    Ok(())
}
