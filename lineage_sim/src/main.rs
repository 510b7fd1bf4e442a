//! Lineage Simulator CLI
//!
//! Run the tracking engine against seeded synthetic cultures.

use clap::Parser;
use lineage_sim::scenarios::ScenarioId;
use lineage_sim::{load_parameters, ScenarioResult, ScenarioRunner, SimConfig};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lineage deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "lineage-sim")]
#[command(about = "Run deterministic tracking scenarios for Lineage", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (crossing, retune, empty_frame, flat_field, division, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Frames per simulated culture
    #[arg(short, long, default_value = "12")]
    frames: usize,

    /// Randomly placed discs (retune, flat_field)
    #[arg(short, long, default_value = "4")]
    objects: usize,

    /// Tracking parameters as JSON (missing keys keep their defaults)
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frame-by-frame results of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Lineage Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: crossing, retune, empty_frame, flat_field, division, all");
            std::process::exit(1);
        })]
    };

    let parameters = match args.params.as_deref().map(load_parameters).transpose() {
        Ok(parameters) => parameters.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: cannot load parameters: {}", e);
            std::process::exit(1);
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed)
            .with_config(SimConfig {
                frames: args.frames,
                objects: args.objects,
                ..Default::default()
            })
            .with_parameters(parameters.clone())
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let (result, export) = runner_for(base_seed).run_with_export(scenarios[0]);

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
            std::process::exit(1);
        }
        info!("Exported {} frames to {}", export.frames.len(), export_path);

        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base_seed, export_path);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED [events={} mergers={} resolved={} builds={}]",
                        scenario.name(),
                        seed,
                        result.metrics.events,
                        result.metrics.mergers,
                        result.metrics.resolved,
                        result.metrics.graph_builds
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.frames,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
