//! StormLink DST Simulator CLI
//!
//! Run deterministic linkage scenarios against synthetic storm outbreaks.

use clap::Parser;
use std::path::{Path, PathBuf};
use stormlink_core::LinkageConfig;
use stormlink_sim::scenarios::ScenarioId;
use stormlink_sim::{ScenarioResult, ScenarioRunner, SimExport};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// StormLink Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "stormlink-sim")]
#[command(about = "Run deterministic linkage scenarios for StormLink", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,
    
    /// Scenario to run (single_cell, split_lineage, merger_lineage, tornado_across_split,
    /// far_events, period_boundary, warning_polygons, random_outbreak, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,
    
    /// Number of random seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,
    
    /// Reports generated per scenario
    #[arg(short, long, default_value = "20")]
    reports: usize,
    
    /// Linkage config (JSON) used instead of the per-scenario defaults
    #[arg(short, long)]
    config: Option<PathBuf>,
    
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    
    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
    
    /// Export the linkage tables of a single scenario to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<LinkageConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let config: LinkageConfig = serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// `RUST_LOG` wins when set; otherwise `--verbose` picks debug over info.
fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn main() {
    let args = Args::parse();
    
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(args.verbose))
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
    
    if !args.json {
        info!("StormLink DST Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
    
    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };
    
    let config = args.config.as_ref().map(|path| {
        load_config(path).unwrap_or_else(|e| {
            eprintln!("Error: invalid linkage config {}", e);
            std::process::exit(1);
        })
    });
    
    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };
    
    let make_runner = |seed: u64| {
        let runner = ScenarioRunner::new(seed).with_reports(args.reports);
        match &config {
            Some(config) => runner.with_config(config.clone()),
            None => runner,
        }
    };
    
    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        
        info!("Running with export to: {}", export_path.display());
        let result = make_runner(base_seed).run(scenarios[0]);
        
        if let Err(e) = SimExport::from_result(&result).write_to_file(export_path) {
            error!("✗ Export to {} failed: {}", export_path.display(), e);
            std::process::exit(1);
        }
        
        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}",
                scenarios[0].name(), base_seed, export_path.display());
        } else {
            error!("✗ {} FAILED: {}",
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
        let runner = make_runner(seed);
        
        for scenario in &scenarios {
            let result = runner.run(*scenario);
            
            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!("✗ {} (seed={}) FAILED: {}",
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
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "storm_objects": r.num_storm_objects,
                    "events": r.num_events,
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
            
            // List failed seeds
            for result in &all_results {
                if !result.passed {
                    error!("  - {} seed={}: {}",
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

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;
    
    #[test]
    fn test_verbose_selects_debug_logging() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter(false).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(true).max_level_hint(), Some(LevelFilter::DEBUG));
    }
    
    #[test]
    fn test_config_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = LinkageConfig::wind();
        config.max_time_before_storm_start_sec = -1;
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        assert!(load_config(&path).is_err());
        assert!(load_config(&dir.path().join("missing.json")).is_err());
    }
}
