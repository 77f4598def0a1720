//! Headless runner for the Flockwork simulation.
//!
//! Loads configuration, builds an arena with obstacles, spawns a scenario,
//! and runs the fixed-step tick loop for the configured number of ticks.
//! The final tick summary is printed to stdout as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$FLOCKWORK_CONFIG` (defaults otherwise)
//! 2. Initialize structured logging (tracing)
//! 3. Scatter obstacles and create the simulation world
//! 4. Spawn the flock, the gatherers, and the escort formation
//! 5. Run the tick loop
//! 6. Print the final summary

mod error;
mod spawner;

use std::path::{Path, PathBuf};

use flockwork_core::{SimulationConfig, SimulationWorld, TickSummary};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::spawner::{Scatter, ScenarioConfig};

/// Environment variable naming the YAML config file.
const CONFIG_ENV: &str = "FLOCKWORK_CONFIG";

/// Ticks between two progress lines.
const PROGRESS_INTERVAL: u64 = 100;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let config = load_config(path.as_deref())?;
    let scenario = load_scenario_config(path.as_deref())?;

    // 2. Initialize structured logging. RUST_LOG wins over the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    let source = path.as_ref().map_or_else(|| String::from("<defaults>"), |p| p.display().to_string());
    info!(
        config = %source,
        seed = config.world.seed,
        fixed_dt = config.world.fixed_dt,
        tick_count = config.world.tick_count,
        "flockwork-engine starting"
    );

    // 3. Obstacles and world.
    let mut scatter = Scatter::new(&scenario, config.world.seed);
    let obstacles = spawner::build_obstacles(&scenario, &mut scatter)?;
    info!(pillars = obstacles.len(), "Obstacles placed");
    let tick_count = config.world.tick_count;
    let mut world = SimulationWorld::new(config, Some(Box::new(obstacles)))?;

    // 4. Scenario.
    let spawned = spawner::spawn_scenario(&scenario, &mut world, &mut scatter)?;
    debug!(formation = ?spawned.formation, "Escort formation ready");

    // 5. Tick loop.
    let summary = run(&mut world, tick_count)?;

    // 6. Report.
    let stats = world.message_stats();
    let cache = world.cache_stats();
    info!(
        ticks = world.clock().tick(),
        sent = stats.sent,
        delivered = stats.delivered,
        dropped = stats.dropped,
        cache_hits = cache.hits,
        cache_misses = cache.misses,
        "Run complete"
    );
    if let Some(summary) = summary {
        println!("{}", serde_json::to_string_pretty(&summary).map_err(EngineError::from)?);
    }
    Ok(())
}

/// Drive `ticks` fixed steps, logging progress periodically.
fn run(world: &mut SimulationWorld, ticks: u64) -> Result<Option<TickSummary>, EngineError> {
    let mut last = None;
    for _ in 0..ticks {
        let summary = world.step()?;
        if summary.tick.checked_rem(PROGRESS_INTERVAL) == Some(0) {
            info!(
                tick = summary.tick,
                time = summary.time,
                alive = summary.alive,
                delivered = summary.messages_delivered,
                batch = summary.batch_used,
                "Progress"
            );
        }
        last = Some(summary);
    }
    Ok(last)
}

/// Load the simulation config from `path`, or use defaults.
fn load_config(path: Option<&Path>) -> Result<SimulationConfig, EngineError> {
    match path {
        Some(path) => Ok(SimulationConfig::from_file(path)?),
        None => Ok(SimulationConfig::default()),
    }
}

/// Load the `scenario` section of the config file at `path`.
///
/// A missing file path or a missing section yields the defaults.
fn load_scenario_config(path: Option<&Path>) -> Result<ScenarioConfig, EngineError> {
    let Some(path) = path else {
        return Ok(ScenarioConfig::default());
    };
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Scenario {
        message: format!("failed to read config file: {e}"),
    })?;

    // Parse the full YAML and extract just the "scenario" section.
    let raw: serde_yml::Value = serde_yml::from_str(&contents).map_err(|e| EngineError::Scenario {
        message: format!("failed to parse config YAML: {e}"),
    })?;

    raw.get("scenario").map_or_else(
        || Ok(ScenarioConfig::default()),
        |section| {
            serde_yml::from_value(section.clone()).map_err(|e| EngineError::Scenario {
                message: format!("failed to parse scenario config: {e}"),
            })
        },
    )
}
