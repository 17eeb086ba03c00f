use mapd_rust::config::{Cli, Config};
use mapd_rust::engine::Engine;
use mapd_rust::map::Map;
use mapd_rust::scenario::Scenario;
use mapd_rust::simulation::{run_episode, Simulation};
use mapd_rust::stat::Stats;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct Report<'a> {
    config: &'a Config,
    stats: &'a Stats,
    ticks: usize,
    delivered: usize,
    total_reward: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = fs::read_to_string(config_file)
            .with_context(|| format!("cannot read config file: {config_file}"))?;
        Config::from_yaml_str(&config_str)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        info!("No config file specified, using default config");
        Config::default()
    }
    .override_from_command_line(&cli)?;

    let map = Arc::new(Map::from_file(&config.map_path)?);
    let mut rng = StdRng::seed_from_u64(config.seed as u64);
    let scenario = match config.scenario_path.as_ref() {
        Some(path) => Scenario::load_from_file(path)?,
        None => Scenario::generate(
            &map,
            config.num_agents,
            config.num_tasks,
            config.max_ticks,
            &mut rng,
        )?,
    };

    let mut simulation = Simulation::new(map.clone(), &scenario, &config)?;
    let mut engine = Engine::new(map, &config);
    let total_reward = run_episode(&mut engine, &mut simulation)?;
    engine.stats().print();

    let report = Report {
        config: &config,
        stats: engine.stats(),
        ticks: simulation.tick(),
        delivered: simulation.delivered(),
        total_reward,
    };
    if let Some(parent) = Path::new(&config.output_path).parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create output directory {parent:?}"))?;
    }
    fs::write(&config.output_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("cannot write result to {}", config.output_path))?;
    info!("Result written to {}", config.output_path);

    Ok(())
}
