use std::sync::Arc;

use mapf_lacam::config::{Cli, Config};
use mapf_lacam::dist_table::DistTable;
use mapf_lacam::instance::Instance;
use mapf_lacam::map::Graph;
use mapf_lacam::post_processing::{
    is_feasible_solution, make_log, summarize, write_stats_json, Metrics, RunRecord,
};
use mapf_lacam::scenario::Scenario;
use mapf_lacam::solver::{plan, solve_portfolio, SolveResult};

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = std::fs::read_to_string(config_file)
            .with_context(|| format!("failed to read config file: {config_file}"))?;
        Config::from_yaml_str(&config_str)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        info!("No config file specified, using default config");
        Config::default()
    }
    .override_from_command_line(&cli)?;

    let graph = Arc::new(Graph::from_file(&config.map_path)?);
    let scenario = Scenario::load_from_scen(&config.scen_path)?;
    if scenario.map_width != graph.width || scenario.map_height != graph.height {
        warn!(
            "scenario expects a {}x{} map, loaded {}x{}",
            scenario.map_width, scenario.map_height, graph.width, graph.height
        );
    }
    let agents = if config.random_agents {
        let mut rng = StdRng::seed_from_u64(config.seed);
        scenario.generate_agents_randomly(config.num_agents, &mut rng)?
    } else {
        scenario.first_agents(config.num_agents)?
    };
    let instance = Arc::new(
        Instance::from_agents(Arc::clone(&graph), &agents).context("invalid instance")?,
    );
    info!(
        "{} agents on {} ({} vertices)",
        instance.num_agents(),
        config.map_path,
        graph.size()
    );

    let (outcome, mut dist_table) = if config.portfolio > 1 {
        let outcome = solve_portfolio(Arc::clone(&instance), &config, &config.seeds()).await?;
        (outcome, DistTable::new(&instance))
    } else {
        plan(Arc::clone(&instance), &config, config.seed)
    };

    match &outcome.result {
        SolveResult::Solved { optimal, .. } => info!("solved, optimal: {optimal}"),
        SolveResult::Infeasible => error!("no solution exists"),
        SolveResult::Timeout(Some(_)) => info!("time limit reached, keeping best solution"),
        SolveResult::Timeout(None) => error!("time limit reached without solution"),
    }

    if let Some(solution) = outcome.result.solution() {
        is_feasible_solution(&instance, solution, config.allow_swap)
            .context("planner returned an invalid solution")?;
    }

    outcome.stats.print();
    let metrics = Metrics::compute(&instance, outcome.result.solution(), &mut dist_table)?;
    summarize(&metrics, &outcome.stats);

    make_log(
        config.result_path(),
        &instance,
        &outcome,
        &metrics,
        config.objective,
        &config.map_path,
        config.log_short,
    )?;

    if let Some(stats_path) = &config.stats_path {
        let record = RunRecord {
            map_file: &config.map_path,
            agents: instance.num_agents(),
            seed: outcome.seed,
            objective: config.objective,
            factorize: config.factorize,
            metrics: &metrics,
            stats: &outcome.stats,
        };
        write_stats_json(stats_path, &record)?;
    }

    Ok(())
}
