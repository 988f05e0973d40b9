use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{plan, SolveOutcome};
use crate::config::Config;
use crate::instance::Instance;

/// Plans the instance once per seed on the blocking pool and keeps the best
/// run: any solution beats none, then lower objective cost, then seed order.
/// Every run owns its own planner, distance table and node arena.
pub async fn solve_portfolio(
    instance: Arc<Instance>,
    config: &Config,
    seeds: &[u64],
) -> anyhow::Result<SolveOutcome> {
    if seeds.is_empty() {
        return Err(anyhow!("portfolio needs at least one seed"));
    }

    let mut runs = JoinSet::new();
    for (index, &seed) in seeds.iter().enumerate() {
        let instance = Arc::clone(&instance);
        let config = config.clone();
        runs.spawn_blocking(move || {
            let (outcome, _) = plan(instance, &config, seed);
            (index, outcome)
        });
    }

    let mut best: Option<((bool, usize, usize), SolveOutcome)> = None;
    while let Some(joined) = runs.join_next().await {
        let (index, outcome) = joined.context("portfolio run panicked")?;
        let cost = outcome
            .result
            .solution()
            .and_then(|solution| config.objective.cost(&instance, solution));
        debug!("seed {} finished with cost {cost:?}", outcome.seed);

        let key = (cost.is_none(), cost.unwrap_or(usize::MAX), index);
        if best.as_ref().map_or(true, |(best_key, _)| key < *best_key) {
            best = Some((key, outcome));
        }
    }

    let (_, outcome) = best.ok_or_else(|| anyhow!("no portfolio run finished"))?;
    info!("portfolio of {} seeds, best seed {}", seeds.len(), outcome.seed);
    Ok(outcome)
}
