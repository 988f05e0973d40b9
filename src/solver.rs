mod algorithm;
mod comm;
mod factorizer;
mod lacam;
mod portfolio;

pub use factorizer::{FactorizeKind, FactorizedLaCAM};
pub use lacam::LaCAM;
pub use portfolio::solve_portfolio;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::common::Solution;
use crate::config::Config;
use crate::dist_table::DistTable;
use crate::instance::Instance;
use crate::post_processing::{makespan, sum_of_loss};
use crate::stat::Stats;

/// What the anytime search keeps improving once a first solution exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Objective {
    /// Stop at the first solution.
    #[default]
    None,
    Makespan,
    SumOfLoss,
}

impl Objective {
    pub fn is_anytime(self) -> bool {
        self != Objective::None
    }

    /// Cost of `solution` as this objective counts it.
    pub fn cost(self, instance: &Instance, solution: &Solution) -> Option<usize> {
        match self {
            Objective::Makespan => makespan(instance, solution).ok(),
            Objective::None | Objective::SumOfLoss => sum_of_loss(instance, solution).ok(),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::None => write!(f, "none"),
            Objective::Makespan => write!(f, "makespan"),
            Objective::SumOfLoss => write!(f, "sum_of_loss"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveResult {
    /// `optimal` is set when the search space was exhausted after the goal
    /// was reached, so no cheaper solution exists for the objective.
    Solved { solution: Solution, optimal: bool },
    Infeasible,
    /// Time budget ran out, with the best solution found so far if any.
    Timeout(Option<Solution>),
}

impl SolveResult {
    pub fn solution(&self) -> Option<&Solution> {
        match self {
            SolveResult::Solved { solution, .. } => Some(solution),
            SolveResult::Timeout(solution) => solution.as_ref(),
            SolveResult::Infeasible => None,
        }
    }

    pub fn into_solution(self) -> Option<Solution> {
        match self {
            SolveResult::Solved { solution, .. } => Some(solution),
            SolveResult::Timeout(solution) => solution,
            SolveResult::Infeasible => None,
        }
    }
}

/// Result of one seeded planning run, with the statistics it produced.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub seed: u64,
    pub result: SolveResult,
    pub stats: Stats,
}

pub trait Solver {
    fn solve(&mut self, time_limit: Duration, seed: u64) -> SolveResult;

    fn stats(&self) -> &Stats;
}

/// One seeded run of the planner `config` selects, with the distance table
/// it built for post-processing.
pub fn plan(instance: Arc<Instance>, config: &Config, seed: u64) -> (SolveOutcome, DistTable) {
    fn run<S: Solver>(solver: &mut S, time_limit: Duration, seed: u64) -> SolveOutcome {
        let result = solver.solve(time_limit, seed);
        SolveOutcome {
            seed,
            result,
            stats: solver.stats().clone(),
        }
    }

    let time_limit = config.time_limit();
    match config.factorize {
        FactorizeKind::No => {
            let mut solver = LaCAM::new(instance, config);
            let outcome = run(&mut solver, time_limit, seed);
            (outcome, solver.into_dist_table())
        }
        FactorizeKind::FactDistance | FactorizeKind::FactBbox => {
            let mut solver = FactorizedLaCAM::new(instance, config);
            let outcome = run(&mut solver, time_limit, seed);
            (outcome, solver.into_dist_table())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Graph;
    use crate::post_processing::is_feasible_solution;

    fn instance() -> Arc<Instance> {
        let map = "type octile\nheight 5\nwidth 7\nmap\n.......\n.......\n.......\n.......\n.......\n";
        let graph = Arc::new(Graph::from_map_str(map).unwrap());
        let cells = [((0, 0), (0, 2)), ((6, 4), (6, 1)), ((6, 0), (4, 0))];
        let starts = cells.iter().map(|&((x, y), _)| graph.vertex_at(x, y).unwrap()).collect();
        let goals = cells.iter().map(|&(_, (x, y))| graph.vertex_at(x, y).unwrap()).collect();
        Arc::new(Instance::new(graph, starts, goals).unwrap())
    }

    #[test]
    fn test_plan_dispatches_on_factorize() {
        let ins = instance();
        for factorize in [FactorizeKind::No, FactorizeKind::FactDistance, FactorizeKind::FactBbox] {
            let config = Config {
                factorize,
                seed: 9,
                ..Config::default()
            };
            let (outcome, mut table) = plan(Arc::clone(&ins), &config, config.seed);
            assert_eq!(outcome.seed, 9);
            let solution = outcome.result.solution().unwrap();
            assert!(is_feasible_solution(&ins, solution, false).is_ok());
            assert_eq!(outcome.stats.sub_instances > 0, factorize != FactorizeKind::No);
            assert_eq!(table.get(1, ins.starts[1]), Some(3));
        }
    }

    #[test]
    fn test_objective_cost() {
        let ins = instance();
        let (outcome, _) = plan(Arc::clone(&ins), &Config::default(), 0);
        let solution = outcome.result.solution().unwrap();
        assert_eq!(Objective::Makespan.cost(&ins, solution), makespan(&ins, solution).ok());
        assert_eq!(Objective::None.cost(&ins, solution), sum_of_loss(&ins, solution).ok());
        assert_eq!(outcome.stats.costs, sum_of_loss(&ins, solution).unwrap());
    }
}
