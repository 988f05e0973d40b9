use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::lacam::Search;
use super::{LaCAM, SolveResult, Solver};
use crate::common::{Configuration, Solution};
use crate::config::Config;
use crate::dist_table::{DistTable, Heuristic, HeuristicKind};
use crate::instance::Instance;
use crate::map::{Graph, VertexId};
use crate::post_processing::is_feasible_solution;
use crate::stat::Stats;

/// Rule deciding when two agents can be planned apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactorizeKind {
    #[default]
    No,
    /// Agents are further apart than the sum of their distances to goal.
    FactDistance,
    /// The boxes spanned by each agent and its goal do not overlap.
    FactBbox,
}

impl FactorizeKind {
    /// Whether agents at `v1` and `v2`, heading for `g1` and `g2`, can be
    /// planned independently. Distances are grid estimates, not exact.
    pub fn independent(
        self,
        graph: &Graph,
        (v1, g1): (VertexId, VertexId),
        (v2, g2): (VertexId, VertexId),
    ) -> bool {
        match self {
            FactorizeKind::No => false,
            FactorizeKind::FactDistance => {
                let d1 = graph.estimate_distance(v1, g1);
                let d2 = graph.estimate_distance(v2, g2);
                graph.estimate_distance(v1, v2) > d1 + d2
            }
            FactorizeKind::FactBbox => {
                let cells = [v1, g1, v2, g2].map(|v| graph.cell(v));
                let [Some((x1, y1)), Some((xg1, yg1)), Some((x2, y2)), Some((xg2, yg2))] = cells
                else {
                    return false;
                };
                let overlap = x1.max(xg1) >= x2.min(xg2)
                    && x2.max(xg2) >= x1.min(xg1)
                    && y1.max(yg1) >= y2.min(yg2)
                    && y2.max(yg2) >= y1.min(yg1);
                !overlap && v1 != v2
            }
        }
    }

    /// Groups agents of `config` so that agents in different groups are
    /// pairwise independent. Groups are sorted and ordered by their lowest agent.
    pub fn partition(self, graph: &Graph, config: &[VertexId], goals: &[VertexId]) -> Vec<Vec<usize>> {
        let num_agents = config.len();
        if self == FactorizeKind::No || num_agents < 2 {
            return vec![(0..num_agents).collect()];
        }

        let mut groups: Vec<Vec<usize>> = (0..num_agents).map(|i| vec![i]).collect();
        let mut group_of: Vec<usize> = (0..num_agents).collect();
        'outer: for i in 0..num_agents {
            for j in i + 1..num_agents {
                let (gi, gj) = (group_of[i], group_of[j]);
                if gi == gj || self.independent(graph, (config[i], goals[i]), (config[j], goals[j])) {
                    continue;
                }
                let moved = std::mem::take(&mut groups[gj]);
                for &agent in &moved {
                    group_of[agent] = gi;
                }
                groups[gi].extend(moved);
                if groups[gi].len() == num_agents {
                    break 'outer;
                }
            }
        }

        groups.retain(|group| !group.is_empty());
        for group in &mut groups {
            group.sort_unstable();
        }
        groups
    }
}

/// Agents planned together, with ids of the full instance.
#[derive(Debug, Clone)]
struct Part {
    agents: Vec<usize>,
    starts: Vec<VertexId>,
    priorities: Option<Vec<f32>>,
}

/// LaCAM that splits the instance into independent sub-instances whenever
/// the reached configuration allows it, plans them one after another and
/// merges the paths. Agents of finished parts wait at their goals.
pub struct FactorizedLaCAM {
    instance: Arc<Instance>,
    config: Config,
    factorize: FactorizeKind,
    table: Option<DistTable>, // lent to each part when planning with exact distances
    stats: Stats,
}

impl FactorizedLaCAM {
    pub fn new(instance: Arc<Instance>, config: &Config) -> Self {
        let table = (config.heuristic == HeuristicKind::DistTable).then(|| DistTable::new(&instance));
        FactorizedLaCAM {
            instance,
            config: config.clone(),
            factorize: config.factorize,
            table,
            stats: Stats::default(),
        }
    }

    pub fn into_dist_table(self) -> DistTable {
        let instance = self.instance;
        self.table.unwrap_or_else(|| DistTable::new(&instance))
    }

    fn heuristic_for(&mut self, part: &Instance, agents: &[usize]) -> Heuristic {
        match self.table.take() {
            Some(table) => Heuristic::Shared {
                table,
                agents: agents.to_vec(),
                goals: part.goals.clone(),
            },
            None => Heuristic::new(HeuristicKind::Manhattan, part),
        }
    }

    fn take_back(&mut self, heuristic: Heuristic) {
        if let Heuristic::Shared { table, .. } = heuristic {
            self.table = Some(table);
        }
    }

    pub fn solve_with_rng<R: Rng + ?Sized>(&mut self, time_limit: Duration, rng: &mut R) -> SolveResult {
        let start_time = Instant::now();
        self.stats = Stats::default();

        let result = match self.solve_parts(start_time, time_limit, rng) {
            Some(result) => result,
            None => {
                warn!("factorized plan failed, planning without factorization");
                self.solve_whole(start_time, time_limit, rng)
            }
        };

        if let Some(solution) = result.solution() {
            self.stats.costs = self
                .config
                .objective
                .cost(&self.instance, solution)
                .unwrap_or_default();
        }
        self.stats.optimal = false;
        self.stats.time_ms = start_time.elapsed().as_millis() as usize;
        result
    }

    /// `None` when the parts cannot be combined into a plan for the whole
    /// instance, so it has to be planned without factorization.
    fn solve_parts<R: Rng + ?Sized>(
        &mut self,
        start_time: Instant,
        time_limit: Duration,
        rng: &mut R,
    ) -> Option<SolveResult> {
        let graph = Arc::clone(&self.instance.graph);
        let mut paths: Vec<Vec<VertexId>> = self.instance.starts.iter().map(|&v| vec![v]).collect();
        let mut open = VecDeque::from([Part {
            agents: (0..self.instance.num_agents()).collect(),
            starts: self.instance.starts.to_vec(),
            priorities: None,
        }]);

        while let Some(part) = open.pop_front() {
            // Parts that start from the real starts have not moved yet.
            let from_start = paths[part.agents[0]].len() == 1;
            let ins = match self.instance.restricted(&part.agents, part.starts.clone()) {
                Ok(ins) => Arc::new(ins),
                Err(err) => {
                    warn!("invalid sub-instance: {err}");
                    return None;
                }
            };

            let groups = self.factorize.partition(&graph, &ins.starts, &ins.goals);
            if groups.len() > 1 {
                debug!("{} agents split into {} groups", part.agents.len(), groups.len());
                self.stats.sub_instances += groups.len();
                for group in groups {
                    open.push_back(Part {
                        agents: group.iter().map(|&i| part.agents[i]).collect(),
                        starts: group.iter().map(|&i| part.starts[i]).collect(),
                        priorities: part
                            .priorities
                            .as_ref()
                            .map(|p| group.iter().map(|&i| p[i]).collect()),
                    });
                }
                continue;
            }

            let remaining = time_limit.saturating_sub(start_time.elapsed());
            let heuristic = self.heuristic_for(&ins, &part.agents);
            let mut planner = LaCAM::with_heuristic(Arc::clone(&ins), &self.config, heuristic);
            planner.stop_at_first_solution();
            if let Some(priorities) = part.priorities.clone() {
                planner.inherit_priorities(priorities);
            }
            let search = planner.search(remaining, rng, self.factorize);
            self.stats.absorb(planner.stats());
            self.take_back(planner.into_heuristic());

            match search {
                Search::Split(split) => {
                    for (local, &agent) in part.agents.iter().enumerate() {
                        paths[agent].extend(split.prefix[1..].iter().map(|config| config[local]));
                    }
                    let Some(reached) = split.prefix.last() else {
                        return None;
                    };
                    debug!(
                        "{} agents split into {} groups at step {}",
                        part.agents.len(),
                        split.groups.len(),
                        paths[part.agents[0]].len() - 1
                    );
                    self.stats.sub_instances += split.groups.len();
                    for group in split.groups {
                        open.push_back(Part {
                            agents: group.iter().map(|&i| part.agents[i]).collect(),
                            starts: group.iter().map(|&i| reached[i]).collect(),
                            priorities: Some(group.iter().map(|&i| split.priorities[i]).collect()),
                        });
                    }
                }
                Search::Finished(result) => match result {
                    SolveResult::Solved { solution, .. } | SolveResult::Timeout(Some(solution)) => {
                        for (local, &agent) in part.agents.iter().enumerate() {
                            paths[agent].extend(solution.configs[1..].iter().map(|config| config[local]));
                        }
                    }
                    // a subset of agents stuck from the real starts
                    SolveResult::Infeasible if from_start => return Some(SolveResult::Infeasible),
                    SolveResult::Infeasible => return None,
                    SolveResult::Timeout(None) => return Some(SolveResult::Timeout(None)),
                },
            }
        }

        let solution = merge_paths(paths);
        if let Err(err) = is_feasible_solution(&self.instance, &solution, self.config.allow_swap) {
            warn!("merged sub-solutions collide: {err}");
            return None;
        }
        info!(
            "factorized plan of {} steps from {} sub-instances",
            solution.len().saturating_sub(1),
            self.stats.sub_instances
        );
        Some(SolveResult::Solved {
            solution,
            optimal: false,
        })
    }

    fn solve_whole<R: Rng + ?Sized>(&mut self, start_time: Instant, time_limit: Duration, rng: &mut R) -> SolveResult {
        let heuristic = match self.table.take() {
            Some(table) => Heuristic::DistTable(table),
            None => Heuristic::new(HeuristicKind::Manhattan, &self.instance),
        };
        let mut planner = LaCAM::with_heuristic(Arc::clone(&self.instance), &self.config, heuristic);
        let result = planner.solve_with_rng(time_limit.saturating_sub(start_time.elapsed()), rng);
        self.stats.absorb(planner.stats());
        if let Some(table) = planner.into_heuristic().into_dist_table() {
            self.table = Some(table);
        }
        result
    }
}

/// Lines up per-agent paths in time, holding each agent at its last vertex
/// once its path ends.
fn merge_paths(paths: Vec<Vec<VertexId>>) -> Solution {
    let len = paths.iter().map(Vec::len).max().unwrap_or(0);
    let configs = (0..len)
        .map(|t| {
            Configuration::new(
                paths
                    .iter()
                    .map(|path| path[t.min(path.len() - 1)])
                    .collect(),
            )
        })
        .collect();
    Solution::new(configs)
}

impl Solver for FactorizedLaCAM {
    #[instrument(skip_all, name = "factorized_lacam", fields(agents = self.instance.num_agents(), seed = seed), level = "debug")]
    fn solve(&mut self, time_limit: Duration, seed: u64) -> SolveResult {
        debug!("start search with {:?}", self.factorize);
        let mut rng = StdRng::seed_from_u64(seed);
        self.solve_with_rng(time_limit, &mut rng)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
