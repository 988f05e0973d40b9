use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, instrument};

use super::algorithm::Pibt;
use super::comm::{NodeArena, NodeId};
use super::{FactorizeKind, Objective, SolveResult, Solver};
use crate::common::{Configuration, Solution};
use crate::config::Config;
use crate::dist_table::{DistTable, Heuristic};
use crate::instance::Instance;
use crate::stat::Stats;

/// Lazy constraints addition search over joint configurations, with PIBT
/// generating successors and an anytime refinement once a goal is reached.
pub struct LaCAM {
    instance: Arc<Instance>,
    heuristic: Heuristic,
    pibt: Pibt,
    objective: Objective,
    anytime: bool,
    restart_rate: f32,
    unreachable: usize,
    root_priorities: Option<Vec<f32>>,
    stats: Stats,
}

/// A reached configuration whose agents fall into independent groups.
#[derive(Debug, Clone)]
pub(crate) struct Split {
    /// Configurations from the start up to the split point.
    pub(crate) prefix: Vec<Configuration>,
    pub(crate) groups: Vec<Vec<usize>>,
    /// Agent priorities at the split point.
    pub(crate) priorities: Vec<f32>,
}

pub(crate) enum Search {
    Finished(SolveResult),
    Split(Split),
}

impl LaCAM {
    pub fn new(instance: Arc<Instance>, config: &Config) -> Self {
        let heuristic = Heuristic::new(config.heuristic, &instance);
        Self::with_heuristic(instance, config, heuristic)
    }

    pub(crate) fn with_heuristic(instance: Arc<Instance>, config: &Config, heuristic: Heuristic) -> Self {
        let pibt = Pibt::new(
            Arc::clone(&instance.graph),
            instance.goals.clone(),
            config.allow_swap,
            config.swap_operation,
        );
        let unreachable = instance.graph.size();
        LaCAM {
            instance,
            heuristic,
            pibt,
            objective: config.objective,
            anytime: config.objective.is_anytime(),
            restart_rate: config.restart_rate,
            unreachable,
            root_priorities: None,
            stats: Stats::default(),
        }
    }

    /// Stops at the first goal whatever the objective.
    pub(crate) fn stop_at_first_solution(&mut self) {
        self.anytime = false;
    }

    /// Seeds the root node with priorities carried over from an earlier search.
    pub(crate) fn inherit_priorities(&mut self, priorities: Vec<f32>) {
        self.root_priorities = Some(priorities);
    }

    /// Hands the distance table over for post-processing. A run configured
    /// with the Manhattan heuristic builds a fresh one.
    pub fn into_dist_table(self) -> DistTable {
        let instance = self.instance;
        self.heuristic
            .into_dist_table()
            .unwrap_or_else(|| DistTable::new(&instance))
    }

    pub(crate) fn into_heuristic(self) -> Heuristic {
        self.heuristic
    }

    pub fn solve_with_rng<R: Rng + ?Sized>(&mut self, time_limit: Duration, rng: &mut R) -> SolveResult {
        match self.search(time_limit, rng, FactorizeKind::No) {
            Search::Finished(result) => result,
            Search::Split(_) => unreachable!(),
        }
    }

    /// Runs the search. Unless `factorize` is `No`, it stops at the first new
    /// configuration that splits into independent groups, before any goal.
    pub(crate) fn search<R: Rng + ?Sized>(
        &mut self,
        time_limit: Duration,
        rng: &mut R,
        factorize: FactorizeKind,
    ) -> Search {
        let start_time = Instant::now();
        self.stats = Stats::default();
        let pibt_calls_before = self.pibt.calls;

        if let Some(agent) = self.unreachable_agent() {
            info!("agent {agent} cannot reach its goal, no solution");
            self.stats.time_ms = start_time.elapsed().as_millis() as usize;
            return Search::Finished(SolveResult::Infeasible);
        }

        let num_agents = self.instance.num_agents();
        let mut arena = NodeArena::new();
        let mut open: Vec<NodeId> = Vec::new();
        let mut explored: HashMap<Configuration, NodeId> = HashMap::new();

        let starts = self.instance.starts.clone();
        let h_init = self.h_value(&starts);
        let root = arena.insert(starts.clone(), None, 0, h_init, &mut self.heuristic, self.unreachable);
        if let Some(priorities) = self.root_priorities.take() {
            arena[root].set_priorities(priorities);
        }
        open.push(root);
        explored.insert(starts, root);

        let mut goal: Option<NodeId> = None;
        let mut split: Option<Split> = None;

        while let Some(&h) = open.last() {
            if start_time.elapsed() >= time_limit {
                break;
            }
            self.stats.loop_count += 1;

            // low-level search end
            if arena[h].is_exhausted() {
                open.pop();
                continue;
            }

            // incumbent pruning
            if let Some(goal) = goal {
                if arena[h].f >= arena[goal].f {
                    open.pop();
                    continue;
                }
            }

            if goal.is_none() && arena[h].config == self.instance.goals {
                goal = Some(h);
                info!("found solution, cost: {}", arena[h].g);
                if !self.anytime {
                    break;
                }
                continue;
            }

            let Some(constraint) = arena[h].search_tree.pop_front() else {
                continue;
            };
            self.stats.low_level_expand_nodes += 1;

            // successors at the low level
            if constraint.depth < num_agents {
                let i = arena[h].order[constraint.depth];
                let v = arena[h].config[i];
                let mut candidates = self.instance.graph.neighbors(v).to_vec();
                candidates.push(v);
                candidates.shuffle(rng);
                let node = &mut arena[h];
                for u in candidates {
                    node.search_tree.push_back(constraint.child(i, u));
                }
            }

            // successors at the high level
            let node = &arena[h];
            let Some(next) = self.pibt.get_new_config(
                &node.config,
                &node.order,
                &constraint,
                &mut self.heuristic,
                rng,
            ) else {
                continue;
            };

            if let Some(&known) = explored.get(&next) {
                self.rewrite(&mut arena, h, known, goal, &mut open);
                let reinsert = if rng.gen::<f32>() >= self.restart_rate {
                    known
                } else {
                    debug!("random restart");
                    root
                };
                if goal.map_or(true, |goal| arena[reinsert].f < arena[goal].f) {
                    open.push(reinsert);
                }
            } else {
                let g = arena[h].g + self.edge_cost(&arena[h].config, &next);
                let h_value = self.h_value(&next);
                let id = arena.insert(next.clone(), Some(h), g, h_value, &mut self.heuristic, self.unreachable);
                explored.insert(next, id);
                if goal.map_or(true, |goal| arena[id].f < arena[goal].f) {
                    open.push(id);
                }

                if goal.is_none() && arena[id].config != self.instance.goals {
                    let groups = factorize.partition(&self.instance.graph, &arena[id].config, &self.instance.goals);
                    if groups.len() > 1 {
                        debug!("configuration splits into {} groups", groups.len());
                        split = Some(Split {
                            prefix: arena.backtrack(id),
                            groups,
                            priorities: arena[id].priorities.clone(),
                        });
                        break;
                    }
                }
            }
        }

        self.stats.high_level_generated_nodes = arena.len();
        self.stats.pibt_calls = self.pibt.calls - pibt_calls_before;
        self.stats.time_ms = start_time.elapsed().as_millis() as usize;

        if let Some(split) = split {
            return Search::Split(split);
        }

        let exhausted = open.is_empty();
        let Some(goal) = goal else {
            if exhausted {
                info!("no solution");
                return Search::Finished(SolveResult::Infeasible);
            }
            info!("timeout");
            return Search::Finished(SolveResult::Timeout(None));
        };

        let solution = Solution::new(arena.backtrack(goal));
        self.stats.costs = arena[goal].g;
        let result = if exhausted {
            info!("solved optimally, objective: {}", self.objective);
            self.stats.optimal = true;
            SolveResult::Solved {
                solution,
                optimal: true,
            }
        } else if !self.anytime {
            info!("solved sub-optimally, objective: {}", self.objective);
            SolveResult::Solved {
                solution,
                optimal: false,
            }
        } else {
            info!("timeout, returning solution of cost {}", arena[goal].g);
            SolveResult::Timeout(Some(solution))
        };
        Search::Finished(result)
    }

    fn unreachable_agent(&mut self) -> Option<usize> {
        let instance = &self.instance;
        if self.heuristic.is_exact() {
            let heuristic = &mut self.heuristic;
            return (0..instance.num_agents()).find(|&i| heuristic.get(i, instance.starts[i]).is_none());
        }
        let mut table = DistTable::new(instance);
        (0..instance.num_agents()).find(|&i| table.get(i, instance.starts[i]).is_none())
    }

    fn distance(&mut self, agent: usize, config: &Configuration) -> usize {
        self.heuristic
            .get(agent, config[agent])
            .unwrap_or(self.unreachable)
    }

    fn h_value(&mut self, config: &Configuration) -> usize {
        let objective = self.objective;
        let distances = (0..config.len()).map(|i| self.distance(i, config));
        match objective {
            Objective::Makespan => distances.max().unwrap_or(0),
            Objective::None | Objective::SumOfLoss => distances.sum(),
        }
    }

    fn edge_cost(&self, from: &Configuration, to: &Configuration) -> usize {
        match self.objective {
            Objective::Makespan => 1,
            Objective::None | Objective::SumOfLoss => {
                let goals = &self.instance.goals;
                (0..from.len())
                    .filter(|&i| from[i] != goals[i] || to[i] != goals[i])
                    .count()
            }
        }
    }

    /// Links `from -> to` and propagates any cheaper cost-to-come through the
    /// explored graph, re-opening improved nodes that can still beat the goal.
    fn rewrite(
        &self,
        arena: &mut NodeArena,
        from: NodeId,
        to: NodeId,
        goal: Option<NodeId>,
        open: &mut Vec<NodeId>,
    ) {
        arena[from].neighbors.insert(to);

        let mut queue = VecDeque::from([from]);
        while let Some(n_from) = queue.pop_front() {
            let neighbors: Vec<NodeId> = arena[n_from].neighbors.iter().copied().collect();
            for n_to in neighbors {
                let g = arena[n_from].g + self.edge_cost(&arena[n_from].config, &arena[n_to].config);
                if g >= arena[n_to].g {
                    continue;
                }
                if Some(n_to) == goal {
                    info!("cost update: {} -> {}", arena[n_to].g, g);
                }
                let node = &mut arena[n_to];
                node.g = g;
                node.f = g + node.h;
                node.parent = Some(n_from);
                queue.push_back(n_to);
                if let Some(goal) = goal {
                    if arena[n_to].f < arena[goal].f {
                        open.push(n_to);
                    }
                }
            }
        }
    }
}

impl Solver for LaCAM {
    #[instrument(skip_all, name = "lacam", fields(agents = self.instance.num_agents(), seed = seed), level = "debug")]
    fn solve(&mut self, time_limit: Duration, seed: u64) -> SolveResult {
        debug!("start search");
        let mut rng = StdRng::seed_from_u64(seed);
        self.solve_with_rng(time_limit, &mut rng)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
