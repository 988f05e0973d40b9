use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::common::Solution;
use crate::dist_table::DistTable;
use crate::error::InvalidSolutionError;
use crate::instance::Instance;
use crate::map::VertexId;
use crate::solver::{FactorizeKind, Objective, SolveOutcome};
use crate::stat::Stats;

/// Checks the shape of a solution: non-empty, one vertex per agent at every
/// timestep, starting at the starts and ending at the goals.
pub fn validate_structure(instance: &Instance, solution: &Solution) -> Result<(), InvalidSolutionError> {
    let expected = instance.num_agents();
    let (Some(first), Some(last)) = (solution.configs.first(), solution.configs.last()) else {
        return Err(InvalidSolutionError::Empty);
    };
    for (time, config) in solution.configs.iter().enumerate() {
        if config.len() != expected {
            return Err(InvalidSolutionError::AgentCount {
                time,
                found: config.len(),
                expected,
            });
        }
    }
    if *first != instance.starts {
        return Err(InvalidSolutionError::StartMismatch);
    }
    if *last != instance.goals {
        return Err(InvalidSolutionError::GoalMismatch);
    }
    Ok(())
}

/// Full validity check: structure, every move along an edge or a wait, no
/// two agents on one vertex, and no swap across an edge unless `allow_swap`.
pub fn is_feasible_solution(
    instance: &Instance,
    solution: &Solution,
    allow_swap: bool,
) -> Result<(), InvalidSolutionError> {
    validate_structure(instance, solution)?;

    let graph = &instance.graph;
    let num_agents = instance.num_agents();
    for (time, step) in solution.configs.windows(2).enumerate() {
        let time = time + 1;
        let (prev, next) = (&step[0], &step[1]);
        for i in 0..num_agents {
            let (from, to) = (prev[i], next[i]);
            if from != to && !graph.is_adjacent(from, to) {
                return Err(InvalidSolutionError::InvalidMove {
                    agent: i,
                    from,
                    to,
                    time,
                });
            }
            for j in i + 1..num_agents {
                if next[j] == to {
                    return Err(InvalidSolutionError::VertexConflict {
                        agent_1: i,
                        agent_2: j,
                        vertex: to,
                        time,
                    });
                }
                if !allow_swap && next[j] == from && prev[j] == to {
                    return Err(InvalidSolutionError::SwapConflict {
                        agent_1: i,
                        agent_2: j,
                        time,
                    });
                }
            }
        }
    }
    Ok(())
}

pub fn makespan(instance: &Instance, solution: &Solution) -> Result<usize, InvalidSolutionError> {
    validate_structure(instance, solution)?;
    Ok(solution.len() - 1)
}

/// Arrival time of `agent`: the first timestep from which it stays at its goal.
pub fn path_cost(instance: &Instance, solution: &Solution, agent: usize) -> Result<usize, InvalidSolutionError> {
    validate_structure(instance, solution)?;
    if agent >= instance.num_agents() {
        return Err(InvalidSolutionError::UnknownAgent {
            agent,
            num_agents: instance.num_agents(),
        });
    }
    Ok(arrival_time(solution, agent, instance.goals[agent]))
}

fn arrival_time(solution: &Solution, agent: usize, goal: VertexId) -> usize {
    let mut c = solution.len();
    while c > 0 && solution.configs[c - 1][agent] == goal {
        c -= 1;
    }
    c
}

pub fn sum_of_costs(instance: &Instance, solution: &Solution) -> Result<usize, InvalidSolutionError> {
    validate_structure(instance, solution)?;
    Ok(instance
        .goals
        .iter()
        .enumerate()
        .map(|(i, &goal)| arrival_time(solution, i, goal))
        .sum())
}

/// Agent-timesteps spent away from goal: a step counts unless the agent is
/// at its goal both before and after it.
pub fn sum_of_loss(instance: &Instance, solution: &Solution) -> Result<usize, InvalidSolutionError> {
    validate_structure(instance, solution)?;
    let mut c = 0;
    for (i, &goal) in instance.goals.iter().enumerate() {
        c += solution
            .configs
            .windows(2)
            .filter(|step| step[0][i] != goal || step[1][i] != goal)
            .count();
    }
    Ok(c)
}

/// `None` when some agent cannot reach its goal at all.
pub fn makespan_lower_bound(instance: &Instance, dist_table: &mut DistTable) -> Option<usize> {
    let mut c = 0;
    for (i, &start) in instance.starts.iter().enumerate() {
        c = c.max(dist_table.get(i, start)?);
    }
    Some(c)
}

/// Also the lower bound of the sum of loss. `None` when some agent cannot
/// reach its goal at all.
pub fn sum_of_costs_lower_bound(instance: &Instance, dist_table: &mut DistTable) -> Option<usize> {
    let mut c = 0;
    for (i, &start) in instance.starts.iter().enumerate() {
        c += dist_table.get(i, start)?;
    }
    Some(c)
}

/// Solution quality next to its lower bounds. All costs are zero when no
/// solution was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub solved: bool,
    pub soc: usize,
    pub soc_lb: Option<usize>,
    pub makespan: usize,
    pub makespan_lb: Option<usize>,
    pub sum_of_loss: usize,
    pub sum_of_loss_lb: Option<usize>,
}

impl Metrics {
    pub fn compute(
        instance: &Instance,
        solution: Option<&Solution>,
        dist_table: &mut DistTable,
    ) -> Result<Self, InvalidSolutionError> {
        let soc_lb = sum_of_costs_lower_bound(instance, dist_table);
        let mut metrics = Metrics {
            soc_lb,
            makespan_lb: makespan_lower_bound(instance, dist_table),
            sum_of_loss_lb: soc_lb,
            ..Metrics::default()
        };
        if let Some(solution) = solution {
            metrics.solved = true;
            metrics.soc = sum_of_costs(instance, solution)?;
            metrics.makespan = makespan(instance, solution)?;
            metrics.sum_of_loss = sum_of_loss(instance, solution)?;
        }
        Ok(metrics)
    }

    /// Cost the given objective is measured by.
    pub fn cost(&self, objective: Objective) -> usize {
        match objective {
            Objective::Makespan => self.makespan,
            Objective::None | Objective::SumOfLoss => self.sum_of_loss,
        }
    }
}

fn ratio(cost: usize, lower_bound: Option<usize>) -> String {
    match lower_bound {
        Some(lb) if lb > 0 => format!("{:.2}", (cost as f64 / lb as f64 * 100.0).ceil() / 100.0),
        _ => "-".to_string(),
    }
}

fn bound(lower_bound: Option<usize>) -> String {
    lower_bound.map_or_else(|| "unreachable".to_string(), |lb| lb.to_string())
}

/// Logs the one-line quality summary of a finished run.
pub fn summarize(metrics: &Metrics, stats: &Stats) {
    if !metrics.solved {
        info!("failed to solve: {}ms", stats.time_ms);
        return;
    }
    info!(
        "solved: {}ms\tmakespan: {} (lb={}, ub={})\tsum_of_costs: {} (lb={}, ub={})\tsum_of_loss: {} (lb={}, ub={})",
        stats.time_ms,
        metrics.makespan,
        bound(metrics.makespan_lb),
        ratio(metrics.makespan, metrics.makespan_lb),
        metrics.soc,
        bound(metrics.soc_lb),
        ratio(metrics.soc, metrics.soc_lb),
        metrics.sum_of_loss,
        bound(metrics.sum_of_loss_lb),
        ratio(metrics.sum_of_loss, metrics.sum_of_loss_lb),
    );
}

fn map_file_name(map_path: &str) -> &str {
    Path::new(map_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(map_path)
}

fn write_vertex(out: &mut String, instance: &Instance, v: VertexId) {
    match instance.graph.cell(v) {
        Some((x, y)) => {
            let _ = write!(out, "({x},{y}),");
        }
        None => {
            let _ = write!(out, "({}),", v.0);
        }
    }
}

/// Renders the key=value result log read by the visualizer.
pub fn format_log(
    instance: &Instance,
    outcome: &SolveOutcome,
    metrics: &Metrics,
    objective: Objective,
    map_path: &str,
    log_short: bool,
) -> String {
    let stats = &outcome.stats;
    let mut out = String::new();
    let _ = writeln!(out, "agents={}", instance.num_agents());
    let _ = writeln!(out, "map_file={}", map_file_name(map_path));
    let _ = writeln!(out, "solver=planner");
    let _ = writeln!(out, "solved={}", u8::from(metrics.solved));
    let _ = writeln!(out, "soc={}", metrics.soc);
    let _ = writeln!(out, "soc_lb={}", metrics.soc_lb.unwrap_or(0));
    let _ = writeln!(out, "makespan={}", metrics.makespan);
    let _ = writeln!(out, "makespan_lb={}", metrics.makespan_lb.unwrap_or(0));
    let _ = writeln!(out, "sum_of_loss={}", metrics.sum_of_loss);
    let _ = writeln!(out, "sum_of_loss_lb={}", metrics.sum_of_loss_lb.unwrap_or(0));
    let _ = writeln!(out, "comp_time={}", stats.time_ms);
    let _ = writeln!(out, "seed={}", outcome.seed);
    let _ = writeln!(out, "optimal={}", u8::from(stats.optimal));
    let _ = writeln!(out, "objective={objective}");
    let _ = writeln!(out, "loop_cnt={}", stats.loop_count);
    let _ = writeln!(out, "num_node_gen={}", stats.high_level_generated_nodes);
    let _ = writeln!(out, "sub_instances={}", stats.sub_instances);
    if log_short {
        return out;
    }

    out.push_str("starts=");
    for &v in instance.starts.iter() {
        write_vertex(&mut out, instance, v);
    }
    out.push_str("\ngoals=");
    for &v in instance.goals.iter() {
        write_vertex(&mut out, instance, v);
    }
    out.push_str("\nsolution=\n");
    if let Some(solution) = outcome.result.solution() {
        for (t, config) in solution.configs.iter().enumerate() {
            let _ = write!(out, "{t}:");
            for &v in config.iter() {
                write_vertex(&mut out, instance, v);
            }
            out.push('\n');
        }
    }
    out
}

pub fn make_log(
    path: impl AsRef<Path>,
    instance: &Instance,
    outcome: &SolveOutcome,
    metrics: &Metrics,
    objective: Objective,
    map_path: &str,
    log_short: bool,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let log = format_log(instance, outcome, metrics, objective, map_path, log_short);
    fs::write(path, log).with_context(|| format!("failed to write result log {}", path.display()))?;
    debug!("result log written to {}", path.display());
    Ok(())
}

/// One entry of the statistics file.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord<'a> {
    pub map_file: &'a str,
    pub agents: usize,
    pub seed: u64,
    pub objective: Objective,
    pub factorize: FactorizeKind,
    #[serde(flatten)]
    pub metrics: &'a Metrics,
    pub stats: &'a Stats,
}

/// Appends `record` to the JSON array stored at `path`, creating the file
/// when missing.
pub fn write_stats_json(path: impl AsRef<Path>, record: &RunRecord<'_>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut records: Vec<serde_json::Value> = match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)
            .with_context(|| format!("{} does not hold a JSON array", path.display()))?,
        Ok(_) => Vec::new(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    records.push(serde_json::to_value(record)?);

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(&records)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Configuration;
    use crate::map::Graph;
    use crate::solver::SolveResult;
    use std::sync::Arc;

    fn config(ids: &[usize]) -> Configuration {
        Configuration::new(ids.iter().copied().map(VertexId).collect())
    }

    // 0 - 1 - 2 - 3 with 4 hanging off 1
    fn line_instance() -> Instance {
        let graph = Graph::from_adjacency(vec![vec![1], vec![0, 2, 4], vec![1, 3], vec![2], vec![1]]).unwrap();
        Instance::new(Arc::new(graph), vec![VertexId(0), VertexId(3)], vec![VertexId(2), VertexId(4)]).unwrap()
    }

    fn line_solution() -> Solution {
        // agent 0 waits at 0 until agent 1 has ducked into 4
        Solution::new(vec![
            config(&[0, 3]),
            config(&[0, 2]),
            config(&[0, 1]),
            config(&[1, 4]),
            config(&[2, 4]),
        ])
    }

    #[test]
    fn test_metrics_on_valid_solution() {
        let ins = line_instance();
        let solution = line_solution();
        assert!(is_feasible_solution(&ins, &solution, false).is_ok());
        assert_eq!(makespan(&ins, &solution).unwrap(), 4);
        assert_eq!(path_cost(&ins, &solution, 0).unwrap(), 4);
        assert_eq!(path_cost(&ins, &solution, 1).unwrap(), 3);
        assert_eq!(sum_of_costs(&ins, &solution).unwrap(), 7);
        // agent 1 idles at its goal during the last step
        assert_eq!(sum_of_loss(&ins, &solution).unwrap(), 7);

        let mut table = DistTable::new(&ins);
        assert_eq!(makespan_lower_bound(&ins, &mut table), Some(3));
        assert_eq!(sum_of_costs_lower_bound(&ins, &mut table), Some(5));
    }

    #[test]
    fn test_sum_of_loss_counts_leaving_goal() {
        let graph = Graph::from_adjacency(vec![vec![1], vec![0, 2], vec![1]]).unwrap();
        let ins = Instance::new(Arc::new(graph), vec![VertexId(1)], vec![VertexId(1)]).unwrap();
        let solution = Solution::new(vec![config(&[1]), config(&[2]), config(&[1]), config(&[1])]);
        assert_eq!(path_cost(&ins, &solution, 0).unwrap(), 2);
        assert_eq!(sum_of_loss(&ins, &solution).unwrap(), 2);
        assert_eq!(makespan(&ins, &solution).unwrap(), 3);
    }

    #[test]
    fn test_structural_errors() {
        let ins = line_instance();
        assert_eq!(
            makespan(&ins, &Solution::new(vec![])).unwrap_err(),
            InvalidSolutionError::Empty
        );
        assert_eq!(
            sum_of_costs(&ins, &Solution::new(vec![config(&[0, 3]), config(&[2])])).unwrap_err(),
            InvalidSolutionError::AgentCount {
                time: 1,
                found: 1,
                expected: 2
            }
        );
        assert_eq!(
            sum_of_loss(&ins, &Solution::new(vec![config(&[1, 3]), config(&[2, 4])])).unwrap_err(),
            InvalidSolutionError::StartMismatch
        );
        assert_eq!(
            makespan(&ins, &Solution::new(vec![config(&[0, 3]), config(&[1, 2])])).unwrap_err(),
            InvalidSolutionError::GoalMismatch
        );
        assert_eq!(
            path_cost(&ins, &line_solution(), 5).unwrap_err(),
            InvalidSolutionError::UnknownAgent {
                agent: 5,
                num_agents: 2
            }
        );
    }

    #[test]
    fn test_conflicts_detected() {
        let ins = line_instance();
        let teleport = Solution::new(vec![config(&[0, 3]), config(&[2, 4])]);
        assert_eq!(
            is_feasible_solution(&ins, &teleport, false).unwrap_err(),
            InvalidSolutionError::InvalidMove {
                agent: 0,
                from: VertexId(0),
                to: VertexId(2),
                time: 1
            }
        );

        let vertex = Solution::new(vec![
            config(&[0, 3]),
            config(&[1, 2]),
            config(&[2, 2]),
            config(&[2, 1]),
            config(&[2, 4]),
        ]);
        assert_eq!(
            is_feasible_solution(&ins, &vertex, false).unwrap_err(),
            InvalidSolutionError::VertexConflict {
                agent_1: 0,
                agent_2: 1,
                vertex: VertexId(2),
                time: 2
            }
        );

        let swap = Solution::new(vec![
            config(&[0, 3]),
            config(&[1, 2]),
            config(&[2, 1]),
            config(&[2, 4]),
        ]);
        assert_eq!(
            is_feasible_solution(&ins, &swap, false).unwrap_err(),
            InvalidSolutionError::SwapConflict {
                agent_1: 0,
                agent_2: 1,
                time: 2
            }
        );
        assert!(is_feasible_solution(&ins, &swap, true).is_ok());
    }

    #[test]
    fn test_unreachable_lower_bounds() {
        let graph = Graph::from_adjacency(vec![vec![1], vec![0], vec![]]).unwrap();
        let ins = Instance::new(Arc::new(graph), vec![VertexId(0)], vec![VertexId(2)]).unwrap();
        let mut table = DistTable::new(&ins);
        assert_eq!(makespan_lower_bound(&ins, &mut table), None);
        assert_eq!(sum_of_costs_lower_bound(&ins, &mut table), None);

        let metrics = Metrics::compute(&ins, None, &mut table).unwrap();
        assert!(!metrics.solved);
        assert_eq!(metrics.soc_lb, None);
    }

    fn outcome() -> SolveOutcome {
        SolveOutcome {
            seed: 3,
            result: SolveResult::Solved {
                solution: line_solution(),
                optimal: false,
            },
            stats: Stats {
                time_ms: 12,
                loop_count: 9,
                high_level_generated_nodes: 5,
                ..Stats::default()
            },
        }
    }

    #[test]
    fn test_log_format() {
        let ins = line_instance();
        let outcome = outcome();
        let mut table = DistTable::new(&ins);
        let metrics = Metrics::compute(&ins, outcome.result.solution(), &mut table).unwrap();
        assert_eq!(metrics.cost(Objective::Makespan), 4);
        assert_eq!(metrics.cost(Objective::SumOfLoss), 7);

        let short = format_log(&ins, &outcome, &metrics, Objective::None, "maps/line.map", true);
        let lines: Vec<&str> = short.lines().collect();
        assert_eq!(lines[0], "agents=2");
        assert_eq!(lines[1], "map_file=line.map");
        assert_eq!(lines[3], "solved=1");
        assert!(short.contains("soc=7\nsoc_lb=5\nmakespan=4\nmakespan_lb=3\n"));
        assert!(short.contains("seed=3\n"));
        assert!(short.contains("objective=none\n"));
        assert!(short.ends_with("num_node_gen=5\nsub_instances=0\n"));
        assert!(!short.contains("solution="));

        let full = format_log(&ins, &outcome, &metrics, Objective::None, "line.map", false);
        // adjacency graphs have no cells, vertex ids are logged instead
        assert!(full.contains("starts=(0),(3),\ngoals=(2),(4),\nsolution=\n0:(0),(3),\n"));
        assert!(full.ends_with("4:(2),(4),\n"));
    }

    #[test]
    fn test_log_uses_grid_cells() {
        let graph = Arc::new(Graph::from_map_str("type octile\nheight 1\nwidth 3\nmap\n...\n").unwrap());
        let ins = Instance::new(graph, vec![VertexId(0)], vec![VertexId(1)]).unwrap();
        let outcome = SolveOutcome {
            seed: 0,
            result: SolveResult::Solved {
                solution: Solution::new(vec![config(&[0]), config(&[1])]),
                optimal: true,
            },
            stats: Stats::default(),
        };
        let mut table = DistTable::new(&ins);
        let metrics = Metrics::compute(&ins, outcome.result.solution(), &mut table).unwrap();
        let log = format_log(&ins, &outcome, &metrics, Objective::None, "line.map", false);
        assert!(log.contains("starts=(0,0),\ngoals=(1,0),\nsolution=\n0:(0,0),\n1:(1,0),\n"));
    }

    #[test]
    fn test_write_log_and_stats_json() {
        let ins = line_instance();
        let outcome = outcome();
        let mut table = DistTable::new(&ins);
        let metrics = Metrics::compute(&ins, outcome.result.solution(), &mut table).unwrap();

        let dir = std::env::temp_dir().join(format!("mapf_lacam_post_processing_{}", std::process::id()));
        let log_path = dir.join("result.txt");
        make_log(&log_path, &ins, &outcome, &metrics, Objective::None, "line.map", true).unwrap();
        assert!(fs::read_to_string(&log_path).unwrap().starts_with("agents=2\n"));

        let stats_path = dir.join("stats.json");
        let record = RunRecord {
            map_file: "line.map",
            agents: ins.num_agents(),
            seed: outcome.seed,
            objective: Objective::SumOfLoss,
            factorize: FactorizeKind::FactBbox,
            metrics: &metrics,
            stats: &outcome.stats,
        };
        write_stats_json(&stats_path, &record).unwrap();
        write_stats_json(&stats_path, &record).unwrap();

        let content = fs::read_to_string(&stats_path).unwrap();
        let records: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["soc"], 7);
        assert_eq!(records[0]["objective"], "sum-of-loss");
        assert_eq!(records[0]["factorize"], "fact-bbox");
        assert_eq!(records[1]["stats"]["loop_count"], 9);

        fs::remove_dir_all(&dir).unwrap();
    }
}
