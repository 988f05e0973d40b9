use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::Configuration;
use crate::instance::Instance;
use crate::map::{Graph, VertexId};

const UNKNOWN: usize = usize::MAX;

/// Breadth-first expansion from a single source that only runs as far as
/// queries require. c.f. Reverse Resumable A*, with plain BFS instead of A*.
#[derive(Debug, Clone)]
struct LazyBfs {
    table: Vec<usize>,
    open: VecDeque<VertexId>,
}

impl LazyBfs {
    fn new(size: usize, source: VertexId) -> Self {
        let mut table = vec![UNKNOWN; size];
        table[source.0] = 0;
        LazyBfs {
            table,
            open: VecDeque::from([source]),
        }
    }

    fn get(&mut self, graph: &Graph, v: VertexId) -> Option<usize> {
        if self.table[v.0] != UNKNOWN {
            return Some(self.table[v.0]);
        }

        while let Some(n) = self.open.pop_front() {
            let d_n = self.table[n.0];
            for &m in graph.neighbors(n) {
                // BFS assigns final distances on first discovery.
                if self.table[m.0] != UNKNOWN {
                    continue;
                }
                self.table[m.0] = d_n + 1;
                self.open.push_back(m);
            }
            if self.table[v.0] != UNKNOWN {
                return Some(self.table[v.0]);
            }
        }

        // Frontier exhausted: `v` is in another component.
        None
    }
}

/// Per-agent shortest-hop distances to goal, computed lazily.
///
/// `None` from any query means the vertex is not connected to the target;
/// it is a normal answer, not a failure.
#[derive(Debug, Clone)]
pub struct DistTable {
    graph: Arc<Graph>,
    goals: Configuration,
    tables: Vec<LazyBfs>,
    // Expansions rooted at alternate targets, kept apart from `tables`.
    overrides: HashMap<VertexId, LazyBfs>,
}

impl DistTable {
    pub fn new(instance: &Instance) -> Self {
        let size = instance.graph.size();
        let tables = instance
            .goals
            .iter()
            .map(|&goal| LazyBfs::new(size, goal))
            .collect();
        DistTable {
            graph: Arc::clone(&instance.graph),
            goals: instance.goals.clone(),
            tables,
            overrides: HashMap::new(),
        }
    }

    pub fn num_agents(&self) -> usize {
        self.tables.len()
    }

    pub fn goal(&self, agent: usize) -> VertexId {
        self.goals[agent]
    }

    /// Distance from `v` to the goal of `agent`.
    pub fn get(&mut self, agent: usize, v: VertexId) -> Option<usize> {
        self.tables[agent].get(&self.graph, v)
    }

    /// Distance from `v` to `target` if given, otherwise to the goal of `agent`.
    /// A target equal to the agent's own goal is served from the primary table.
    pub fn get_with_goal(
        &mut self,
        agent: usize,
        v: VertexId,
        target: Option<VertexId>,
    ) -> Option<usize> {
        match target {
            Some(target) if target != self.goals[agent] => {
                let size = self.graph.size();
                let bfs = self.overrides.entry(target).or_insert_with(|| {
                    trace!("new distance expansion towards {target}");
                    LazyBfs::new(size, target)
                });
                bfs.get(&self.graph, v)
            }
            _ => self.get(agent, v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeuristicKind {
    #[default]
    DistTable,
    Manhattan,
}

/// Distance source used by a planning run. Chosen once, never mixed mid-search.
#[derive(Debug, Clone)]
pub enum Heuristic {
    DistTable(DistTable),
    Manhattan {
        graph: Arc<Graph>,
        goals: Configuration,
    },
    /// Sub-instance view of the table of a larger instance. Local agent `i`
    /// is `agents[i]` there, and is always queried against its own goal.
    Shared {
        table: DistTable,
        agents: Vec<usize>,
        goals: Configuration,
    },
}

impl Heuristic {
    pub fn new(kind: HeuristicKind, instance: &Instance) -> Self {
        match kind {
            HeuristicKind::DistTable => Heuristic::DistTable(DistTable::new(instance)),
            HeuristicKind::Manhattan => Heuristic::Manhattan {
                graph: Arc::clone(&instance.graph),
                goals: instance.goals.clone(),
            },
        }
    }

    pub fn get(&mut self, agent: usize, v: VertexId) -> Option<usize> {
        match self {
            Heuristic::DistTable(table) => table.get(agent, v),
            Heuristic::Manhattan { graph, goals } => Some(graph.estimate_distance(v, goals[agent])),
            Heuristic::Shared {
                table,
                agents,
                goals,
            } => table.get_with_goal(agents[agent], v, Some(goals[agent])),
        }
    }

    /// Whether `get` gives exact distances rather than an estimate.
    pub fn is_exact(&self) -> bool {
        !matches!(self, Heuristic::Manhattan { .. })
    }

    pub fn into_dist_table(self) -> Option<DistTable> {
        match self {
            Heuristic::DistTable(table) | Heuristic::Shared { table, .. } => Some(table),
            Heuristic::Manhattan { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "type octile\nheight 4\nwidth 5\nmap\n.....\n.@@@.\n...@.\n.@...\n";

    fn instance(map: &str, starts: &[(usize, usize)], goals: &[(usize, usize)]) -> Instance {
        let graph = Arc::new(Graph::from_map_str(map).unwrap());
        let starts = starts.iter().map(|&(x, y)| graph.vertex_at(x, y).unwrap()).collect();
        let goals = goals.iter().map(|&(x, y)| graph.vertex_at(x, y).unwrap()).collect();
        Instance::new(graph, starts, goals).unwrap()
    }

    #[test]
    fn test_goal_distance_is_zero() {
        let ins = instance(MAP, &[(0, 0), (4, 0)], &[(4, 3), (0, 3)]);
        let mut table = DistTable::new(&ins);
        for i in 0..ins.num_agents() {
            assert_eq!(table.get(i, ins.goals[i]), Some(0));
        }
    }

    #[test]
    fn test_distances_follow_obstacles() {
        let ins = instance(MAP, &[(0, 0)], &[(4, 3)]);
        let graph = Arc::clone(&ins.graph);
        let mut table = DistTable::new(&ins);
        // Around the right-hand side: (0,0) -> (4,0) -> (4,3).
        assert_eq!(table.get(0, graph.vertex_at(0, 0).unwrap()), Some(7));
        assert_eq!(table.get(0, graph.vertex_at(4, 1).unwrap()), Some(2));
        // Repeated query hits the cache.
        assert_eq!(table.get(0, graph.vertex_at(0, 0).unwrap()), Some(7));
    }

    #[test]
    fn test_bfs_consistency() {
        let ins = instance(MAP, &[(0, 0), (4, 0)], &[(4, 3), (0, 2)]);
        let graph = Arc::clone(&ins.graph);
        let mut table = DistTable::new(&ins);
        for i in 0..ins.num_agents() {
            for v in graph.vertices() {
                let Some(d) = table.get(i, v) else {
                    continue;
                };
                if d == 0 {
                    assert_eq!(v, ins.goals[i]);
                    continue;
                }
                assert!(graph
                    .neighbors(v)
                    .iter()
                    .any(|&w| table.get(i, w) == Some(d - 1)));
            }
        }
    }

    #[test]
    fn test_unreachable_vertex() {
        let map = "type octile\nheight 1\nwidth 3\nmap\n.@.\n";
        let ins = instance(map, &[(0, 0)], &[(2, 0)]);
        let mut table = DistTable::new(&ins);
        assert_eq!(table.get(0, ins.starts[0]), None);
        assert_eq!(table.get(0, ins.goals[0]), Some(0));
    }

    #[test]
    fn test_override_goal_does_not_touch_primary() {
        let ins = instance(MAP, &[(0, 0)], &[(4, 3)]);
        let graph = Arc::clone(&ins.graph);
        let mut table = DistTable::new(&ins);
        let start = graph.vertex_at(0, 0).unwrap();
        let other = graph.vertex_at(0, 3).unwrap();

        assert_eq!(table.get_with_goal(0, start, Some(other)), Some(3));
        assert_eq!(table.get_with_goal(0, other, Some(other)), Some(0));
        assert_eq!(table.get_with_goal(0, start, None), Some(7));
        assert_eq!(table.get_with_goal(0, start, Some(ins.goals[0])), Some(7));
        assert_eq!(table.get(0, other), Some(6));
    }

    #[test]
    fn test_manhattan_heuristic() {
        let ins = instance(MAP, &[(0, 0)], &[(4, 3)]);
        let mut h = Heuristic::new(HeuristicKind::Manhattan, &ins);
        assert_eq!(h.get(0, ins.starts[0]), Some(7));
        assert!(h.into_dist_table().is_none());

        let mut h = Heuristic::new(HeuristicKind::DistTable, &ins);
        assert_eq!(h.get(0, ins.starts[0]), Some(7));
        assert!(h.is_exact());
        assert!(h.into_dist_table().is_some());
    }

    #[test]
    fn test_shared_table_maps_local_agents() {
        let ins = instance(MAP, &[(0, 0), (4, 0), (0, 2)], &[(4, 3), (0, 3), (2, 2)]);
        let graph = Arc::clone(&ins.graph);
        // sub-instance holding agents 2 and 0, in that order
        let mut h = Heuristic::Shared {
            table: DistTable::new(&ins),
            agents: vec![2, 0],
            goals: Configuration::new(vec![ins.goals[2], ins.goals[0]]),
        };
        let corner = graph.vertex_at(0, 0).unwrap();
        assert_eq!(h.get(0, ins.goals[2]), Some(0));
        assert_eq!(h.get(0, corner), Some(4));
        assert_eq!(h.get(1, corner), Some(7));
        assert!(h.is_exact());

        let mut table = h.into_dist_table().unwrap();
        // expansions made through the view land in the primary tables
        assert_eq!(table.num_agents(), 3);
        assert_eq!(table.get(2, corner), Some(4));
    }
}
