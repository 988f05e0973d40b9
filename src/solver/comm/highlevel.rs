use std::collections::{BTreeSet, VecDeque};
use std::ops::{Index, IndexMut};

use super::LowLevelNode;
use crate::common::Configuration;
use crate::dist_table::Heuristic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

/// Search node over joint configurations.
#[derive(Debug, Clone)]
pub(crate) struct HighLevelNode {
    pub(crate) config: Configuration,
    pub(crate) parent: Option<NodeId>,
    pub(crate) neighbors: BTreeSet<NodeId>, // successors seen so far, used by rewrite
    pub(crate) g: usize, // might be lowered by rewrite
    pub(crate) h: usize,
    pub(crate) f: usize,
    pub(crate) priorities: Vec<f32>,
    pub(crate) order: Vec<usize>,                 // agents by priority, highest first
    pub(crate) search_tree: VecDeque<LowLevelNode>, // untried constraint nodes
}

impl HighLevelNode {
    pub(crate) fn is_exhausted(&self) -> bool {
        self.search_tree.is_empty()
    }

    /// Replaces the priorities and re-sorts the agent order to match.
    pub(crate) fn set_priorities(&mut self, priorities: Vec<f32>) {
        self.order = sorted_by_priority(&priorities);
        self.priorities = priorities;
    }
}

fn sorted_by_priority(priorities: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..priorities.len()).collect();
    order.sort_by(|&i, &j| priorities[j].total_cmp(&priorities[i]));
    order
}

/// Owns every high-level node of a run; dropping it frees the whole tree.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<HighLevelNode>,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        NodeArena::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn insert(
        &mut self,
        config: Configuration,
        parent: Option<NodeId>,
        g: usize,
        h: usize,
        heuristic: &mut Heuristic,
        unreachable: usize,
    ) -> NodeId {
        let num_agents = config.len();
        let mut distance = |i: usize| heuristic.get(i, config[i]).unwrap_or(unreachable);

        let priorities: Vec<f32> = match parent {
            None => (0..num_agents)
                .map(|i| distance(i) as f32 / num_agents as f32)
                .collect(),
            // Dynamic priorities, akin to PIBT: agents away from goal gain
            // priority each step, agents at goal fall back to their tie-breaker.
            Some(parent) => {
                let parent_priorities = &self.nodes[parent.0].priorities;
                (0..num_agents)
                    .map(|i| {
                        let p = parent_priorities[i];
                        if distance(i) != 0 {
                            p + 1.0
                        } else {
                            p - p.trunc()
                        }
                    })
                    .collect()
            }
        };

        let order = sorted_by_priority(&priorities);

        let id = NodeId(self.nodes.len());
        self.nodes.push(HighLevelNode {
            config,
            parent,
            neighbors: BTreeSet::new(),
            g,
            h,
            f: g + h,
            priorities,
            order,
            search_tree: VecDeque::from([LowLevelNode::root()]),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].neighbors.insert(id);
        }
        id
    }

    /// Configurations from the root down to `id`.
    pub(crate) fn backtrack(&self, id: NodeId) -> Vec<Configuration> {
        let mut configs = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            configs.push(self.nodes[node.0].config.clone());
            current = self.nodes[node.0].parent;
        }
        configs.reverse();
        configs
    }
}

impl Index<NodeId> for NodeArena {
    type Output = HighLevelNode;

    fn index(&self, id: NodeId) -> &Self::Output {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for NodeArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        &mut self.nodes[id.0]
    }
}
