use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{Agent, Configuration};
use crate::error::InvalidInstanceError;
use crate::map::{Graph, VertexId};

/// Immutable MAPF problem: a shared graph plus per-agent starts and goals.
#[derive(Debug, Clone)]
pub struct Instance {
    pub graph: Arc<Graph>,
    pub starts: Configuration,
    pub goals: Configuration,
}

impl Instance {
    pub fn new(
        graph: Arc<Graph>,
        starts: Vec<VertexId>,
        goals: Vec<VertexId>,
    ) -> Result<Self, InvalidInstanceError> {
        if starts.len() != goals.len() {
            return Err(InvalidInstanceError::LengthMismatch {
                starts: starts.len(),
                goals: goals.len(),
            });
        }
        if starts.is_empty() {
            return Err(InvalidInstanceError::NoAgents);
        }

        for (agent, &vertex) in starts.iter().chain(goals.iter()).enumerate() {
            if !graph.contains(vertex) {
                return Err(InvalidInstanceError::UnknownVertex {
                    agent: agent % starts.len(),
                    vertex,
                });
            }
        }

        let mut owners = HashMap::new();
        for (agent, &vertex) in starts.iter().enumerate() {
            if let Some(first) = owners.insert(vertex, agent) {
                return Err(InvalidInstanceError::DuplicateStart {
                    first,
                    second: agent,
                    vertex,
                });
            }
        }
        owners.clear();
        for (agent, &vertex) in goals.iter().enumerate() {
            if let Some(first) = owners.insert(vertex, agent) {
                return Err(InvalidInstanceError::DuplicateGoal {
                    first,
                    second: agent,
                    vertex,
                });
            }
        }

        Ok(Instance {
            graph,
            starts: Configuration::new(starts),
            goals: Configuration::new(goals),
        })
    }

    /// Resolves grid-coordinate agents against the graph.
    pub fn from_agents(graph: Arc<Graph>, agents: &[Agent]) -> Result<Self, InvalidInstanceError> {
        let mut starts = Vec::with_capacity(agents.len());
        let mut goals = Vec::with_capacity(agents.len());
        for (i, agent) in agents.iter().enumerate() {
            let start = graph
                .vertex_at(agent.start.0, agent.start.1)
                .ok_or(InvalidInstanceError::BlockedCell {
                    agent: i,
                    cell: agent.start,
                })?;
            let goal = graph
                .vertex_at(agent.goal.0, agent.goal.1)
                .ok_or(InvalidInstanceError::BlockedCell {
                    agent: i,
                    cell: agent.goal,
                })?;
            starts.push(start);
            goals.push(goal);
        }
        Self::new(graph, starts, goals)
    }

    pub fn num_agents(&self) -> usize {
        self.starts.len()
    }

    /// Sub-instance of `agents` (ids in `self`) standing at `starts`, keeping
    /// their goals. `starts` must be taken from a collision-free configuration.
    pub fn restricted(&self, agents: &[usize], starts: Vec<VertexId>) -> Result<Self, InvalidInstanceError> {
        let goals = agents.iter().map(|&i| self.goals[i]).collect();
        Self::new(Arc::clone(&self.graph), starts, goals)
    }
}
