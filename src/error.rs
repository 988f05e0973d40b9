use thiserror::Error;

use crate::map::VertexId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidGraphError {
    #[error("vertex {vertex} lists neighbor {neighbor}, but the graph only has {size} vertices")]
    UnknownNeighbor {
        vertex: usize,
        neighbor: usize,
        size: usize,
    },

    #[error("edge {from} -> {to} has no reverse edge")]
    AsymmetricEdge { from: usize, to: usize },

    #[error("vertex {0} is adjacent to itself")]
    SelfLoop(usize),

    #[error("vertex {vertex} lists neighbor {neighbor} more than once")]
    DuplicateEdge { vertex: usize, neighbor: usize },

    #[error("malformed map: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInstanceError {
    #[error("an instance needs at least one agent")]
    NoAgents,

    #[error("got {starts} starts but {goals} goals")]
    LengthMismatch { starts: usize, goals: usize },

    #[error("agent {agent} refers to vertex {vertex:?}, which is not in the graph")]
    UnknownVertex { agent: usize, vertex: VertexId },

    #[error("agent {agent} refers to cell {cell:?}, which is blocked or outside the grid")]
    BlockedCell { agent: usize, cell: (usize, usize) },

    #[error("agents {first} and {second} share start vertex {vertex:?}")]
    DuplicateStart {
        first: usize,
        second: usize,
        vertex: VertexId,
    },

    #[error("agents {first} and {second} share goal vertex {vertex:?}")]
    DuplicateGoal {
        first: usize,
        second: usize,
        vertex: VertexId,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidSolutionError {
    #[error("solution has no configurations")]
    Empty,

    #[error("configuration at t={time} has {found} agents, expected {expected}")]
    AgentCount {
        time: usize,
        found: usize,
        expected: usize,
    },

    #[error("solution does not begin at the instance starts")]
    StartMismatch,

    #[error("solution does not end at the instance goals")]
    GoalMismatch,

    #[error("agent {agent} is out of range for {num_agents} agents")]
    UnknownAgent { agent: usize, num_agents: usize },

    #[error("agent {agent} jumps from {from:?} to {to:?} at t={time}")]
    InvalidMove {
        agent: usize,
        from: VertexId,
        to: VertexId,
        time: usize,
    },

    #[error("agents {agent_1} and {agent_2} collide at {vertex:?} at t={time}")]
    VertexConflict {
        agent_1: usize,
        agent_2: usize,
        vertex: VertexId,
        time: usize,
    },

    #[error("agents {agent_1} and {agent_2} swap across an edge at t={time}")]
    SwapConflict {
        agent_1: usize,
        agent_2: usize,
        time: usize,
    },
}
