use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::instance::Instance;
use crate::map::{Graph, VertexId};
use crate::post_processing::is_feasible_solution;

/// An agent as described by a scenario file, in grid coordinates `(x, y)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: (usize, usize),
    pub goal: (usize, usize),
}

impl Agent {
    pub fn verify(&self, graph: &Graph) -> bool {
        graph.is_passable(self.start.0, self.start.1) && graph.is_passable(self.goal.0, self.goal.1)
    }
}

/// One vertex per agent at a single timestep; index `i` is agent `i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Configuration(Vec<VertexId>);

impl Configuration {
    pub fn new(vertices: Vec<VertexId>) -> Self {
        Configuration(vertices)
    }

    pub fn into_inner(self) -> Vec<VertexId> {
        self.0
    }

    pub fn is_collision_free(&self) -> bool {
        let mut seen: Vec<VertexId> = self.0.clone();
        seen.sort_unstable();
        seen.windows(2).all(|w| w[0] != w[1])
    }
}

impl Deref for Configuration {
    type Target = [VertexId];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<VertexId>> for Configuration {
    fn from(vertices: Vec<VertexId>) -> Self {
        Configuration(vertices)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:>5}", v.0)?;
        }
        write!(f, ">")
    }
}

pub type Path = Vec<VertexId>;

/// Time-indexed joint plan `C_0 ... C_T`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub configs: Vec<Configuration>,
}

impl Solution {
    pub fn new(configs: Vec<Configuration>) -> Self {
        Solution { configs }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn num_agents(&self) -> usize {
        self.configs.first().map_or(0, |c| c.len())
    }

    /// Per-agent paths, one vertex per timestep.
    pub fn paths(&self) -> Vec<Path> {
        (0..self.num_agents())
            .map(|i| self.configs.iter().map(|c| c[i]).collect())
            .collect()
    }

    pub fn verify(&self, instance: &Instance, allow_swap: bool) -> bool {
        is_feasible_solution(instance, self, allow_swap).is_ok()
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, path) in self.paths().iter().enumerate() {
            write!(f, "{i:>5}:")?;
            for (t, v) in path.iter().enumerate() {
                if t > 0 {
                    write!(f, "->")?;
                }
                write!(f, "{:>5}", v.0)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
