use std::fmt;
use std::fs;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InvalidGraphError;

/// Dense vertex identity, `0..graph.size()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    pub cell: Option<(usize, usize)>, // (x, y) for grid-derived vertices
    pub neighbors: Vec<VertexId>,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub height: usize,
    pub width: usize,
    vertices: Vec<Vertex>,
    cells: Vec<Option<VertexId>>, // row-major lookup, `None` for obstacles
}

impl Graph {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read map {path}"))?;
        let graph =
            Self::from_map_str(&content).with_context(|| format!("failed to parse map {path}"))?;
        debug!(
            "loaded map {path}: {}x{} with {} vertices",
            graph.width,
            graph.height,
            graph.size()
        );
        Ok(graph)
    }

    /// Parses the MovingAI `.map` text format.
    pub fn from_map_str(content: &str) -> Result<Self, InvalidGraphError> {
        let mut lines = content.lines().map(|line| line.trim_end_matches('\r'));
        let mut height = None;
        let mut width = None;

        for line in lines.by_ref() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("height") => height = parts.next().and_then(|s| s.parse::<usize>().ok()),
                Some("width") => width = parts.next().and_then(|s| s.parse::<usize>().ok()),
                Some("map") => break,
                _ => {}
            }
        }

        let height =
            height.ok_or_else(|| InvalidGraphError::Malformed("missing height".to_string()))?;
        let width =
            width.ok_or_else(|| InvalidGraphError::Malformed("missing width".to_string()))?;

        let mut passable = Vec::with_capacity(width * height);
        for y in 0..height {
            let row = lines
                .next()
                .ok_or_else(|| InvalidGraphError::Malformed(format!("missing row {y}")))?;
            let row: Vec<char> = row.chars().collect();
            if row.len() < width {
                return Err(InvalidGraphError::Malformed(format!(
                    "row {y} has {} cells, expected {width}",
                    row.len()
                )));
            }
            passable.extend(row[..width].iter().map(|&ch| is_passable_char(ch)));
        }

        Self::from_grid(width, height, &passable)
    }

    /// Builds a 4-connected grid graph. `passable` is row-major, `width * height` long.
    pub fn from_grid(
        width: usize,
        height: usize,
        passable: &[bool],
    ) -> Result<Self, InvalidGraphError> {
        if passable.len() != width * height {
            return Err(InvalidGraphError::Malformed(format!(
                "{} cells given for a {width}x{height} grid",
                passable.len()
            )));
        }

        let mut vertices = Vec::new();
        let mut cells = vec![None; width * height];
        for y in 0..height {
            for x in 0..width {
                if passable[width * y + x] {
                    let id = VertexId(vertices.len());
                    cells[width * y + x] = Some(id);
                    vertices.push(Vertex {
                        id,
                        cell: Some((x, y)),
                        neighbors: Vec::new(),
                    });
                }
            }
        }

        let mut graph = Graph {
            height,
            width,
            vertices,
            cells,
        };
        graph.initialize_neighbors();
        Ok(graph)
    }

    fn initialize_neighbors(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let Some(v) = self.cells[self.width * y + x] else {
                    continue;
                };
                let mut neighbors = Vec::with_capacity(4);
                // left, right, up, down
                if x > 0 {
                    neighbors.extend(self.vertex_at(x - 1, y));
                }
                if x + 1 < self.width {
                    neighbors.extend(self.vertex_at(x + 1, y));
                }
                if y + 1 < self.height {
                    neighbors.extend(self.vertex_at(x, y + 1));
                }
                if y > 0 {
                    neighbors.extend(self.vertex_at(x, y - 1));
                }
                self.vertices[v.0].neighbors = neighbors;
            }
        }
    }

    /// Builds an undirected graph without coordinates from adjacency lists.
    /// `adjacency[v]` lists the neighbors of vertex `v`.
    pub fn from_adjacency(adjacency: Vec<Vec<usize>>) -> Result<Self, InvalidGraphError> {
        let size = adjacency.len();
        for (vertex, neighbors) in adjacency.iter().enumerate() {
            for (k, &neighbor) in neighbors.iter().enumerate() {
                if neighbor >= size {
                    return Err(InvalidGraphError::UnknownNeighbor {
                        vertex,
                        neighbor,
                        size,
                    });
                }
                if neighbor == vertex {
                    return Err(InvalidGraphError::SelfLoop(vertex));
                }
                if neighbors[..k].contains(&neighbor) {
                    return Err(InvalidGraphError::DuplicateEdge { vertex, neighbor });
                }
            }
        }
        for (vertex, neighbors) in adjacency.iter().enumerate() {
            for &neighbor in neighbors {
                if !adjacency[neighbor].contains(&vertex) {
                    return Err(InvalidGraphError::AsymmetricEdge {
                        from: vertex,
                        to: neighbor,
                    });
                }
            }
        }

        let vertices = adjacency
            .into_iter()
            .enumerate()
            .map(|(id, neighbors)| Vertex {
                id: VertexId(id),
                cell: None,
                neighbors: neighbors.into_iter().map(VertexId).collect(),
            })
            .collect();

        Ok(Graph {
            height: 0,
            width: 0,
            vertices,
            cells: Vec::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    pub fn contains(&self, v: VertexId) -> bool {
        v.0 < self.vertices.len()
    }

    pub fn vertex(&self, v: VertexId) -> &Vertex {
        &self.vertices[v.0]
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices.iter().map(|v| v.id)
    }

    pub fn neighbors(&self, v: VertexId) -> &[VertexId] {
        &self.vertices[v.0].neighbors
    }

    pub fn is_adjacent(&self, u: VertexId, v: VertexId) -> bool {
        self.neighbors(u).contains(&v)
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        self.vertex_at(x, y).is_some()
    }

    pub fn vertex_at(&self, x: usize, y: usize) -> Option<VertexId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[self.width * y + x]
    }

    pub fn cell(&self, v: VertexId) -> Option<(usize, usize)> {
        self.vertices[v.0].cell
    }

    /// Manhattan distance between grid vertices. Vertices without coordinates
    /// only distinguish "at goal" (0) from "elsewhere" (1).
    pub fn estimate_distance(&self, v: VertexId, goal: VertexId) -> usize {
        match (self.cell(v), self.cell(goal)) {
            (Some((x1, y1)), Some((x2, y2))) => x1.abs_diff(x2) + y1.abs_diff(y2),
            _ => usize::from(v != goal),
        }
    }
}

fn is_passable_char(ch: char) -> bool {
    matches!(ch, '.' | 'G' | 'S')
}
