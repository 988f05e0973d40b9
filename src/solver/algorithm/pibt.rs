use std::sync::Arc;

use rand::Rng;
use tracing::{instrument, trace};

use crate::common::Configuration;
use crate::dist_table::Heuristic;
use crate::map::{Graph, VertexId};
use crate::solver::comm::LowLevelNode;

struct Frame {
    agent: usize,
    cursor: usize,
    swap_agent: Option<usize>,
    // Candidate index reserved while a displaced agent is being planned.
    pending: Option<usize>,
}

/// Priority inheritance with backtracking, generating one successor
/// configuration per call.
#[derive(Debug)]
pub(crate) struct Pibt {
    graph: Arc<Graph>,
    goals: Configuration,
    allow_swap: bool,
    swap_operation: bool,
    unreachable: usize,

    v_now: Vec<VertexId>,
    v_next: Vec<Option<VertexId>>,
    occupied_now: Vec<Option<usize>>,
    occupied_next: Vec<Option<usize>>,
    candidates: Vec<Vec<VertexId>>,
    tie_breakers: Vec<f64>,

    pub(crate) calls: usize,
}

impl Pibt {
    pub(crate) fn new(
        graph: Arc<Graph>,
        goals: Configuration,
        allow_swap: bool,
        swap_operation: bool,
    ) -> Self {
        let size = graph.size();
        let num_agents = goals.len();
        Pibt {
            graph,
            goals,
            allow_swap,
            swap_operation,
            unreachable: size,
            v_now: Vec::with_capacity(num_agents),
            v_next: vec![None; num_agents],
            occupied_now: vec![None; size],
            occupied_next: vec![None; size],
            candidates: vec![Vec::new(); num_agents],
            tie_breakers: vec![0.0; size],
            calls: 0,
        }
    }

    /// Builds the configuration following `current` under the constraints of
    /// `constraint`, planning free agents in `order`. `None` means this
    /// attempt failed; the caller moves on to another constraint node.
    #[instrument(skip_all, name = "get_new_config", fields(depth = constraint.depth), level = "trace")]
    pub(crate) fn get_new_config<R: Rng + ?Sized>(
        &mut self,
        current: &Configuration,
        order: &[usize],
        constraint: &LowLevelNode,
        heuristic: &mut Heuristic,
        rng: &mut R,
    ) -> Option<Configuration> {
        self.reset(current);

        for (i, l) in constraint.constraints() {
            // vertex collision
            if self.occupied_next[l.0].is_some() {
                return None;
            }
            // swap collision
            if !self.allow_swap {
                let l_pre = current[i];
                if let (Some(a), Some(b)) = (self.occupied_next[l_pre.0], self.occupied_now[l.0]) {
                    if a == b {
                        return None;
                    }
                }
            }
            self.v_next[i] = Some(l);
            self.occupied_next[l.0] = Some(i);
        }

        for &k in order {
            if self.v_next[k].is_none() && !self.pibt(k, heuristic, rng) {
                trace!("pibt failed for agent {k}");
                return None;
            }
        }

        let next: Vec<VertexId> = self.v_next.iter().flatten().copied().collect();
        if next.len() != current.len() {
            return None;
        }
        let next = Configuration::new(next);
        if !self.is_valid_step(current, &next) {
            trace!("rejecting colliding configuration {next}");
            return None;
        }
        Some(next)
    }

    fn reset(&mut self, current: &Configuration) {
        for (a, &v) in self.v_now.iter().enumerate() {
            if self.occupied_now[v.0] == Some(a) {
                self.occupied_now[v.0] = None;
            }
        }
        for next in self.v_next.iter_mut() {
            if let Some(v) = next.take() {
                self.occupied_next[v.0] = None;
            }
        }
        self.v_now.clear();
        self.v_now.extend_from_slice(current);
        for (a, &v) in self.v_now.iter().enumerate() {
            self.occupied_now[v.0] = Some(a);
        }
    }

    fn is_valid_step(&self, current: &Configuration, next: &Configuration) -> bool {
        if !next.is_collision_free() {
            return false;
        }
        if self.allow_swap {
            return true;
        }
        next.iter().enumerate().all(|(i, &v)| {
            match self.occupied_now[v.0] {
                Some(j) if j != i => next[j] != current[i],
                _ => true,
            }
        })
    }

    fn distance(&self, heuristic: &mut Heuristic, agent: usize, v: VertexId) -> usize {
        heuristic.get(agent, v).unwrap_or(self.unreachable)
    }

    fn open_frame<R: Rng + ?Sized>(
        &mut self,
        agent: usize,
        heuristic: &mut Heuristic,
        rng: &mut R,
    ) -> Frame {
        self.calls += 1;
        let v_now = self.v_now[agent];

        let mut keyed: Vec<(f64, VertexId)> = Vec::with_capacity(self.graph.neighbors(v_now).len() + 1);
        let neighbors = self.graph.neighbors(v_now).to_vec();
        for u in neighbors.into_iter().chain(std::iter::once(v_now)) {
            self.tie_breakers[u.0] = rng.gen::<f64>();
            let key = self.distance(heuristic, agent, u) as f64 + self.tie_breakers[u.0];
            keyed.push((key, u));
        }
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut candidates = std::mem::take(&mut self.candidates[agent]);
        candidates.clear();
        candidates.extend(keyed.into_iter().map(|(_, u)| u));
        self.candidates[agent] = candidates;

        let swap_agent = if self.swap_operation {
            self.swap_possible_and_required(agent, heuristic)
        } else {
            None
        };
        if swap_agent.is_some() {
            self.candidates[agent].reverse();
        }

        Frame {
            agent,
            cursor: 0,
            swap_agent,
            pending: None,
        }
    }

    /// Plans `root` and every agent it displaces. An explicit stack holds the
    /// chain of displaced agents; an agent is on it at most once because it
    /// holds a reservation while its successors are planned.
    fn pibt<R: Rng + ?Sized>(&mut self, root: usize, heuristic: &mut Heuristic, rng: &mut R) -> bool {
        let first = self.open_frame(root, heuristic, rng);
        let mut stack = vec![first];
        let mut returned: Option<bool> = None;

        while let Some(frame) = stack.last_mut() {
            let ai = frame.agent;
            let swap_agent = frame.swap_agent;

            if let (Some(ok), Some(k)) = (returned.take(), frame.pending.take()) {
                if ok {
                    self.pull_swap_agent(ai, k, swap_agent);
                    stack.pop();
                    returned = Some(true);
                    continue;
                }
            }

            let mut descend = None;
            let mut success = None;
            while frame.cursor < self.candidates[ai].len() {
                let k = frame.cursor;
                frame.cursor += 1;
                let u = self.candidates[ai][k];

                // avoid vertex conflicts
                if self.occupied_next[u.0].is_some() {
                    continue;
                }

                let ak = self.occupied_now[u.0];

                // avoid swap conflicts
                if !self.allow_swap {
                    if let Some(ak) = ak {
                        if self.v_next[ak] == Some(self.v_now[ai]) {
                            continue;
                        }
                    }
                }

                self.occupied_next[u.0] = Some(ai);
                self.v_next[ai] = Some(u);

                // priority inheritance
                if let Some(ak) = ak {
                    if ak != ai && self.v_next[ak].is_none() {
                        frame.pending = Some(k);
                        descend = Some(ak);
                        break;
                    }
                }

                success = Some(k);
                break;
            }

            if let Some(ak) = descend {
                let child = self.open_frame(ak, heuristic, rng);
                stack.push(child);
                continue;
            }

            if let Some(k) = success {
                self.pull_swap_agent(ai, k, swap_agent);
                stack.pop();
                returned = Some(true);
                continue;
            }

            // failed to secure a vertex, stay in place
            let v = self.v_now[ai];
            self.occupied_next[v.0] = Some(ai);
            self.v_next[ai] = Some(v);
            stack.pop();
            returned = Some(false);
        }

        returned.unwrap_or(false)
    }

    fn pull_swap_agent(&mut self, ai: usize, k: usize, swap_agent: Option<usize>) {
        let Some(aj) = swap_agent else {
            return;
        };
        let v = self.v_now[ai];
        if k == 0 && self.v_next[aj].is_none() && self.occupied_next[v.0].is_none() {
            self.v_next[aj] = Some(v);
            self.occupied_next[v.0] = Some(aj);
        }
    }

    fn swap_possible_and_required(&self, ai: usize, heuristic: &mut Heuristic) -> Option<usize> {
        let v_now = self.v_now[ai];
        let best = self.candidates[ai][0];
        // wants to stay, no swap needed
        if best == v_now {
            return None;
        }

        // usual swap situation: the preferred vertex is occupied
        if let Some(aj) = self.occupied_now[best.0] {
            if self.v_next[aj].is_none()
                && self.is_swap_required(ai, aj, v_now, self.v_now[aj], heuristic)
                && self.is_swap_possible(self.v_now[aj], v_now)
            {
                return Some(aj);
            }
        }

        // clear operation: a neighbor needs to come through
        for &u in self.graph.neighbors(v_now) {
            let Some(ak) = self.occupied_now[u.0] else {
                continue;
            };
            if best == self.v_now[ak] {
                continue;
            }
            if self.is_swap_required(ak, ai, v_now, best, heuristic)
                && self.is_swap_possible(best, v_now)
            {
                return Some(ak);
            }
        }

        None
    }

    fn is_pull_blocked(&self, u: VertexId, v_pusher: VertexId) -> bool {
        if u == v_pusher {
            return true;
        }
        // a dead end already holding its owner
        self.graph.neighbors(u).len() == 1
            && self.occupied_now[u.0].is_some_and(|a| self.goals[a] == u)
    }

    /// Simulates pushing along a corridor: does the puller need to give way?
    fn is_swap_required(
        &self,
        pusher: usize,
        puller: usize,
        v_pusher_origin: VertexId,
        v_puller_origin: VertexId,
        heuristic: &mut Heuristic,
    ) -> bool {
        let mut v_pusher = v_pusher_origin;
        let mut v_puller = v_puller_origin;

        while self.distance(heuristic, pusher, v_puller) < self.distance(heuristic, pusher, v_pusher) {
            let mut n = self.graph.neighbors(v_puller).len();
            let mut tmp = None;
            for &u in self.graph.neighbors(v_puller) {
                if self.is_pull_blocked(u, v_pusher) {
                    n -= 1;
                } else {
                    tmp = Some(u);
                }
            }
            if n >= 2 {
                return false; // room to pass each other
            }
            let Some(next) = tmp else {
                break;
            };
            v_pusher = v_puller;
            v_puller = next;
        }

        self.distance(heuristic, puller, v_pusher) < self.distance(heuristic, puller, v_puller)
            && (self.distance(heuristic, pusher, v_pusher) == 0
                || self.distance(heuristic, pusher, v_puller)
                    < self.distance(heuristic, pusher, v_pusher))
    }

    /// Simulates pulling along a corridor: is there a branch to swap in?
    fn is_swap_possible(&self, v_pusher_origin: VertexId, v_puller_origin: VertexId) -> bool {
        let mut v_pusher = v_pusher_origin;
        let mut v_puller = v_puller_origin;

        for _ in 0..self.graph.size() {
            if v_puller == v_pusher_origin {
                return false;
            }
            let mut n = self.graph.neighbors(v_puller).len();
            let mut tmp = None;
            for &u in self.graph.neighbors(v_puller) {
                if self.is_pull_blocked(u, v_pusher) {
                    n -= 1;
                } else {
                    tmp = Some(u);
                }
            }
            if n >= 2 {
                return true;
            }
            let Some(next) = tmp else {
                return false;
            };
            v_pusher = v_puller;
            v_puller = next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist_table::HeuristicKind;
    use crate::instance::Instance;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid_instance(map: &str, starts: &[(usize, usize)], goals: &[(usize, usize)]) -> Instance {
        let graph = Arc::new(Graph::from_map_str(map).unwrap());
        let starts = starts.iter().map(|&(x, y)| graph.vertex_at(x, y).unwrap()).collect();
        let goals = goals.iter().map(|&(x, y)| graph.vertex_at(x, y).unwrap()).collect();
        Instance::new(graph, starts, goals).unwrap()
    }

    fn pibt_for(ins: &Instance, allow_swap: bool) -> (Pibt, Heuristic) {
        (
            Pibt::new(ins.graph.clone(), ins.goals.clone(), allow_swap, true),
            Heuristic::new(HeuristicKind::DistTable, ins),
        )
    }

    #[test]
    fn test_single_agent_moves_towards_goal() {
        let ins = grid_instance("type octile\nheight 1\nwidth 4\nmap\n....\n", &[(0, 0)], &[(3, 0)]);
        let (mut pibt, mut heuristic) = pibt_for(&ins, false);
        let mut rng = StdRng::seed_from_u64(0);

        let next = pibt
            .get_new_config(&ins.starts, &[0], &LowLevelNode::root(), &mut heuristic, &mut rng)
            .unwrap();
        assert_eq!(ins.graph.cell(next[0]), Some((1, 0)));
        assert_eq!(pibt.calls, 1);
    }

    #[test]
    fn test_priority_inheritance_pushes_blocker() {
        // Agent 0 wants to pass through the cell held by agent 1.
        let ins = grid_instance(
            "type octile\nheight 1\nwidth 4\nmap\n....\n",
            &[(0, 0), (1, 0)],
            &[(3, 0), (2, 0)],
        );
        let (mut pibt, mut heuristic) = pibt_for(&ins, false);
        let mut rng = StdRng::seed_from_u64(3);

        let next = pibt
            .get_new_config(&ins.starts, &[0, 1], &LowLevelNode::root(), &mut heuristic, &mut rng)
            .unwrap();
        assert_eq!(ins.graph.cell(next[0]), Some((1, 0)));
        assert_eq!(ins.graph.cell(next[1]), Some((2, 0)));
        assert!(next.is_collision_free());
    }

    #[test]
    fn test_swap_forbidden_on_single_edge() {
        let graph = Arc::new(Graph::from_adjacency(vec![vec![1], vec![0]]).unwrap());
        let ins = Instance::new(graph, vec![VertexId(0), VertexId(1)], vec![VertexId(1), VertexId(0)]).unwrap();
        let (mut pibt, mut heuristic) = pibt_for(&ins, false);
        let mut rng = StdRng::seed_from_u64(0);

        let next = pibt.get_new_config(&ins.starts, &[0, 1], &LowLevelNode::root(), &mut heuristic, &mut rng);
        // Both agents can only stay where they are.
        assert_eq!(next, Some(ins.starts.clone()));

        let forced = LowLevelNode::root().child(0, VertexId(1)).child(1, VertexId(0));
        assert!(pibt
            .get_new_config(&ins.starts, &[0, 1], &forced, &mut heuristic, &mut rng)
            .is_none());
    }

    #[test]
    fn test_swap_allowed_on_single_edge() {
        let graph = Arc::new(Graph::from_adjacency(vec![vec![1], vec![0]]).unwrap());
        let ins = Instance::new(graph, vec![VertexId(0), VertexId(1)], vec![VertexId(1), VertexId(0)]).unwrap();
        let (mut pibt, mut heuristic) = pibt_for(&ins, true);
        let mut rng = StdRng::seed_from_u64(0);

        let next = pibt
            .get_new_config(&ins.starts, &[0, 1], &LowLevelNode::root(), &mut heuristic, &mut rng)
            .unwrap();
        assert_eq!(next, ins.goals);
    }

    #[test]
    fn test_constraint_collision_rejected() {
        let ins = grid_instance(
            "type octile\nheight 1\nwidth 3\nmap\n...\n",
            &[(0, 0), (2, 0)],
            &[(2, 0), (0, 0)],
        );
        let (mut pibt, mut heuristic) = pibt_for(&ins, false);
        let mut rng = StdRng::seed_from_u64(0);
        let middle = ins.graph.vertex_at(1, 0).unwrap();

        let both_middle = LowLevelNode::root().child(0, middle).child(1, middle);
        assert!(pibt
            .get_new_config(&ins.starts, &[0, 1], &both_middle, &mut heuristic, &mut rng)
            .is_none());

        // The scratch state is reset between calls.
        let one_middle = LowLevelNode::root().child(0, middle);
        let next = pibt
            .get_new_config(&ins.starts, &[0, 1], &one_middle, &mut heuristic, &mut rng)
            .unwrap();
        assert_eq!(next[0], middle);
        assert_eq!(next[1], ins.starts[1]);
    }
}
