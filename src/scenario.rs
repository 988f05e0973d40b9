use std::fs;

use anyhow::{anyhow, Context, Result};
use rand::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use crate::common::Agent;

/// One row of a MovingAI `.scen` file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Route {
    pub bucket: usize,
    pub start_x: usize,
    pub start_y: usize,
    pub goal_x: usize,
    pub goal_y: usize,
    pub optimal_length: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub routes: Vec<Route>,
}

impl Scenario {
    pub fn load_from_scen(path: &str) -> Result<Scenario> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read scenario {path}"))?;
        let scenario =
            Self::from_scen_str(&content).with_context(|| format!("invalid scenario {path}"))?;
        debug!("loaded {} routes from {path}", scenario.routes.len());
        Ok(scenario)
    }

    pub fn from_scen_str(content: &str) -> Result<Scenario> {
        let mut scenario = Scenario {
            map: String::new(),
            map_width: 0,
            map_height: 0,
            routes: Vec::new(),
        };

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            // First line is "version x"
            if line.is_empty() || line.starts_with("version") {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 9 {
                return Err(anyhow!(
                    "line {}: expected 9 columns, found {}",
                    line_no + 1,
                    parts.len()
                ));
            }
            let field = |k: usize| -> Result<usize> {
                parts[k]
                    .parse()
                    .with_context(|| format!("line {}: bad column {}", line_no + 1, k + 1))
            };

            let route = Route {
                bucket: field(0)?,
                start_x: field(4)?,
                start_y: field(5)?,
                goal_x: field(6)?,
                goal_y: field(7)?,
                optimal_length: parts[8]
                    .parse()
                    .with_context(|| format!("line {}: bad optimal length", line_no + 1))?,
            };

            if scenario.map.is_empty() {
                // Map details come from the first route entry
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }
            scenario.routes.push(route);
        }

        Ok(scenario)
    }

    fn agent(id: usize, route: &Route) -> Agent {
        Agent {
            id,
            start: (route.start_x, route.start_y),
            goal: (route.goal_x, route.goal_y),
        }
    }

    /// The first `num_agents` rows, in file order.
    pub fn first_agents(&self, num_agents: usize) -> Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            return Err(anyhow!(
                "scenario holds {} routes, {} agents requested",
                self.routes.len(),
                num_agents
            ));
        }
        let agents: Vec<Agent> = self.routes[..num_agents]
            .iter()
            .enumerate()
            .map(|(id, route)| Self::agent(id, route))
            .collect();
        debug!("Generate scen: {agents:?}");
        Ok(agents)
    }

    /// `num_agents` distinct rows picked with `rng`.
    pub fn generate_agents_randomly<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        if self.routes.len() < num_agents {
            return Err(anyhow!(
                "Not enough unique routes available to match the number of agents"
            ));
        }

        let agents: Vec<Agent> = self
            .routes
            .choose_multiple(rng, num_agents)
            .enumerate()
            .map(|(id, route)| Self::agent(id, route))
            .collect();

        info!("Generate random scen of {} agents", agents.len());
        debug!("Generate scen: {agents:?}");
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const SCEN: &str = "version 1\n\
        0\trandom-32-32-10.map\t32\t32\t9\t25\t8\t28\t4.00000000\n\
        1\trandom-32-32-10.map\t32\t32\t8\t19\t10\t17\t4.00000000\n\
        1\trandom-32-32-10.map\t32\t32\t1\t2\t3\t4\t4.00000000\n\
        2\trandom-32-32-10.map\t32\t32\t30\t0\t0\t30\t60.00000000\n";

    #[test]
    fn test_read_scenario() {
        let scen = Scenario::from_scen_str(SCEN).unwrap();
        assert_eq!(scen.map, "random-32-32-10.map");
        assert_eq!((scen.map_width, scen.map_height), (32, 32));
        assert_eq!(scen.routes.len(), 4);
        assert_eq!(scen.routes[3].bucket, 2);
        assert_eq!(scen.routes[3].optimal_length, 60.0);

        let agents = scen.first_agents(2).unwrap();
        let answer = [
            Agent {
                id: 0,
                start: (9, 25),
                goal: (8, 28),
            },
            Agent {
                id: 1,
                start: (8, 19),
                goal: (10, 17),
            },
        ];
        assert_eq!(agents, answer);
        assert!(scen.first_agents(5).is_err());
    }

    #[test]
    fn test_random_agents_are_distinct_and_seeded() {
        let scen = Scenario::from_scen_str(SCEN).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let agents = scen.generate_agents_randomly(3, &mut rng).unwrap();
        assert_eq!(agents.len(), 3);
        let starts: HashSet<_> = agents.iter().map(|a| a.start).collect();
        assert_eq!(starts.len(), 3);
        assert_eq!(agents.iter().map(|a| a.id).collect::<Vec<_>>(), vec![0, 1, 2]);

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(scen.generate_agents_randomly(3, &mut rng).unwrap(), agents);
        assert!(scen.generate_agents_randomly(5, &mut rng).is_err());
    }

    #[test]
    fn test_malformed_rows() {
        assert!(Scenario::from_scen_str("version 1\n0\tmap\t32\t32\t1\t2\n").is_err());
        assert!(Scenario::from_scen_str("version 1\n0\tmap\t32\t32\tx\t2\t3\t4\t1.0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("mapf_lacam_scenario_{}.scen", std::process::id()));
        fs::write(&path, SCEN).unwrap();
        let scen = Scenario::load_from_scen(path.to_str().unwrap()).unwrap();
        assert_eq!(scen.routes.len(), 4);
        fs::remove_file(&path).unwrap();
        assert!(Scenario::load_from_scen(path.to_str().unwrap()).is_err());
    }
}
