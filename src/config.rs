use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use crate::dist_table::HeuristicKind;
use crate::solver::{FactorizeKind, Objective};

#[derive(Parser, Debug, Default)]
#[command(
    name = "Rust LaCAM",
    about = "Anytime multi-agent path finding with LaCAM and PIBT.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file, overridden by the flags below")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the scenario file")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Number of agents")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Pick scenario rows randomly instead of the first ones")]
    pub random_agents: bool,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, help = "Time limit in seconds")]
    pub time_limit_sec: Option<f64>,

    #[arg(long, value_enum, help = "Objective refined by the anytime search")]
    pub objective: Option<Objective>,

    #[arg(long, help = "Probability of restarting from the root on a known configuration")]
    pub restart_rate: Option<f32>,

    #[arg(long, value_enum, help = "Distance heuristic")]
    pub heuristic: Option<HeuristicKind>,

    #[arg(long, help = "Allow two agents to swap across an edge")]
    pub allow_swap: bool,

    #[arg(long, help = "Disable the swap operation of PIBT")]
    pub no_swap_operation: bool,

    #[arg(long, help = "Number of concurrently planned seeds")]
    pub portfolio: Option<usize>,

    #[arg(long, value_enum, help = "Split the instance into independent sub-instances")]
    pub factorize: Option<FactorizeKind>,

    #[arg(long, help = "Path to the result file")]
    pub output_path: Option<String>,

    #[arg(long, help = "Path to the result file of factorized runs")]
    pub output_factorized_path: Option<String>,

    #[arg(long, help = "Append run statistics as JSON to this file")]
    pub stats_path: Option<String>,

    #[arg(long, help = "Omit starts, goals and solution from the result file")]
    pub log_short: bool,

    #[arg(short, long, action = ArgAction::Count, help = "Increase log verbosity")]
    pub verbose: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub map_path: String,
    pub scen_path: String,
    pub num_agents: usize,
    pub random_agents: bool,
    pub seed: u64,
    pub time_limit_sec: f64,
    pub objective: Objective,
    pub restart_rate: f32,
    pub heuristic: HeuristicKind,
    pub allow_swap: bool,
    pub swap_operation: bool,
    pub portfolio: usize,
    pub factorize: FactorizeKind,
    pub output_path: String,
    pub output_factorized_path: String,
    pub stats_path: Option<String>,
    pub log_short: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/random-32-32-10.map".to_string(),
            scen_path: "map_file/random-32-32-10-random-1.scen".to_string(),
            num_agents: 50,
            random_agents: false,
            seed: 0,
            time_limit_sec: 3.0,
            objective: Objective::None,
            restart_rate: 0.001,
            heuristic: HeuristicKind::DistTable,
            allow_swap: false,
            swap_operation: true,
            portfolio: 1,
            factorize: FactorizeKind::No,
            output_path: "result/result.txt".to_string(),
            output_factorized_path: "result/result_fact.txt".to_string(),
            stats_path: None,
            log_short: false,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("failed to parse yaml config")?;
        Ok(config)
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scen_path) = &cli.scen_path {
            self.scen_path = scen_path.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(time_limit_sec) = cli.time_limit_sec {
            self.time_limit_sec = time_limit_sec;
        }
        if let Some(objective) = cli.objective {
            self.objective = objective;
        }
        if let Some(restart_rate) = cli.restart_rate {
            self.restart_rate = restart_rate;
        }
        if let Some(heuristic) = cli.heuristic {
            self.heuristic = heuristic;
        }
        if let Some(portfolio) = cli.portfolio {
            self.portfolio = portfolio;
        }
        if let Some(factorize) = cli.factorize {
            self.factorize = factorize;
        }
        if let Some(output_path) = &cli.output_path {
            self.output_path = output_path.clone();
        }
        if let Some(output_factorized_path) = &cli.output_factorized_path {
            self.output_factorized_path = output_factorized_path.clone();
        }
        if let Some(stats_path) = &cli.stats_path {
            self.stats_path = Some(stats_path.clone());
        }

        // Flags only switch behaviour on.
        self.random_agents |= cli.random_agents;
        self.allow_swap |= cli.allow_swap;
        self.swap_operation &= !cli.no_swap_operation;
        self.log_short |= cli.log_short;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_agents == 0 {
            return Err(anyhow!("Number of agents must be positive"));
        }
        if !(0.0..=1.0).contains(&self.restart_rate) {
            return Err(anyhow!(
                "Restart rate must be within [0, 1], got {}",
                self.restart_rate
            ));
        }
        if self.time_limit_sec <= 0.0 || !self.time_limit_sec.is_finite() {
            return Err(anyhow!(
                "Time limit must be a positive number of seconds, got {}",
                self.time_limit_sec
            ));
        }
        if self.portfolio == 0 {
            return Err(anyhow!("Portfolio needs at least one seed"));
        }
        Ok(())
    }

    /// Seconds too large for a `Duration` mean no practical limit.
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_limit_sec).unwrap_or(Duration::MAX)
    }

    /// Where the result log goes, depending on whether the run factorizes.
    pub fn result_path(&self) -> &str {
        match self.factorize {
            FactorizeKind::No => &self.output_path,
            FactorizeKind::FactDistance | FactorizeKind::FactBbox => &self.output_factorized_path,
        }
    }

    /// Seeds planned by the portfolio, starting from the configured one.
    pub fn seeds(&self) -> Vec<u64> {
        (0..self.portfolio as u64)
            .map(|i| self.seed.wrapping_add(i))
            .collect()
    }
}
