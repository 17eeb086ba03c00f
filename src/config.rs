use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug, Default)]
#[command(
    name = "Rust MAPD",
    about = "Multi-agent pickup and delivery coordination in Rust.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the YAML scenario file, random scenario if absent")]
    pub scenario_path: Option<String>,

    #[arg(long, help = "Path to the output file")]
    pub output_path: Option<String>,

    #[arg(long, help = "Number of agents for random scenarios")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Number of tasks for random scenarios")]
    pub num_tasks: Option<usize>,

    #[arg(long, help = "Episode length in ticks")]
    pub max_ticks: Option<usize>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<usize>,

    #[arg(long, value_enum, help = "Path planner to use")]
    pub planner: Option<PlannerKind>,

    #[arg(long, value_enum, help = "Task assignment strategy")]
    pub assignment: Option<AssignmentKind>,

    #[arg(long, value_enum, help = "Cost policy of the greedy assignment")]
    pub cost_policy: Option<CostPolicyKind>,

    #[arg(long, help = "Weight of the distance to pickup")]
    pub alpha: Option<usize>,

    #[arg(long, help = "Weight of the delivery distance")]
    pub beta: Option<usize>,

    #[arg(long, help = "High-level node expansion limit of the coordinator")]
    pub max_high_level_expansions: Option<usize>,

    #[arg(long, help = "Node expansion limit of a single low-level search")]
    pub max_low_level_expansions: Option<usize>,

    #[arg(long, help = "Expansions without improvement before a random constraint is injected")]
    pub stagnation_window: Option<usize>,

    #[arg(long, help = "Ticks without progress before an agent escapes")]
    pub stuck_limit: Option<usize>,

    #[arg(long, help = "Expire pending tasks this many ticks past their deadline")]
    pub expiry_grace: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    /// Oracle shortest paths, collisions left to the resolver.
    Greedy,
    /// Agents planned one after another around earlier reservations.
    Prioritized,
    /// Conflict-based search over constraint trees.
    ConflictBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Greedy,
    Matching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPolicyKind {
    Pickup,
    Weighted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub map_path: String,
    pub scenario_path: Option<String>,
    pub output_path: String,
    pub num_agents: usize,
    pub num_tasks: usize,
    pub max_ticks: usize,
    pub seed: usize,
    pub planner: PlannerKind,
    pub assignment: AssignmentKind,
    pub cost_policy: CostPolicyKind,
    pub alpha: usize,
    pub beta: usize,
    pub max_high_level_expansions: usize,
    pub max_low_level_expansions: usize,
    pub stagnation_window: usize,
    pub stuck_limit: usize,
    pub expiry_grace: Option<usize>,
    pub move_cost: f64,
    pub delivery_reward: f64,
    pub delay_reward: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/test/test.map".to_string(),
            scenario_path: None,
            output_path: "result/result.json".to_string(),
            num_agents: 3,
            num_tasks: 20,
            max_ticks: 100,
            seed: 0,
            planner: PlannerKind::ConflictBased,
            assignment: AssignmentKind::Greedy,
            cost_policy: CostPolicyKind::Pickup,
            alpha: 1,
            beta: 1,
            max_high_level_expansions: 400,
            max_low_level_expansions: 10_000,
            stagnation_window: 5,
            stuck_limit: 5,
            expiry_grace: None,
            move_cost: -0.01,
            delivery_reward: 10.0,
            delay_reward: 1.0,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Flags given on the command line win over the file.
    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scenario_path) = &cli.scenario_path {
            self.scenario_path = Some(scenario_path.clone());
        }
        if let Some(output_path) = &cli.output_path {
            self.output_path = output_path.clone();
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(num_tasks) = cli.num_tasks {
            self.num_tasks = num_tasks;
        }
        if let Some(max_ticks) = cli.max_ticks {
            self.max_ticks = max_ticks;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(planner) = cli.planner {
            self.planner = planner;
        }
        if let Some(assignment) = cli.assignment {
            self.assignment = assignment;
        }
        if let Some(cost_policy) = cli.cost_policy {
            self.cost_policy = cost_policy;
        }
        if let Some(alpha) = cli.alpha {
            self.alpha = alpha;
        }
        if let Some(beta) = cli.beta {
            self.beta = beta;
        }
        if let Some(limit) = cli.max_high_level_expansions {
            self.max_high_level_expansions = limit;
        }
        if let Some(limit) = cli.max_low_level_expansions {
            self.max_low_level_expansions = limit;
        }
        if let Some(window) = cli.stagnation_window {
            self.stagnation_window = window;
        }
        if let Some(stuck_limit) = cli.stuck_limit {
            self.stuck_limit = stuck_limit;
        }
        if cli.expiry_grace.is_some() {
            self.expiry_grace = cli.expiry_grace;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let weighted = self.assignment == AssignmentKind::Matching
            || self.cost_policy == CostPolicyKind::Weighted;
        if weighted && (self.alpha == 0 || self.beta == 0) {
            return Err(anyhow!(
                "Assignment weights must be positive, got alpha {} beta {}",
                self.alpha,
                self.beta
            ));
        }

        for (name, value) in [
            ("max_high_level_expansions", self.max_high_level_expansions),
            ("max_low_level_expansions", self.max_low_level_expansions),
            ("stagnation_window", self.stagnation_window),
            ("stuck_limit", self.stuck_limit),
            ("max_ticks", self.max_ticks),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be greater than 0"));
            }
        }

        if self.scenario_path.is_none() && self.num_agents == 0 {
            return Err(anyhow!("Random scenarios need at least one agent"));
        }
        Ok(())
    }
}
