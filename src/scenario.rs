use anyhow::Context;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use tracing::info;

use crate::common::{Cell, Task};
use crate::error::ScenarioError;
use crate::map::Map;

/// Agent start cells plus the full task list of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub agents: Vec<Cell>,
    pub tasks: Vec<Task>,
    /// Coordinates in the file start at 1; they are shifted on load.
    #[serde(default)]
    pub one_based: bool,
}

fn shift(cell: Cell) -> Option<Cell> {
    Some((cell.0.checked_sub(1)?, cell.1.checked_sub(1)?))
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        Ok(scenario.into_zero_based()?)
    }

    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("cannot read scenario {path}"))?;
        Self::from_yaml_str(&content).with_context(|| format!("malformed scenario {path}"))
    }

    pub fn into_zero_based(mut self) -> Result<Self, ScenarioError> {
        if !self.one_based {
            return Ok(self);
        }
        for (agent, cell) in self.agents.iter_mut().enumerate() {
            *cell = shift(*cell).ok_or(ScenarioError::InvalidAgentStart { agent, cell: *cell })?;
        }
        for task in &mut self.tasks {
            for cell in [&mut task.pickup, &mut task.dropoff] {
                *cell = shift(*cell).ok_or(ScenarioError::InvalidTaskCell {
                    id: task.id,
                    cell: *cell,
                })?;
            }
        }
        self.one_based = false;
        Ok(self)
    }

    pub fn validate(&self, map: &Map) -> Result<(), ScenarioError> {
        let mut starts: HashMap<Cell, usize> = HashMap::new();
        for (agent, &cell) in self.agents.iter().enumerate() {
            if !map.is_passable(cell) {
                return Err(ScenarioError::InvalidAgentStart { agent, cell });
            }
            if let Some(&first) = starts.get(&cell) {
                return Err(ScenarioError::SharedAgentStart {
                    first,
                    second: agent,
                    cell,
                });
            }
            starts.insert(cell, agent);
        }

        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id) {
                return Err(ScenarioError::DuplicateTaskId(task.id));
            }
            for cell in [task.pickup, task.dropoff] {
                if !map.is_passable(cell) {
                    return Err(ScenarioError::InvalidTaskCell { id: task.id, cell });
                }
            }
        }
        Ok(())
    }

    /// Random episode on `map`.
    ///
    /// Agents get distinct free cells. Each task gets a random pickup and a
    /// different random dropoff. The first `min(agents, 10) + 1` tasks are
    /// released at tick 0, the rest uniformly in `[1, max_ticks)`. Deadlines
    /// are `release + uniform[N / 2, N)` with `N` the number of map rows.
    /// Ids are handed out from 1 in release order.
    pub fn generate<R: Rng + ?Sized>(
        map: &Map,
        num_agents: usize,
        num_tasks: usize,
        max_ticks: usize,
        rng: &mut R,
    ) -> Result<Self, ScenarioError> {
        let free: Vec<Cell> = map.free_cells().collect();
        if free.len() < num_agents {
            return Err(ScenarioError::NotEnoughFreeCells {
                free: free.len(),
                requested: num_agents,
            });
        }
        if num_tasks > 0 && free.len() < 2 {
            return Err(ScenarioError::NotEnoughFreeCells {
                free: free.len(),
                requested: 2,
            });
        }

        let agents: Vec<Cell> = free.choose_multiple(rng, num_agents).copied().collect();

        let immediate = num_agents.min(10) + 1;
        let n = map.height;
        let mut drafts = Vec::with_capacity(num_tasks);
        for index in 0..num_tasks {
            let pickup = free[rng.gen_range(0..free.len())];
            let dropoff = loop {
                let cell = free[rng.gen_range(0..free.len())];
                if cell != pickup {
                    break cell;
                }
            };
            let release_time = if index < immediate || max_ticks <= 1 {
                0
            } else {
                rng.gen_range(1..max_ticks)
            };
            let deadline = release_time + rng.gen_range(n / 2..n.max(n / 2 + 1));
            drafts.push((release_time, pickup, dropoff, deadline));
        }

        // Stable, so tasks released together keep their draw order.
        drafts.sort_by_key(|draft| draft.0);
        let tasks = drafts
            .into_iter()
            .enumerate()
            .map(|(index, (release_time, pickup, dropoff, deadline))| {
                Task::new(index + 1, pickup, dropoff, release_time, deadline)
            })
            .collect();

        let scenario = Scenario {
            agents,
            tasks,
            one_based: false,
        };
        info!(
            "Generate scenario: {} agents at {:?}, {} tasks",
            scenario.agents.len(),
            scenario.agents,
            scenario.tasks.len()
        );
        Ok(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    const SCENARIO: &str = "
one_based: true
agents:
  - [1, 1]
  - [5, 5]
tasks:
  - id: 1
    pickup: [1, 3]
    dropoff: [3, 3]
    release_time: 0
    deadline: 10
";

    #[test]
    fn test_one_based_scenario_is_shifted() {
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        assert!(!scenario.one_based);
        assert_eq!(scenario.agents, vec![(0, 0), (4, 4)]);
        assert_eq!(scenario.tasks[0].pickup, (0, 2));
        assert_eq!(scenario.tasks[0].dropoff, (2, 2));

        let map = Map::from_file("map_file/test/test.map").unwrap();
        assert!(scenario.validate(&map).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let scenario = Scenario::load_from_file("map_file/test/test.yaml").unwrap();
        assert_eq!(scenario.agents, vec![(0, 0), (4, 0), (4, 4)]);
        assert_eq!(scenario.tasks[2].release_time, 4);
        assert!(scenario.validate(&map).is_ok());

        assert!(Scenario::load_from_file("map_file/test/missing.yaml").is_err());
    }

    #[test]
    fn test_zero_coordinate_in_one_based_file() {
        let yaml = "one_based: true\nagents: [[0, 1]]\ntasks: []\n";
        assert!(Scenario::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_scenarios() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let base = Scenario::from_yaml_str(SCENARIO).unwrap();

        let mut shared = base.clone();
        shared.agents.push((0, 0));
        assert_eq!(
            shared.validate(&map),
            Err(ScenarioError::SharedAgentStart {
                first: 0,
                second: 2,
                cell: (0, 0)
            })
        );

        let mut blocked = base.clone();
        blocked.tasks[0].dropoff = (1, 1);
        assert_eq!(
            blocked.validate(&map),
            Err(ScenarioError::InvalidTaskCell { id: 1, cell: (1, 1) })
        );

        let mut duplicate = base.clone();
        duplicate.tasks.push(duplicate.tasks[0].clone());
        assert_eq!(duplicate.validate(&map), Err(ScenarioError::DuplicateTaskId(1)));
    }

    #[test]
    fn test_generate_random_scenario() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let scenario = Scenario::generate(&map, 3, 12, 50, &mut rng).unwrap();

        assert!(scenario.validate(&map).is_ok());
        assert_eq!(scenario.tasks.len(), 12);
        for (index, task) in scenario.tasks.iter().enumerate() {
            assert_eq!(task.id, index + 1);
            assert_ne!(task.pickup, task.dropoff);
            assert!(task.deadline >= task.release_time + map.height / 2);
            assert!(task.deadline < task.release_time + map.height);
        }
        let immediate = scenario.tasks.iter().filter(|t| t.release_time == 0).count();
        assert!(immediate >= 4);
        assert!(scenario
            .tasks
            .windows(2)
            .all(|pair| pair[0].release_time <= pair[1].release_time));

        let mut again = StdRng::seed_from_u64(0);
        assert_eq!(Scenario::generate(&map, 3, 12, 50, &mut again).unwrap(), scenario);
    }

    #[test]
    fn test_generate_needs_room() {
        let map = Map::parse("0 1\n").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            Scenario::generate(&map, 2, 0, 10, &mut rng),
            Err(ScenarioError::NotEnoughFreeCells {
                free: 1,
                requested: 2
            })
        );
    }
}
