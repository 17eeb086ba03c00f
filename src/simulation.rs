use anyhow::ensure;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::common::{Action, AgentState, Cell, Move, PackageAction, Snapshot, Task};
use crate::config::Config;
use crate::engine::Engine;
use crate::map::Map;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageState {
    Unreleased,
    Waiting,
    InTransit,
    Delivered,
}

#[derive(Debug, Clone)]
struct Package {
    task: Task,
    state: PackageState,
}

/// Ground-truth grid world the engine is driven against.
///
/// Moves are applied first: off-grid or blocked moves become stays and when
/// several agents end up on one cell the lowest index keeps it. Package
/// actions follow on the new positions. Every effective move costs
/// `move_cost`, a delivery pays `delivery_reward` up to the deadline and
/// `delay_reward` after it.
#[derive(Debug)]
pub struct Simulation {
    map: Arc<Map>,
    tick: usize,
    max_ticks: usize,
    agents: Vec<AgentState>,
    packages: Vec<Package>,
    index_of: HashMap<usize, usize>,
    move_cost: f64,
    delivery_reward: f64,
    delay_reward: f64,
    total_reward: f64,
}

impl Simulation {
    pub fn new(map: Arc<Map>, scenario: &Scenario, config: &Config) -> anyhow::Result<Self> {
        scenario.validate(&map)?;

        let mut packages: Vec<Package> = scenario
            .tasks
            .iter()
            .map(|task| Package {
                task: task.clone(),
                state: PackageState::Unreleased,
            })
            .collect();
        packages.sort_by_key(|package| package.task.id);
        let index_of = packages
            .iter()
            .enumerate()
            .map(|(index, package)| (package.task.id, index))
            .collect();

        Ok(Simulation {
            map,
            tick: 0,
            max_ticks: config.max_ticks,
            agents: scenario
                .agents
                .iter()
                .map(|&position| AgentState {
                    position,
                    carrying: None,
                })
                .collect(),
            packages,
            index_of,
            move_cost: config.move_cost,
            delivery_reward: config.delivery_reward,
            delay_reward: config.delay_reward,
            total_reward: 0.0,
        })
    }

    pub fn tick(&self) -> usize {
        self.tick
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn delivered(&self) -> usize {
        self.packages
            .iter()
            .filter(|package| package.state == PackageState::Delivered)
            .count()
    }

    pub fn is_done(&self) -> bool {
        self.tick >= self.max_ticks
            || self
                .packages
                .iter()
                .all(|package| package.state == PackageState::Delivered)
    }

    /// Current state, releasing packages whose time has come.
    pub fn snapshot(&mut self) -> Snapshot {
        let mut new_tasks = Vec::new();
        for package in &mut self.packages {
            if package.state == PackageState::Unreleased && package.task.release_time <= self.tick {
                package.state = PackageState::Waiting;
                new_tasks.push(package.task.clone());
            }
        }
        Snapshot {
            tick: self.tick,
            agents: self.agents.clone(),
            new_tasks,
        }
    }

    /// Applies one action per agent and advances the clock. Returns this tick's reward.
    pub fn step(&mut self, actions: &[Action]) -> anyhow::Result<f64> {
        ensure!(
            actions.len() == self.agents.len(),
            "expected {} actions, got {}",
            self.agents.len(),
            actions.len()
        );
        let mut reward = 0.0;

        let proposed: Vec<Cell> = self
            .agents
            .iter()
            .zip(actions)
            .map(|(agent, action)| {
                action
                    .movement
                    .apply(agent.position)
                    .filter(|&cell| self.map.is_passable(cell))
                    .unwrap_or(agent.position)
            })
            .collect();

        let mut claimed: HashMap<Cell, usize> = HashMap::new();
        let mut next: Vec<Cell> = Vec::with_capacity(proposed.len());
        for (index, &cell) in proposed.iter().enumerate() {
            if claimed.contains_key(&cell) {
                next.push(self.agents[index].position);
            } else {
                claimed.insert(cell, index);
                next.push(cell);
            }
        }
        // An agent sent back may land on a cell someone else just won; undo until stable.
        loop {
            let mut owner: HashMap<Cell, usize> = HashMap::new();
            let mut reverted = false;
            for index in 0..next.len() {
                match owner.get(&next[index]) {
                    Some(&other) => {
                        let mover = if next[other] != self.agents[other].position {
                            other
                        } else {
                            index
                        };
                        next[mover] = self.agents[mover].position;
                        reverted = true;
                        break;
                    }
                    None => {
                        owner.insert(next[index], index);
                    }
                }
            }
            if !reverted {
                break;
            }
        }

        for (index, agent) in self.agents.iter_mut().enumerate() {
            if actions[index].movement != Move::Stay && next[index] != agent.position {
                reward += self.move_cost;
            }
            agent.position = next[index];
        }

        for (index, action) in actions.iter().enumerate() {
            let agent = &mut self.agents[index];
            match action.package {
                PackageAction::Pickup if agent.carrying.is_none() => {
                    let tick = self.tick;
                    let waiting = self.packages.iter_mut().find(|package| {
                        package.state == PackageState::Waiting
                            && package.task.pickup == agent.position
                            && package.task.release_time <= tick
                    });
                    if let Some(package) = waiting {
                        package.state = PackageState::InTransit;
                        agent.carrying = Some(package.task.id);
                        debug!("agent {index} picks up package {}", package.task.id);
                    }
                }
                PackageAction::Drop => {
                    let Some(id) = agent.carrying else { continue };
                    let Some(&slot) = self.index_of.get(&id) else { continue };
                    let package = &mut self.packages[slot];
                    if package.task.dropoff == agent.position {
                        package.state = PackageState::Delivered;
                        agent.carrying = None;
                        reward += if self.tick <= package.task.deadline {
                            self.delivery_reward
                        } else {
                            self.delay_reward
                        };
                        debug!("agent {index} delivers package {id} at tick {}", self.tick);
                    }
                }
                _ => {}
            }
        }

        self.tick += 1;
        self.total_reward += reward;
        Ok(reward)
    }
}

/// Drives `engine` against `simulation` until the episode ends. Returns the total reward.
pub fn run_episode(engine: &mut Engine, simulation: &mut Simulation) -> anyhow::Result<f64> {
    while !simulation.is_done() {
        let snapshot = simulation.snapshot();
        let actions = engine.tick(&snapshot);
        simulation.step(&actions)?;
    }
    info!(
        "Episode finished at tick {:?}: delivered {:?}, total reward {:.2}",
        simulation.tick(),
        simulation.delivered(),
        simulation.total_reward()
    );
    Ok(simulation.total_reward())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn single_task_episode() -> (Arc<Map>, Scenario) {
        let map = Arc::new(Map::open(3, 3).unwrap());
        let scenario = Scenario {
            agents: vec![(0, 0)],
            tasks: vec![Task::new(1, (0, 2), (2, 2), 0, 10)],
            one_based: false,
        };
        (map, scenario)
    }

    #[test]
    fn test_single_task_end_to_end() {
        let (map, scenario) = single_task_episode();
        let config = Config::default();
        let mut simulation = Simulation::new(map.clone(), &scenario, &config).unwrap();
        let mut engine = Engine::new(map, &config);

        let mut emitted = Vec::new();
        for _ in 0..4 {
            let snapshot = simulation.snapshot();
            let actions = engine.tick(&snapshot);
            emitted.push(actions[0]);
            simulation.step(&actions).unwrap();
        }

        assert_eq!(emitted[0].movement, Move::Right);
        assert_eq!(emitted[1].movement, Move::Right);
        assert_eq!(
            emitted[2],
            Action {
                movement: Move::Stay,
                package: PackageAction::Pickup
            }
        );
        assert_eq!(emitted[3].movement, Move::Down);
        assert_eq!(
            simulation.agents()[0],
            AgentState {
                position: (1, 2),
                carrying: Some(1)
            }
        );

        let reward = run_episode(&mut engine, &mut simulation).unwrap();
        assert_eq!(simulation.delivered(), 1);
        assert_eq!(simulation.tick(), 6);
        assert!((reward - 9.96).abs() < 1e-9);
    }

    #[test]
    fn test_lower_index_wins_and_blocked_moves_stay() {
        let map = Arc::new(Map::parse("0 0 0\n1 0 1\n").unwrap());
        let scenario = Scenario {
            agents: vec![(0, 0), (0, 2)],
            tasks: vec![],
            one_based: false,
        };
        let mut simulation = Simulation::new(map, &scenario, &Config::default()).unwrap();
        let right = Action {
            movement: Move::Right,
            package: PackageAction::None,
        };
        let left = Action {
            movement: Move::Left,
            package: PackageAction::None,
        };
        let down = Action {
            movement: Move::Down,
            package: PackageAction::None,
        };

        let reward = simulation.step(&[right, left]).unwrap();
        assert_eq!(simulation.agents()[0].position, (0, 1));
        assert_eq!(simulation.agents()[1].position, (0, 2));
        assert!((reward + 0.01).abs() < 1e-9);

        simulation.step(&[Action::stay(), down]).unwrap();
        assert_eq!(simulation.agents()[1].position, (0, 2));
        assert!(simulation.step(&[right]).is_err());
    }

    #[test]
    fn test_pickup_takes_smallest_waiting_id_and_late_drop_pays_less() {
        let map = Arc::new(Map::open(1, 2).unwrap());
        let scenario = Scenario {
            agents: vec![(0, 0)],
            tasks: vec![
                Task::new(4, (0, 0), (0, 1), 0, 0),
                Task::new(2, (0, 0), (0, 1), 0, 0),
            ],
            one_based: false,
        };
        let mut simulation = Simulation::new(map, &scenario, &Config::default()).unwrap();
        simulation.snapshot();

        simulation
            .step(&[Action {
                movement: Move::Stay,
                package: PackageAction::Pickup,
            }])
            .unwrap();
        assert_eq!(simulation.agents()[0].carrying, Some(2));

        simulation
            .step(&[Action {
                movement: Move::Right,
                package: PackageAction::Drop,
            }])
            .unwrap();
        assert_eq!(simulation.agents()[0].carrying, None);
        assert!((simulation.total_reward() - (1.0 - 0.01)).abs() < 1e-9);
    }

    #[test]
    fn test_random_episode_keeps_agents_apart() {
        let map = Arc::new(Map::from_file("map_file/test/test.map").unwrap());
        for planner in [PlannerKind::Greedy, PlannerKind::Prioritized, PlannerKind::ConflictBased] {
            let config = Config {
                planner,
                max_ticks: 40,
                ..Config::default()
            };
            let mut rng = StdRng::seed_from_u64(3);
            let scenario = Scenario::generate(&map, 3, 8, config.max_ticks, &mut rng).unwrap();
            let mut simulation = Simulation::new(map.clone(), &scenario, &config).unwrap();
            let mut engine = Engine::new(map.clone(), &config);

            while !simulation.is_done() {
                let snapshot = simulation.snapshot();
                let actions = engine.tick(&snapshot);
                simulation.step(&actions).unwrap();

                // The simulator never had to override a resolved move.
                for (before, (after, action)) in snapshot
                    .agents
                    .iter()
                    .zip(simulation.agents().iter().zip(&actions))
                {
                    assert_eq!(
                        action.movement.apply(before.position),
                        Some(after.position),
                        "{planner:?}"
                    );
                }
                let cells: HashSet<Cell> = simulation.agents().iter().map(|a| a.position).collect();
                assert_eq!(cells.len(), 3, "{planner:?}");
            }
            assert!(simulation.delivered() > 0, "{planner:?}");
        }
    }
}
