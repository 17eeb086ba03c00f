use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::assignment::{build_strategy, Assignment, AssignmentStrategy, IdleAgent};
use crate::common::{
    Action, AgentState, Cell, PackageAction, Path, Snapshot, Task, TaskId, TaskStatus,
};
use crate::config::Config;
use crate::map::Map;
use crate::oracle::ShortestPathOracle;
use crate::registry::TaskRegistry;
use crate::resolver::{resolve, ResolverAgent};
use crate::solver::{build_planner, PathPlanner, PlanRequest};
use crate::stat::Stats;

/// What the engine remembers about one agent between ticks.
#[derive(Debug, Clone, Default)]
struct AgentBook {
    last_position: Option<Cell>,
    last_carrying: Option<TaskId>,
    active_path: Path,
    goal: Option<Cell>,
    stuck_ticks: usize,
}

/// Per-episode coordinator: consumes one snapshot per tick and answers with
/// one action per agent, in agent-index order.
pub struct Engine {
    map: Arc<Map>,
    oracle: Arc<ShortestPathOracle>,
    registry: TaskRegistry,
    assignment: Assignment,
    strategy: Box<dyn AssignmentStrategy>,
    planner: Box<dyn PathPlanner>,
    books: Vec<AgentBook>,
    rng: StdRng,
    stuck_limit: usize,
    expiry_grace: Option<usize>,
    stats: Stats,
}

impl Engine {
    pub fn new(map: Arc<Map>, config: &Config) -> Self {
        let oracle = Arc::new(ShortestPathOracle::new(&map));
        Self::with_oracle(map, oracle, config)
    }

    /// Reuses an oracle already built for `map`.
    pub fn with_oracle(map: Arc<Map>, oracle: Arc<ShortestPathOracle>, config: &Config) -> Self {
        Engine {
            map,
            oracle,
            registry: TaskRegistry::new(),
            assignment: Assignment::new(),
            strategy: build_strategy(config),
            planner: build_planner(config),
            books: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed as u64),
            stuck_limit: config.stuck_limit,
            expiry_grace: config.expiry_grace,
            stats: Stats::default(),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[instrument(skip_all, name = "tick", fields(tick = snapshot.tick), level = "debug")]
    pub fn tick(&mut self, snapshot: &Snapshot) -> Vec<Action> {
        let tick_start_time = Instant::now();
        self.stats.ticks += 1;
        if self.books.len() < snapshot.agents.len() {
            self.books.resize(snapshot.agents.len(), AgentBook::default());
        }

        self.registry.ingest(snapshot.new_tasks.iter().cloned());
        self.reconcile(&snapshot.agents);

        if let Some(grace) = self.expiry_grace {
            let expired = self.registry.expire_overdue(snapshot.tick, grace);
            if !expired.is_empty() {
                debug!("expired tasks {expired:?}");
                self.stats.expired += expired.len();
            }
        }

        let escapes = self.escape_stuck_agents(&snapshot.agents);
        self.assign_idle_agents(snapshot, &escapes);

        let mut requests = Vec::with_capacity(snapshot.agents.len());
        let mut packages = Vec::with_capacity(snapshot.agents.len());
        for (index, agent) in snapshot.agents.iter().enumerate() {
            let (goal, package) = self.goal_of(index, agent);
            packages.push(package);

            // Agents handling a package stay put; escaping agents hold their
            // cell in the plan and take their random step afterwards.
            if package != PackageAction::None {
                requests.push(PlanRequest::pinned(index, agent.position));
                continue;
            }
            let goal = if escapes[index].is_some() {
                agent.position
            } else {
                goal
            };

            let book = &self.books[index];
            let seed = match book.active_path.get(1) {
                Some(&next) if next == agent.position && book.goal == Some(goal) => {
                    Some(book.active_path[1..].to_vec())
                }
                _ => None,
            };

            requests.push(PlanRequest {
                agent: index,
                start: agent.position,
                goal,
                deadline: self.carried_deadline(agent),
                seed,
                pinned: false,
            });
        }

        let paths = self
            .planner
            .plan_paths(&requests, &self.map, &self.oracle, &mut self.stats);

        let resolver_agents: Vec<ResolverAgent> = snapshot
            .agents
            .iter()
            .enumerate()
            .map(|(index, agent)| {
                let planned = paths[index].get(1).copied().unwrap_or(agent.position);
                let proposed = if requests[index].pinned {
                    agent.position
                } else {
                    escapes[index].unwrap_or(planned)
                };
                ResolverAgent {
                    current: agent.position,
                    proposed,
                    priority: requests[index].priority(),
                }
            })
            .collect();

        let resolution = resolve(&resolver_agents, &self.map);
        self.stats.resolver_overrides += resolution.overrides;
        self.stats.cycles_broken += resolution.cycles_broken;

        let mut actions = Vec::with_capacity(snapshot.agents.len());
        for (index, agent) in snapshot.agents.iter().enumerate() {
            let book = &mut self.books[index];
            let path = &paths[index];
            // The plan only survives if the resolver let the agent follow it.
            book.active_path = if escapes[index].is_none()
                && resolution.next[index] == path.get(1).copied().unwrap_or(agent.position)
            {
                path.clone()
            } else {
                Vec::new()
            };
            book.goal = Some(requests[index].goal);
            book.last_position = Some(agent.position);
            book.last_carrying = agent.carrying;

            actions.push(Action {
                movement: resolution.moves[index],
                package: packages[index],
            });
        }

        self.stats.time_us += tick_start_time.elapsed().as_micros() as usize;
        debug!(
            "actions {}",
            actions
                .iter()
                .map(|action| action.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        actions
    }

    /// Brings registry and assignment in line with what the simulator reports.
    fn reconcile(&mut self, agents: &[AgentState]) {
        for (index, agent) in agents.iter().enumerate() {
            let previous = self.books[index].last_carrying;

            if let Some(dropped) = previous.filter(|&task| agent.carrying != Some(task)) {
                match self.registry.mark_delivered(dropped) {
                    Ok(()) => self.stats.deliveries += 1,
                    Err(err) => warn!("{err}"),
                }
                self.assignment.remove_task(dropped);
            }

            if let Some(picked) = agent.carrying.filter(|&task| previous != Some(task)) {
                self.record_pickup(index, picked);
            }
        }

        // Drop bindings whose task was taken by someone else or left the Assigned state.
        let stale: Vec<(usize, TaskId)> = self
            .assignment
            .iter()
            .filter(|&(agent, task)| {
                let carried = agents.get(agent).and_then(|state| state.carrying) == Some(task);
                !carried && self.registry.status(task) != Some(TaskStatus::Assigned)
            })
            .collect();
        for (agent, task) in stale {
            debug!("clear stale binding agent {agent} -> task {task}");
            self.assignment.remove_agent(agent);
        }
    }

    fn record_pickup(&mut self, index: usize, picked: TaskId) {
        match self.registry.status(picked) {
            None => {
                warn!("agent {index} carries unknown task {picked}");
                return;
            }
            Some(TaskStatus::Pending) => {
                if let Err(err) = self.registry.mark_assigned(picked) {
                    warn!("{err}");
                }
            }
            _ => {}
        }

        // The simulator may hand out a different package than the one assigned.
        if let Some(owner) = self.assignment.agent_of(picked) {
            if owner != index {
                debug!("task {picked} taken from agent {owner} by agent {index}");
                self.assignment.remove_task(picked);
            }
        }
        if let Some(planned) = self.assignment.task_of(index) {
            if planned != picked {
                self.assignment.remove_agent(index);
                if let Err(err) = self.registry.release(planned) {
                    warn!("{err}");
                }
            }
        }
        if self.assignment.task_of(index).is_none() {
            if let Err(err) = self.assignment.insert(index, picked) {
                warn!("{err}");
            }
        }

        match self.registry.mark_in_transit(picked) {
            Ok(()) => self.stats.pickups += 1,
            Err(err) => warn!("{err}"),
        }
    }

    /// Agents that neither moved nor changed cargo for `stuck_limit` ticks give
    /// up an unpicked task and take one random step. Returns the escape cell per agent.
    fn escape_stuck_agents(&mut self, agents: &[AgentState]) -> Vec<Option<Cell>> {
        let occupied: HashSet<Cell> = agents.iter().map(|agent| agent.position).collect();
        let mut escapes = vec![None; agents.len()];

        for (index, agent) in agents.iter().enumerate() {
            let book = &mut self.books[index];
            let busy = agent.carrying.is_some() || self.assignment.task_of(index).is_some();
            let idle_tick = book.last_position == Some(agent.position)
                && book.last_carrying == agent.carrying;

            if !(busy && idle_tick) {
                book.stuck_ticks = 0;
                continue;
            }
            book.stuck_ticks += 1;
            if book.stuck_ticks < self.stuck_limit {
                continue;
            }

            book.stuck_ticks = 0;
            book.active_path.clear();
            self.stats.stuck_escapes += 1;

            if agent.carrying.is_none() {
                if let Some(task) = self.assignment.remove_agent(index) {
                    match self.registry.release(task) {
                        Ok(()) => self.stats.released_assignments += 1,
                        Err(err) => warn!("{err}"),
                    }
                }
            }

            let options: Vec<Cell> = self
                .map
                .neighbors(agent.position)
                .iter()
                .copied()
                .filter(|cell| !occupied.contains(cell))
                .collect();
            escapes[index] = options.choose(&mut self.rng).copied();
            debug!(
                "agent {index} stuck at {:?}, escape to {:?}",
                agent.position, escapes[index]
            );
        }
        escapes
    }

    fn assign_idle_agents(&mut self, snapshot: &Snapshot, escapes: &[Option<Cell>]) {
        let idle: Vec<IdleAgent> = snapshot
            .agents
            .iter()
            .enumerate()
            .filter(|&(index, agent)| {
                agent.carrying.is_none()
                    && escapes[index].is_none()
                    && self.assignment.task_of(index).is_none()
            })
            .map(|(id, agent)| IdleAgent {
                id,
                position: agent.position,
            })
            .collect();
        if idle.is_empty() {
            return;
        }

        let pairs = {
            let pending: Vec<&Task> = self
                .registry
                .pending()
                .filter(|task| task.release_time <= snapshot.tick)
                .collect();
            if pending.is_empty() {
                return;
            }
            self.strategy
                .assign(&idle, &pending, snapshot.tick, &self.oracle)
        };

        for (agent, task) in pairs {
            if let Err(err) = self.assignment.insert(agent, task) {
                warn!("{err}");
                continue;
            }
            match self.registry.mark_assigned(task) {
                Ok(()) => self.stats.assignments += 1,
                Err(err) => {
                    warn!("{err}");
                    self.assignment.remove_agent(agent);
                }
            }
        }
    }

    /// Current goal cell and package action of an agent, judged on its pre-move position.
    fn goal_of(&self, index: usize, agent: &AgentState) -> (Cell, PackageAction) {
        if let Some(carried) = agent.carrying {
            return match self.registry.get(carried) {
                Some(task) if task.dropoff == agent.position => {
                    (agent.position, PackageAction::Drop)
                }
                Some(task) => (task.dropoff, PackageAction::None),
                None => (agent.position, PackageAction::None),
            };
        }

        let assigned = self
            .assignment
            .task_of(index)
            .and_then(|task| self.registry.get(task));
        match assigned {
            Some(task) if task.pickup == agent.position => (agent.position, PackageAction::Pickup),
            Some(task) => (task.pickup, PackageAction::None),
            None => (agent.position, PackageAction::None),
        }
    }

    fn carried_deadline(&self, agent: &AgentState) -> Option<usize> {
        agent
            .carrying
            .and_then(|task| self.registry.get(task))
            .map(|task| task.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Move;
    use crate::config::PlannerKind;

    fn snapshot(tick: usize, agents: &[(Cell, Option<TaskId>)], new_tasks: Vec<Task>) -> Snapshot {
        Snapshot {
            tick,
            agents: agents
                .iter()
                .map(|&(position, carrying)| AgentState { position, carrying })
                .collect(),
            new_tasks,
        }
    }

    #[test]
    fn test_pickup_then_delivery_bookkeeping() {
        let map = Arc::new(Map::open(3, 3).unwrap());
        let mut engine = Engine::new(map, &Config::default());
        let task = Task::new(1, (0, 2), (2, 2), 0, 10);

        let actions = engine.tick(&snapshot(0, &[((0, 0), None)], vec![task]));
        assert_eq!(actions[0].movement, Move::Right);
        assert_eq!(engine.registry().status(1), Some(TaskStatus::Assigned));
        assert_eq!(engine.assignment().task_of(0), Some(1));

        engine.tick(&snapshot(1, &[((0, 1), None)], vec![]));
        let actions = engine.tick(&snapshot(2, &[((0, 2), None)], vec![]));
        assert_eq!(
            actions[0],
            Action {
                movement: Move::Stay,
                package: PackageAction::Pickup
            }
        );

        let actions = engine.tick(&snapshot(3, &[((0, 2), Some(1))], vec![]));
        assert_eq!(engine.registry().status(1), Some(TaskStatus::InTransit));
        assert_eq!(actions[0].movement, Move::Down);

        engine.tick(&snapshot(4, &[((1, 2), Some(1))], vec![]));
        let actions = engine.tick(&snapshot(5, &[((2, 2), Some(1))], vec![]));
        assert_eq!(actions[0].package, PackageAction::Drop);

        engine.tick(&snapshot(6, &[((2, 2), None)], vec![]));
        assert_eq!(engine.registry().status(1), Some(TaskStatus::Delivered));
        assert!(engine.assignment().is_empty());
        assert_eq!(engine.stats().deliveries, 1);
    }

    #[test]
    fn test_simulator_may_pick_a_different_package() {
        let map = Arc::new(Map::open(3, 3).unwrap());
        let mut engine = Engine::new(map, &Config::default());
        let tasks = vec![
            Task::new(1, (0, 1), (2, 2), 0, 20),
            Task::new(2, (0, 1), (2, 0), 0, 30),
        ];
        let agents = [((0, 0), None), ((2, 1), None)];
        engine.tick(&snapshot(0, &agents, tasks));
        assert_eq!(engine.assignment().task_of(0), Some(1));
        assert_eq!(engine.assignment().task_of(1), Some(2));

        // Agent 1 ends up with task 1 instead; agent 0 loses its binding.
        engine.tick(&snapshot(1, &[((0, 1), None), ((1, 1), Some(1))], vec![]));
        assert_eq!(engine.assignment().task_of(1), Some(1));
        assert_eq!(engine.registry().status(1), Some(TaskStatus::InTransit));
        // Task 2 went back to the pool and agent 0, now idle, picks it up from there.
        assert_eq!(engine.assignment().task_of(0), Some(2));
        assert_eq!(engine.registry().status(2), Some(TaskStatus::Assigned));
    }

    #[test]
    fn test_unknown_cargo_is_tolerated() {
        let map = Arc::new(Map::open(2, 2).unwrap());
        let mut engine = Engine::new(map, &Config::default());
        let actions = engine.tick(&snapshot(0, &[((0, 0), Some(99))], vec![]));
        assert_eq!(actions, vec![Action::stay()]);
    }

    #[test]
    fn test_stuck_agent_releases_unpicked_task() {
        // Agent 1 parks on the only corridor cell leading to the pickup and never moves.
        let map = Arc::new(Map::parse("0 0 0\n1 0 1\n").unwrap());
        let config = Config {
            planner: PlannerKind::Greedy,
            stuck_limit: 2,
            ..Config::default()
        };
        let mut engine = Engine::new(map, &config);
        let task = Task::new(1, (0, 2), (1, 1), 0, 50);

        let agents = [((0, 0), None), ((0, 1), Some(7))];
        engine.tick(&snapshot(0, &agents, vec![task]));
        assert_eq!(engine.assignment().task_of(0), Some(1));

        engine.tick(&snapshot(1, &agents, vec![]));
        engine.tick(&snapshot(2, &agents, vec![]));
        assert!(engine.stats().stuck_escapes >= 1);
        assert!(engine.stats().released_assignments >= 1);
    }

    #[test]
    fn test_package_handler_stays_for_every_planner() {
        let map = Arc::new(Map::parse("0 0 0\n1 0 1\n").unwrap());
        for planner in [PlannerKind::Greedy, PlannerKind::Prioritized, PlannerKind::ConflictBased] {
            let config = Config {
                planner,
                ..Config::default()
            };
            let mut engine = Engine::new(map.clone(), &config);
            // Agent 0 stands on its pickup in the corridor agent 1 wants to cross.
            let tasks = vec![
                Task::new(1, (0, 1), (1, 1), 0, 20),
                Task::new(5, (0, 0), (0, 2), 0, 20),
            ];
            let agents = [((0, 1), None), ((0, 0), Some(5))];
            let actions = engine.tick(&snapshot(0, &agents, tasks));

            assert_eq!(engine.assignment().task_of(0), Some(1), "{planner:?}");
            assert_eq!(
                actions[0],
                Action {
                    movement: Move::Stay,
                    package: PackageAction::Pickup
                },
                "{planner:?}"
            );
            assert_eq!(actions[1].movement, Move::Stay, "{planner:?}");
        }
    }

    #[test]
    fn test_tick_time_is_accumulated() {
        let map = Arc::new(Map::open(4, 4).unwrap());
        let mut engine = Engine::new(map, &Config::default());
        let task = Task::new(1, (3, 3), (0, 3), 0, 30);
        engine.tick(&snapshot(0, &[((0, 0), None)], vec![task]));
        engine.tick(&snapshot(1, &[((0, 1), None)], vec![]));
        assert_eq!(engine.stats().ticks, 2);
        assert!(engine.stats().time_us > 0);
    }

    #[test]
    fn test_conflicting_agents_never_share_a_cell() {
        let map = Arc::new(Map::open(3, 3).unwrap());
        for planner in [PlannerKind::Greedy, PlannerKind::Prioritized, PlannerKind::ConflictBased] {
            let config = Config {
                planner,
                ..Config::default()
            };
            let mut engine = Engine::new(map.clone(), &config);
            let tasks = vec![
                Task::new(1, (1, 2), (0, 0), 0, 20),
                Task::new(2, (2, 1), (0, 2), 0, 20),
            ];
            let agents = [((1, 0), None), ((0, 1), None)];
            let actions = engine.tick(&snapshot(0, &agents, tasks));

            let next: Vec<Cell> = agents
                .iter()
                .zip(&actions)
                .map(|(&(position, _), action)| action.movement.apply(position).unwrap())
                .collect();
            assert_ne!(next[0], next[1], "{planner:?}");
        }
    }
}
