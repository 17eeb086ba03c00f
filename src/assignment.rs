mod greedy;
mod matching;

pub use greedy::GreedyAssignment;
pub use matching::OptimalMatching;

use std::collections::BTreeMap;

use crate::common::{Cell, Task, TaskId};
use crate::config::{AssignmentKind, Config, CostPolicyKind};
use crate::error::AssignmentError;
use crate::oracle::ShortestPathOracle;

/// An agent that carries nothing and holds no task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleAgent {
    pub id: usize,
    pub position: Cell,
}

/// How candidate (agent, task) pairs are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostPolicy {
    /// Distance to the pickup cell only.
    PickupDistance,
    /// `alpha * dist(agent, pickup) + beta * dist(pickup, dropoff)`.
    Weighted { alpha: usize, beta: usize },
}

impl CostPolicy {
    /// Cost of sending an agent at `position` to serve `task`, `None` if unreachable.
    pub fn cost(&self, oracle: &ShortestPathOracle, position: Cell, task: &Task) -> Option<usize> {
        let to_pickup = oracle.distance(position, task.pickup)?;
        match *self {
            CostPolicy::PickupDistance => Some(to_pickup),
            CostPolicy::Weighted { alpha, beta } => {
                let to_dropoff = oracle.distance(task.pickup, task.dropoff)?;
                Some(alpha * to_pickup + beta * to_dropoff)
            }
        }
    }
}

/// Pairs idle agents with pending tasks.
///
/// Implementations only propose pairs; the caller records them. Proposed
/// pairs never reuse an agent or a task, and an agent with no reachable task
/// is simply left out.
pub trait AssignmentStrategy {
    fn assign(
        &self,
        idle: &[IdleAgent],
        pending: &[&Task],
        tick: usize,
        oracle: &ShortestPathOracle,
    ) -> Vec<(usize, TaskId)>;
}

pub fn build_strategy(config: &Config) -> Box<dyn AssignmentStrategy> {
    let policy = match config.cost_policy {
        CostPolicyKind::Pickup => CostPolicy::PickupDistance,
        CostPolicyKind::Weighted => CostPolicy::Weighted {
            alpha: config.alpha,
            beta: config.beta,
        },
    };
    match config.assignment {
        AssignmentKind::Greedy => Box::new(GreedyAssignment::new(policy)),
        AssignmentKind::Matching => Box::new(OptimalMatching::new(config.alpha, config.beta)),
    }
}

/// Partial one-to-one mapping between agents and tasks.
#[derive(Debug, Default, Clone)]
pub struct Assignment {
    by_agent: BTreeMap<usize, TaskId>,
    by_task: BTreeMap<TaskId, usize>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent: usize, task: TaskId) -> Result<(), AssignmentError> {
        if let Some(&existing) = self.by_agent.get(&agent) {
            return Err(AssignmentError::AgentAlreadyAssigned {
                agent,
                task,
                existing,
            });
        }
        if let Some(&existing) = self.by_task.get(&task) {
            return Err(AssignmentError::TaskAlreadyAssigned {
                agent,
                task,
                existing,
            });
        }
        self.by_agent.insert(agent, task);
        self.by_task.insert(task, agent);
        Ok(())
    }

    pub fn task_of(&self, agent: usize) -> Option<TaskId> {
        self.by_agent.get(&agent).copied()
    }

    pub fn agent_of(&self, task: TaskId) -> Option<usize> {
        self.by_task.get(&task).copied()
    }

    pub fn remove_agent(&mut self, agent: usize) -> Option<TaskId> {
        let task = self.by_agent.remove(&agent)?;
        self.by_task.remove(&task);
        Some(task)
    }

    pub fn remove_task(&mut self, task: TaskId) -> Option<usize> {
        let agent = self.by_task.remove(&task)?;
        self.by_agent.remove(&agent);
        Some(agent)
    }

    pub fn len(&self) -> usize {
        self.by_agent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_agent.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, TaskId)> + '_ {
        self.by_agent.iter().map(|(&agent, &task)| (agent, task))
    }
}
