use tracing::debug;

use super::{AssignmentStrategy, CostPolicy, IdleAgent};
use crate::common::{Task, TaskId};
use crate::oracle::ShortestPathOracle;

/// Nearest-cost assignment.
///
/// With `PickupDistance` tasks are served in deadline order and each one takes
/// the closest remaining agent (ties: lowest agent id). With `Weighted` the
/// loop is agent-major instead: every agent in id order takes the remaining
/// task with the lowest weighted cost (ties: earlier deadline, then lower id),
/// since the delivery leg only discriminates between tasks.
pub struct GreedyAssignment {
    policy: CostPolicy,
}

impl GreedyAssignment {
    pub fn new(policy: CostPolicy) -> Self {
        GreedyAssignment { policy }
    }

    fn task_major(
        &self,
        idle: &[IdleAgent],
        pending: &[&Task],
        oracle: &ShortestPathOracle,
    ) -> Vec<(usize, TaskId)> {
        let mut available: Vec<IdleAgent> = idle.to_vec();
        available.sort_by_key(|agent| agent.id);
        let mut pairs = Vec::new();

        for task in pending {
            if available.is_empty() {
                break;
            }
            // min_by_key keeps the first minimum, which is the lowest id.
            let best = available
                .iter()
                .enumerate()
                .filter_map(|(index, agent)| {
                    self.policy
                        .cost(oracle, agent.position, task)
                        .map(|cost| (index, cost))
                })
                .min_by_key(|&(_, cost)| cost);

            if let Some((index, cost)) = best {
                let agent = available.remove(index);
                debug!("greedy: task {} -> agent {} (cost {cost})", task.id, agent.id);
                pairs.push((agent.id, task.id));
            }
        }
        pairs
    }

    fn agent_major(
        &self,
        idle: &[IdleAgent],
        pending: &[&Task],
        oracle: &ShortestPathOracle,
    ) -> Vec<(usize, TaskId)> {
        let mut agents: Vec<IdleAgent> = idle.to_vec();
        agents.sort_by_key(|agent| agent.id);
        let mut remaining: Vec<&Task> = pending.to_vec();
        let mut pairs = Vec::new();

        for agent in agents {
            let best = remaining
                .iter()
                .enumerate()
                .filter_map(|(index, task)| {
                    self.policy
                        .cost(oracle, agent.position, task)
                        .map(|cost| (index, (cost, task.deadline, task.id)))
                })
                .min_by_key(|&(_, key)| key);

            if let Some((index, (cost, _, _))) = best {
                let task = remaining.remove(index);
                debug!("greedy: agent {} -> task {} (cost {cost})", agent.id, task.id);
                pairs.push((agent.id, task.id));
            }
        }
        pairs
    }
}

impl AssignmentStrategy for GreedyAssignment {
    fn assign(
        &self,
        idle: &[IdleAgent],
        pending: &[&Task],
        _tick: usize,
        oracle: &ShortestPathOracle,
    ) -> Vec<(usize, TaskId)> {
        match self.policy {
            CostPolicy::PickupDistance => self.task_major(idle, pending, oracle),
            CostPolicy::Weighted { .. } => self.agent_major(idle, pending, oracle),
        }
    }
}
