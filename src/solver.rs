mod cbs;
mod greedy;
mod prioritized;

pub use cbs::ConflictBasedSearch;
pub use greedy::GreedyPlanner;
pub use prioritized::PrioritizedPlanner;

use crate::common::{Cell, Constraint, Path};
use crate::config::{Config, PlannerKind};
use crate::map::Map;
use crate::oracle::ShortestPathOracle;
use crate::stat::Stats;

use std::collections::HashSet;

/// One agent's planning problem for the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub agent: usize,
    pub start: Cell,
    pub goal: Cell,
    /// Deadline of the carried task, if any. Earlier deadlines plan and move first.
    pub deadline: Option<usize>,
    /// Remainder of a previously accepted path, offered as the unconstrained plan.
    pub seed: Option<Path>,
    /// Held on `start` for this tick, e.g. while handling a package.
    pub pinned: bool,
}

impl PlanRequest {
    pub fn new(agent: usize, start: Cell, goal: Cell) -> Self {
        PlanRequest {
            agent,
            start,
            goal,
            deadline: None,
            seed: None,
            pinned: false,
        }
    }

    /// Request for an agent that must not leave `start` this tick.
    pub fn pinned(agent: usize, start: Cell) -> Self {
        PlanRequest {
            pinned: true,
            ..PlanRequest::new(agent, start, start)
        }
    }

    pub fn priority(&self) -> (usize, usize) {
        (self.deadline.unwrap_or(usize::MAX), self.agent)
    }

    /// The seed path, if it still leads from `start` to `goal`.
    pub(crate) fn valid_seed(&self) -> Option<&Path> {
        let seed = self.seed.as_ref()?;
        if seed.first() == Some(&self.start) && seed.last() == Some(&self.goal) {
            Some(seed)
        } else {
            None
        }
    }
}

/// Cells of pinned agents, permanently closed to everyone else from the first step.
pub(crate) fn pinned_constraints(requests: &[PlanRequest]) -> HashSet<Constraint> {
    requests
        .iter()
        .filter(|request| request.pinned)
        .map(|request| Constraint::Vertex {
            position: request.start,
            time_step: 1,
            is_permanent: true,
        })
        .collect()
}

/// Produces one path per request, in request order. Every path starts at the
/// request's start cell; pinned agents and agents that cannot be planned get a
/// single-cell stay path. Planners never fail.
pub trait PathPlanner {
    fn plan_paths(
        &mut self,
        requests: &[PlanRequest],
        map: &Map,
        oracle: &ShortestPathOracle,
        stats: &mut Stats,
    ) -> Vec<Path>;
}

pub fn build_planner(config: &Config) -> Box<dyn PathPlanner> {
    match config.planner {
        PlannerKind::Greedy => Box::new(GreedyPlanner),
        PlannerKind::Prioritized => {
            Box::new(PrioritizedPlanner::new(config.max_low_level_expansions))
        }
        PlannerKind::ConflictBased => Box::new(ConflictBasedSearch::new(
            config.max_high_level_expansions,
            config.max_low_level_expansions,
            config.stagnation_window,
            config.seed as u64,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_must_match_endpoints() {
        let mut request = PlanRequest::new(0, (0, 0), (0, 2));
        assert_eq!(request.valid_seed(), None);

        request.seed = Some(vec![(0, 0), (0, 1), (0, 2)]);
        assert!(request.valid_seed().is_some());

        request.goal = (1, 2);
        assert_eq!(request.valid_seed(), None);
    }

    #[test]
    fn test_priority_prefers_earlier_deadline() {
        let mut urgent = PlanRequest::new(3, (0, 0), (0, 1));
        urgent.deadline = Some(4);
        let relaxed = PlanRequest::new(1, (1, 0), (1, 1));
        assert!(urgent.priority() < relaxed.priority());
    }

    #[test]
    fn test_pinned_cells_close_from_first_step() {
        let requests = [
            PlanRequest::pinned(0, (1, 1)),
            PlanRequest::new(1, (0, 0), (2, 2)),
        ];
        let constraints = pinned_constraints(&requests);
        assert_eq!(constraints.len(), 1);
        let closed = constraints.iter().next().unwrap();
        assert!(closed.is_violated((0, 1), (1, 1), 1));
        assert!(closed.is_violated((1, 1), (1, 1), 7));
        assert!(!closed.is_violated((0, 0), (0, 1), 1));
    }
}
