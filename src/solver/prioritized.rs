use super::{PathPlanner, PlanRequest};
use crate::algorithm::a_star_search;
use crate::common::{Constraint, Path};
use crate::map::Map;
use crate::oracle::ShortestPathOracle;
use crate::stat::Stats;

use std::collections::HashSet;
use tracing::debug;

/// Plans agents one at a time in priority order. Each agent treats the paths
/// already fixed as moving obstacles and their final cells as permanently taken.
pub struct PrioritizedPlanner {
    max_low_level_expansions: usize,
}

impl PrioritizedPlanner {
    pub fn new(max_low_level_expansions: usize) -> Self {
        PrioritizedPlanner {
            max_low_level_expansions,
        }
    }
}

fn reserve(path: &Path, constraints: &mut HashSet<Constraint>) {
    for t in 1..path.len() {
        constraints.insert(Constraint::vertex(path[t], t));
        // Forbid the swap along the same edge.
        constraints.insert(Constraint::edge(path[t], path[t - 1], t));
    }
    if let Some(&last) = path.last() {
        constraints.insert(Constraint::Vertex {
            position: last,
            time_step: path.len() - 1,
            is_permanent: true,
        });
    }
}

impl PathPlanner for PrioritizedPlanner {
    fn plan_paths(
        &mut self,
        requests: &[PlanRequest],
        map: &Map,
        _oracle: &ShortestPathOracle,
        stats: &mut Stats,
    ) -> Vec<Path> {
        // Pinned agents go first. Agents already at their goal go last so
        // they step aside instead of walling others off.
        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&index| {
            let request = &requests[index];
            (
                !request.pinned,
                request.start == request.goal,
                request.priority(),
            )
        });

        let mut paths = vec![Vec::new(); requests.len()];
        let mut reserved = HashSet::new();

        for index in order {
            let request = &requests[index];
            if request.pinned {
                let path = vec![request.start];
                reserve(&path, &mut reserved);
                paths[index] = path;
                continue;
            }
            let path = match a_star_search(
                map,
                request.agent,
                request.start,
                request.goal,
                &reserved,
                self.max_low_level_expansions,
                stats,
            ) {
                Ok(path) => path,
                Err(err) => {
                    debug!("{err}, agent stays");
                    stats.plan_failures += 1;
                    vec![request.start]
                }
            };
            reserve(&path, &mut reserved);
            paths[index] = path;
        }

        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::detect_conflicts;

    #[test]
    fn test_lower_priority_agent_yields() {
        let map = Map::open(3, 3).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let mut urgent = PlanRequest::new(0, (1, 0), (1, 2));
        urgent.deadline = Some(5);
        let requests = [urgent, PlanRequest::new(1, (0, 1), (2, 1))];

        let mut planner = PrioritizedPlanner::new(1000);
        let paths = planner.plan_paths(&requests, &map, &oracle, &mut Stats::default());

        assert_eq!(paths[0].len(), 3);
        assert_eq!(paths[1].first(), Some(&(0, 1)));
        assert_eq!(paths[1].last(), Some(&(2, 1)));
        assert!(detect_conflicts(&paths).is_empty());
    }

    #[test]
    fn test_resting_agent_steps_aside() {
        let map = Map::parse("0 0 0\n1 0 1\n").unwrap();
        let oracle = ShortestPathOracle::new(&map);
        // Agent 0 has nothing to do but sits in the corridor agent 1 must cross.
        let requests = [
            PlanRequest::new(0, (0, 1), (0, 1)),
            PlanRequest::new(1, (0, 0), (0, 2)),
        ];

        let mut planner = PrioritizedPlanner::new(1000);
        let paths = planner.plan_paths(&requests, &map, &oracle, &mut Stats::default());

        assert_eq!(paths[1], vec![(0, 0), (0, 1), (0, 2)]);
        assert_eq!(paths[0].last(), Some(&(0, 1)));
        assert!(detect_conflicts(&paths).is_empty());
    }

    #[test]
    fn test_priority_order_ignores_request_order() {
        let map = Map::open(1, 4).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        // Agent 1 is more urgent and its goal is agent 0's start, so agent 0 must clear out.
        let mut urgent = PlanRequest::new(1, (0, 2), (0, 1));
        urgent.deadline = Some(2);
        let requests = [PlanRequest::new(0, (0, 1), (0, 0)), urgent];

        let mut planner = PrioritizedPlanner::new(1000);
        let paths = planner.plan_paths(&requests, &map, &oracle, &mut Stats::default());

        assert_eq!(paths[1], vec![(0, 2), (0, 1)]);
        assert_eq!(paths[0], vec![(0, 1), (0, 0)]);
        assert!(detect_conflicts(&paths).is_empty());
    }

    #[test]
    fn test_pinned_agent_is_routed_around() {
        let map = Map::open(3, 3).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        // Agent 1 is more urgent, but agent 0 holds the center cell this tick.
        let mut urgent = PlanRequest::new(1, (1, 0), (1, 2));
        urgent.deadline = Some(1);
        let requests = [PlanRequest::pinned(0, (1, 1)), urgent];

        let mut planner = PrioritizedPlanner::new(1000);
        let paths = planner.plan_paths(&requests, &map, &oracle, &mut Stats::default());

        assert_eq!(paths[0], vec![(1, 1)]);
        assert_eq!(paths[1].len(), 5);
        assert!(!paths[1].contains(&(1, 1)));
        assert!(detect_conflicts(&paths).is_empty());
    }
}
