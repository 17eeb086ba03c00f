use super::{PathPlanner, PlanRequest};
use crate::common::Path;
use crate::map::Map;
use crate::oracle::ShortestPathOracle;
use crate::stat::Stats;

/// Independent oracle shortest paths. Collisions are left to the tick resolver.
pub struct GreedyPlanner;

impl PathPlanner for GreedyPlanner {
    fn plan_paths(
        &mut self,
        requests: &[PlanRequest],
        _map: &Map,
        oracle: &ShortestPathOracle,
        stats: &mut Stats,
    ) -> Vec<Path> {
        requests
            .iter()
            .map(|request| {
                if request.pinned {
                    return vec![request.start];
                }
                let path = oracle.path(request.start, request.goal);
                if path.is_empty() {
                    stats.plan_failures += 1;
                    vec![request.start]
                } else {
                    path
                }
            })
            .collect()
    }
}
