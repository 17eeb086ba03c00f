use super::{PathPlanner, PlanRequest};
use crate::common::{Constraint, Path, PlanNode};
use crate::map::Map;
use crate::oracle::ShortestPathOracle;
use crate::stat::Stats;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, instrument};

pub struct ConflictBasedSearch {
    max_high_level_expansions: usize,
    max_low_level_expansions: usize,
    stagnation_window: usize,
    rng: StdRng,
}

impl ConflictBasedSearch {
    pub fn new(
        max_high_level_expansions: usize,
        max_low_level_expansions: usize,
        stagnation_window: usize,
        seed: u64,
    ) -> Self {
        ConflictBasedSearch {
            max_high_level_expansions,
            max_low_level_expansions,
            stagnation_window,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Child of `node` with a vertex constraint on the next step of a random moving agent.
    fn perturb(
        &mut self,
        node: &PlanNode,
        requests: &[PlanRequest],
        map: &Map,
        node_id: usize,
        stats: &mut Stats,
    ) -> Option<PlanNode> {
        let moving: Vec<usize> = (0..node.paths.len())
            .filter(|&agent| node.paths[agent].len() > 1)
            .collect();
        let &agent = moving.choose(&mut self.rng)?;
        let constraint = Constraint::vertex(node.paths[agent][1], 1);
        debug!("stagnation: inject {constraint:?} on agent {agent:?}");

        stats.perturbations += 1;
        node.with_constraint(
            agent,
            constraint,
            requests,
            map,
            self.max_low_level_expansions,
            node_id,
            stats,
        )
    }
}

fn improves(candidate: &PlanNode, best: &PlanNode) -> bool {
    (candidate.conflicts.len(), candidate.cost) < (best.conflicts.len(), best.cost)
}

impl PathPlanner for ConflictBasedSearch {
    #[instrument(skip_all, name = "cbs", fields(agents = requests.len()), level = "debug")]
    fn plan_paths(
        &mut self,
        requests: &[PlanRequest],
        map: &Map,
        _oracle: &ShortestPathOracle,
        stats: &mut Stats,
    ) -> Vec<Path> {
        let total_solve_start_time = Instant::now();
        let mut open = BTreeSet::new();
        let root = PlanNode::new(requests, map, self.max_low_level_expansions, stats);

        let mut best = root.clone();
        let mut next_node_id = 1;
        let mut expansions = 0;
        let mut stagnation = 0;
        open.insert(root);

        while let Some(current_node) = open.pop_first() {
            if current_node.conflicts.is_empty() {
                debug!(
                    "solved with cost {:?} after {expansions:?} expansions in {:?}",
                    current_node.cost,
                    total_solve_start_time.elapsed()
                );
                return current_node.paths;
            }

            if expansions >= self.max_high_level_expansions {
                break;
            }
            expansions += 1;
            stats.high_level_expand_nodes += 1;

            let conflict = &current_node.conflicts[0];
            debug!("conflict: {conflict:?}");

            let mut improved = false;
            for resolve_first in [true, false] {
                if let Some(child) = current_node.update_constraint(
                    conflict,
                    resolve_first,
                    requests,
                    map,
                    self.max_low_level_expansions,
                    next_node_id,
                    stats,
                ) {
                    next_node_id += 1;
                    if improves(&child, &best) {
                        best = child.clone();
                        improved = true;
                    }
                    open.insert(child);
                }
            }

            if improved {
                stagnation = 0;
            } else {
                stagnation += 1;
            }

            if stagnation > self.stagnation_window {
                stagnation = 0;
                if let Some(child) = self.perturb(&current_node, requests, map, next_node_id, stats)
                {
                    next_node_id += 1;
                    open.insert(child);
                }
            }
        }

        stats.coordinator_exhausted += 1;
        debug!(
            "search exhausted after {expansions:?} expansions, \
             best node has {:?} conflicts and cost {:?}",
            best.conflicts.len(),
            best.cost
        );
        best.paths
    }
}
