use super::{Cell, Path};
use crate::algorithm::a_star_search;
use crate::map::Map;
use crate::solver::{pinned_constraints, PlanRequest};
use crate::stat::Stats;

use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictType {
    Vertex {
        position: Cell,
        time_step: usize,
    },
    /// `agent_1` moves `u -> v` while `agent_2` moves `v -> u`, arriving at `time_step`.
    Edge { u: Cell, v: Cell, time_step: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Conflict {
    pub agent_1: usize,
    pub agent_2: usize,
    pub conflict_type: ConflictType,
}

impl Conflict {
    pub fn time_step(&self) -> usize {
        match self.conflict_type {
            ConflictType::Vertex { time_step, .. } | ConflictType::Edge { time_step, .. } => {
                time_step
            }
        }
    }
}

/// Space-time restriction on one agent's replanning. Which agent it binds is
/// given by the per-agent set it lives in.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub enum Constraint {
    Vertex {
        position: Cell,
        time_step: usize,
        is_permanent: bool,
    },
    Edge {
        from: Cell,
        to: Cell,
        time_step: usize,
    },
}

impl Constraint {
    pub fn vertex(position: Cell, time_step: usize) -> Self {
        Constraint::Vertex {
            position,
            time_step,
            is_permanent: false,
        }
    }

    pub fn edge(from: Cell, to: Cell, time_step: usize) -> Self {
        Constraint::Edge {
            from,
            to,
            time_step,
        }
    }

    pub fn time_step(&self) -> usize {
        match self {
            Constraint::Vertex { time_step, .. } | Constraint::Edge { time_step, .. } => *time_step,
        }
    }

    /// Whether moving `current -> next`, arriving at `time`, breaks this constraint.
    pub fn is_violated(&self, current: Cell, next: Cell, time: usize) -> bool {
        match *self {
            Constraint::Vertex {
                position,
                time_step,
                is_permanent,
            } => {
                if next != position {
                    return false;
                }
                if is_permanent {
                    time >= time_step
                } else {
                    time == time_step
                }
            }
            Constraint::Edge {
                from,
                to,
                time_step,
            } => current == from && next == to && time == time_step,
        }
    }
}

fn satisfies(path: &Path, constraints: &HashSet<Constraint>) -> bool {
    path.windows(2).enumerate().all(|(t, step)| {
        constraints
            .iter()
            .all(|constraint| !constraint.is_violated(step[0], step[1], t + 1))
    })
}

fn position_at(path: &Path, time_step: usize) -> Cell {
    path[time_step.min(path.len() - 1)]
}

/// Every vertex and edge conflict between the given paths, earliest first.
/// Agents that reached the end of their path are treated as holding its last cell.
pub fn detect_conflicts(paths: &[Path]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    // Compare paths of each pair of agents to find conflicts
    for i in 0..paths.len() {
        for j in (i + 1)..paths.len() {
            let path1 = &paths[i];
            let path2 = &paths[j];
            if path1.is_empty() || path2.is_empty() {
                continue;
            }
            let max_length = path1.len().max(path2.len());

            // Start from 1: agents never share a start cell, and edge
            // conflicts need a previous step.
            for step in 1..max_length {
                let pos1 = position_at(path1, step);
                let pos2 = position_at(path2, step);

                if pos1 == pos2 {
                    conflicts.push(Conflict {
                        agent_1: i,
                        agent_2: j,
                        conflict_type: ConflictType::Vertex {
                            position: pos1,
                            time_step: step,
                        },
                    });
                    continue;
                }

                let prev_pos1 = position_at(path1, step - 1);
                let prev_pos2 = position_at(path2, step - 1);
                if prev_pos1 == pos2 && prev_pos2 == pos1 {
                    conflicts.push(Conflict {
                        agent_1: i,
                        agent_2: j,
                        conflict_type: ConflictType::Edge {
                            u: prev_pos1,
                            v: pos1,
                            time_step: step,
                        },
                    });
                }
            }
        }
    }

    conflicts.sort_by_key(|c| (c.time_step(), c.agent_1, c.agent_2));
    conflicts
}

/// The earliest conflict, lowest agent pair first on ties.
pub fn first_conflict(paths: &[Path]) -> Option<Conflict> {
    detect_conflicts(paths).into_iter().next()
}

#[derive(Clone, Debug)]
pub(crate) struct PlanNode {
    pub(crate) node_id: usize,
    pub(crate) constraints: Vec<HashSet<Constraint>>,
    pub(crate) conflicts: Vec<Conflict>,
    pub(crate) paths: Vec<Path>,
    pub(crate) cost: usize, // Sum of path lengths under current constraints
}

impl PartialEq for PlanNode {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}

impl Eq for PlanNode {}

impl Ord for PlanNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.conflicts.len().cmp(&other.conflicts.len()))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for PlanNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PlanNode {
    /// Root node: every agent planned alone around the pinned agents, which
    /// hold their cells. Agents that cannot be planned stay put.
    pub(crate) fn new(
        requests: &[PlanRequest],
        map: &Map,
        max_low_level_expansions: usize,
        stats: &mut Stats,
    ) -> Self {
        let pinned = pinned_constraints(requests);
        let constraints: Vec<HashSet<Constraint>> = requests
            .iter()
            .map(|request| {
                if request.pinned {
                    HashSet::new()
                } else {
                    pinned.clone()
                }
            })
            .collect();
        let mut paths = Vec::with_capacity(requests.len());
        let mut total_cost = 0;

        for (request, agent_constraints) in requests.iter().zip(&constraints) {
            if request.pinned {
                total_cost += 1;
                paths.push(vec![request.start]);
                continue;
            }
            let seed = request
                .valid_seed()
                .filter(|seed| satisfies(seed, agent_constraints));
            let path = match seed {
                Some(seed) => seed.clone(),
                None => match a_star_search(
                    map,
                    request.agent,
                    request.start,
                    request.goal,
                    agent_constraints,
                    max_low_level_expansions,
                    stats,
                ) {
                    Ok(path) => path,
                    Err(err) => {
                        debug!("{err}, agent stays");
                        stats.plan_failures += 1;
                        vec![request.start]
                    }
                },
            };

            total_cost += path.len();
            paths.push(path);
        }

        let mut root = PlanNode {
            node_id: 0,
            constraints,
            conflicts: Vec::new(),
            paths,
            cost: total_cost,
        };
        root.detect_conflicts();
        debug!(
            "High level root node cost {:?}, conflicts {:?}",
            root.cost,
            root.conflicts.len()
        );
        root
    }

    pub(crate) fn detect_conflicts(&mut self) {
        self.conflicts = detect_conflicts(&self.paths);
    }

    /// Child that forbids one side of `conflict`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update_constraint(
        &self,
        conflict: &Conflict,
        resolve_first: bool,
        requests: &[PlanRequest],
        map: &Map,
        max_low_level_expansions: usize,
        node_id: usize,
        stats: &mut Stats,
    ) -> Option<PlanNode> {
        let agent_to_update = if resolve_first {
            conflict.agent_1
        } else {
            conflict.agent_2
        };

        let constraint = match conflict.conflict_type {
            ConflictType::Vertex {
                position,
                time_step,
            } => Constraint::vertex(position, time_step),
            ConflictType::Edge { u, v, time_step } => {
                if resolve_first {
                    Constraint::edge(u, v, time_step)
                } else {
                    Constraint::edge(v, u, time_step)
                }
            }
        };

        self.with_constraint(
            agent_to_update,
            constraint,
            requests,
            map,
            max_low_level_expansions,
            node_id,
            stats,
        )
    }

    /// Child with one extra constraint on `agent`, replanning only that agent.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn with_constraint(
        &self,
        agent: usize,
        constraint: Constraint,
        requests: &[PlanRequest],
        map: &Map,
        max_low_level_expansions: usize,
        node_id: usize,
        stats: &mut Stats,
    ) -> Option<PlanNode> {
        if requests[agent].pinned {
            return None;
        }
        let mut new_constraints = self.constraints.clone();
        if !new_constraints[agent].insert(constraint) {
            return None;
        }

        let request = &requests[agent];
        let new_path = match a_star_search(
            map,
            request.agent,
            request.start,
            request.goal,
            &new_constraints[agent],
            max_low_level_expansions,
            stats,
        ) {
            Ok(path) => path,
            Err(err) => {
                debug!("{err}, drop child");
                stats.plan_failures += 1;
                return None;
            }
        };

        debug!("Update agent {:?} with path {new_path:?}", request.agent);

        let mut new_paths = self.paths.clone();
        let new_cost = self.cost - new_paths[agent].len() + new_path.len();
        new_paths[agent] = new_path;

        let mut new_node = PlanNode {
            node_id,
            constraints: new_constraints,
            conflicts: Vec::new(),
            paths: new_paths,
            cost: new_cost,
        };
        new_node.detect_conflicts();
        Some(new_node)
    }
}
