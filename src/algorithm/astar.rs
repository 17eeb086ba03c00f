use super::{construct_path, Trace};
use crate::common::{manhattan, Cell, Constraint, LowLevelOpenNode, Path};
use crate::error::PlanError;
use crate::map::Map;
use crate::stat::Stats;

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, instrument, trace};

/// Time-expanded A* for one agent under `constraints`.
///
/// Moves and waits cost one step. Until the latest constraint time the search
/// runs over `(cell, time)`; past it time stops advancing and the search
/// degenerates to plain 2-D A*, so it always terminates. The goal is only
/// accepted once no vertex constraint can evict the agent from it later.
#[instrument(skip_all, name="a_star", fields(agent = agent, start = format!("{:?}", start), goal = format!("{:?}", goal)), level = "debug")]
pub(crate) fn a_star_search(
    map: &Map,
    agent: usize,
    start: Cell,
    goal: Cell,
    constraints: &HashSet<Constraint>,
    max_expansions: usize,
    stats: &mut Stats,
) -> Result<Path, PlanError> {
    let not_found = |expanded| PlanError::PlanNotFound {
        agent,
        start,
        goal,
        expanded,
    };

    if !map.is_passable(start) || !map.is_passable(goal) {
        return Err(not_found(0));
    }

    let constraint_limit_time_step = constraints
        .iter()
        .map(Constraint::time_step)
        .max()
        .unwrap_or(0);

    // The goal may be entered earlier, but the path must end after its last vertex constraint.
    let mut goal_hold_time = None;
    for constraint in constraints {
        if let Constraint::Vertex {
            position,
            time_step,
            is_permanent,
        } = *constraint
        {
            if position != goal {
                continue;
            }
            if is_permanent {
                debug!("goal {goal:?} is permanently reserved from {time_step}");
                return Err(not_found(0));
            }
            goal_hold_time = goal_hold_time.max(Some(time_step));
        }
    }
    debug!("constraints: {constraints:?}, limit time step: {constraint_limit_time_step:?}");

    let mut open_list = BTreeSet::new();
    let mut closed_list = HashSet::new();
    let mut trace = Trace::new();
    let mut expanded = 0;

    open_list.insert(LowLevelOpenNode {
        position: start,
        f_open_cost: manhattan(start, goal),
        g_cost: 0,
        time_step: 0,
    });

    while let Some(current) = open_list.pop_first() {
        if !closed_list.insert((current.position, current.time_step)) {
            continue;
        }
        trace!("expand node: {current:?}");

        expanded += 1;
        stats.low_level_expand_nodes += 1;
        if expanded > max_expansions {
            debug!("expansion budget {max_expansions} exhausted");
            return Err(not_found(expanded));
        }

        if current.position == goal && goal_hold_time.map_or(true, |t| current.g_cost > t) {
            return Ok(construct_path(&trace, (current.position, current.g_cost)));
        }

        let exceed_constraints_limit_time_step = current.time_step > constraint_limit_time_step;

        // Uniform cost, so g is also the real arrival time.
        let tentative_g_cost = current.g_cost + 1;

        // Past the limit the time step stays frozen, waiting is pointless and
        // revisiting a cell is pruned by the closed list.
        let tentative_time_step = if exceed_constraints_limit_time_step {
            current.time_step
        } else {
            current.time_step + 1
        };

        for neighbor in map.get_neighbors(
            current.position.0,
            current.position.1,
            !exceed_constraints_limit_time_step,
        ) {
            if closed_list.contains(&(neighbor, tentative_time_step)) {
                continue;
            }

            if constraints.iter().any(|constraint| {
                constraint.is_violated(current.position, neighbor, tentative_g_cost)
            }) {
                continue;
            }

            if open_list.insert(LowLevelOpenNode {
                position: neighbor,
                f_open_cost: tentative_g_cost + manhattan(neighbor, goal),
                g_cost: tentative_g_cost,
                time_step: tentative_time_step,
            }) {
                trace.insert(
                    (neighbor, tentative_g_cost),
                    (current.position, current.g_cost),
                );
            }
        }
        trace!("open list {open_list:?}");
    }

    debug!("cannot find solution");
    Err(not_found(expanded))
}
