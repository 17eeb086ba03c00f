use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::common::{Cell, Move};
use crate::map::Map;

/// One agent as seen by the tick resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverAgent {
    pub current: Cell,
    pub proposed: Cell,
    /// Lower keys win contested cells: `(carried deadline or usize::MAX, id)`.
    pub priority: (usize, usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub next: Vec<Cell>,
    pub moves: Vec<Move>,
    pub overrides: usize,
    pub cycles_broken: usize,
}

/// Turns proposed next cells into one collision-free simultaneous step.
///
/// A proposal that is not the current cell or one of its passable neighbors
/// is treated as a stay. Afterwards no two agents share a next cell, no directed cycle of two or
/// more agents moving into each other's cells remains, and stationary agents
/// keep their cells. Input that already satisfies this comes back unchanged.
pub fn resolve(agents: &[ResolverAgent], map: &Map) -> Resolution {
    let mut resolution = Resolution {
        next: agents
            .iter()
            .map(|agent| {
                let adjacent = Move::between(agent.current, agent.proposed).is_some();
                if adjacent && map.is_passable(agent.proposed) {
                    agent.proposed
                } else {
                    agent.current
                }
            })
            .collect(),
        ..Resolution::default()
    };

    loop {
        let forced = vertex_pass(agents, &mut resolution.next);
        let broken = cycle_pass(agents, map, &mut resolution.next);
        resolution.overrides += forced;
        resolution.cycles_broken += broken;
        if forced == 0 && broken == 0 {
            break;
        }
    }

    resolution.moves = agents
        .iter()
        .zip(&resolution.next)
        .map(|(agent, &next)| Move::between(agent.current, next).unwrap_or(Move::Stay))
        .collect();
    resolution
}

/// Settles shared next cells until none remain. Returns how many agents were stopped.
fn vertex_pass(agents: &[ResolverAgent], next: &mut [Cell]) -> usize {
    let mut forced = 0;
    loop {
        let mut claims: BTreeMap<Cell, Vec<usize>> = BTreeMap::new();
        for (index, &cell) in next.iter().enumerate() {
            claims.entry(cell).or_default().push(index);
        }

        let mut changed = false;
        for (cell, claimants) in claims {
            if claimants.len() < 2 {
                continue;
            }
            // A stayer never gives up its own cell.
            let winner = claimants
                .iter()
                .copied()
                .find(|&index| agents[index].current == cell)
                .or_else(|| {
                    claimants
                        .iter()
                        .copied()
                        .min_by_key(|&index| agents[index].priority)
                });

            for index in claimants {
                if Some(index) != winner && next[index] != agents[index].current {
                    debug!("agent {index} stopped before {cell:?}");
                    next[index] = agents[index].current;
                    forced += 1;
                    changed = true;
                }
            }
        }

        if !changed {
            return forced;
        }
    }
}

/// Breaks every rotation among moving agents. Returns the number of cycles broken.
fn cycle_pass(agents: &[ResolverAgent], map: &Map, next: &mut [Cell]) -> usize {
    let occupant: HashMap<Cell, usize> = agents
        .iter()
        .enumerate()
        .map(|(index, agent)| (agent.current, index))
        .collect();

    // Functional graph: a moving agent points at the agent whose cell it enters.
    let successor = |index: usize, next: &[Cell]| -> Option<usize> {
        if next[index] == agents[index].current {
            return None;
        }
        occupant.get(&next[index]).copied()
    };

    const UNSEEN: u8 = 0;
    const ON_STACK: u8 = 1;
    const DONE: u8 = 2;
    let mut state = vec![UNSEEN; agents.len()];
    let mut cycles = Vec::new();

    for start in 0..agents.len() {
        let mut stack = Vec::new();
        let mut current = Some(start);
        while let Some(index) = current {
            match state[index] {
                UNSEEN => {
                    state[index] = ON_STACK;
                    stack.push(index);
                    current = successor(index, next);
                }
                ON_STACK => {
                    if let Some(position) = stack.iter().position(|&member| member == index) {
                        cycles.push(stack[position..].to_vec());
                    }
                    break;
                }
                _ => break,
            }
        }
        for index in stack {
            state[index] = DONE;
        }
    }

    let occupied: HashSet<Cell> = agents.iter().map(|agent| agent.current).collect();
    let mut broken = 0;
    for cycle in cycles {
        if cycle.len() < 2 {
            continue;
        }
        let Some(&victim) = cycle.iter().max_by_key(|&&index| agents[index].priority) else {
            continue;
        };

        let original = next[victim];
        let escape = map
            .neighbors(agents[victim].current)
            .iter()
            .copied()
            .find(|&cell| cell != original && !occupied.contains(&cell) && !next.contains(&cell));

        next[victim] = escape.unwrap_or(agents[victim].current);
        debug!(
            "break cycle {cycle:?}: agent {victim} redirected from {original:?} to {:?}",
            next[victim]
        );
        broken += 1;
    }
    broken
}
