use std::cmp::Ordering;

use super::Cell;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LowLevelOpenNode {
    pub(crate) position: Cell,
    pub(crate) f_open_cost: usize,
    pub(crate) g_cost: usize,
    pub(crate) time_step: usize, // before reaching the constraint limit, time_step equals g_cost
}

impl Ord for LowLevelOpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_open_cost
            .cmp(&other.f_open_cost)
            // Higher g cost has higher priority
            .then_with(|| other.g_cost.cmp(&self.g_cost))
            .then_with(|| self.position.cmp(&other.position))
            .then_with(|| self.time_step.cmp(&other.time_step))
    }
}

impl PartialOrd for LowLevelOpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
