use serde::Serialize;
use tracing::info;

/// Counters accumulated over one episode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub ticks: usize,
    pub time_us: usize,
    pub high_level_expand_nodes: usize,
    pub low_level_expand_nodes: usize,
    pub plan_failures: usize,
    pub coordinator_exhausted: usize,
    pub perturbations: usize,
    pub resolver_overrides: usize,
    pub cycles_broken: usize,
    pub assignments: usize,
    pub released_assignments: usize,
    pub stuck_escapes: usize,
    pub pickups: usize,
    pub deliveries: usize,
    pub expired: usize,
}

impl Stats {
    pub fn print(&self) {
        info!(
            "Ticks {:?} Time(microseconds) {:?} High level expand nodes number: {:?} Low level expand nodes number {:?}",
            self.ticks, self.time_us, self.high_level_expand_nodes, self.low_level_expand_nodes
        );
        info!(
            "Assignments {:?} Pickups {:?} Deliveries {:?} Expired {:?} Plan failures {:?} Resolver overrides {:?} Cycles broken {:?}",
            self.assignments,
            self.pickups,
            self.deliveries,
            self.expired,
            self.plan_failures,
            self.resolver_overrides,
            self.cycles_broken
        );
    }
}
