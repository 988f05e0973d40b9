use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub costs: usize,
    pub time_ms: usize,
    pub loop_count: usize,
    pub high_level_generated_nodes: usize,
    pub low_level_expand_nodes: usize,
    pub pibt_calls: usize,
    pub sub_instances: usize,
    pub optimal: bool,
}

impl Stats {
    /// Adds the search counters of a partial run.
    pub fn absorb(&mut self, other: &Stats) {
        self.loop_count += other.loop_count;
        self.high_level_generated_nodes += other.high_level_generated_nodes;
        self.low_level_expand_nodes += other.low_level_expand_nodes;
        self.pibt_calls += other.pibt_calls;
    }

    pub fn print(&self) {
        info!(
            "Cost {:?} Time(ms) {:?} Loops {:?} High level generated nodes number: {:?} Low level expand nodes number {:?} PIBT calls {:?} Sub-instances {:?} Optimal {:?}",
            self.costs,
            self.time_ms,
            self.loop_count,
            self.high_level_generated_nodes,
            self.low_level_expand_nodes,
            self.pibt_calls,
            self.sub_instances,
            self.optimal
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_sums_counters_only() {
        let mut total = Stats {
            costs: 4,
            loop_count: 2,
            ..Stats::default()
        };
        let part = Stats {
            costs: 9,
            loop_count: 3,
            high_level_generated_nodes: 5,
            pibt_calls: 1,
            optimal: true,
            ..Stats::default()
        };
        total.absorb(&part);
        total.absorb(&part);
        assert_eq!(total.loop_count, 8);
        assert_eq!(total.high_level_generated_nodes, 10);
        assert_eq!(total.pibt_calls, 2);
        assert_eq!(total.costs, 4);
        assert!(!total.optimal);
    }
}
