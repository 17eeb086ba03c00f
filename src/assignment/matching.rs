use std::collections::VecDeque;
use tracing::debug;

use super::{AssignmentStrategy, CostPolicy, IdleAgent};
use crate::common::{Task, TaskId};
use crate::oracle::ShortestPathOracle;

const INF: i64 = i64::MAX / 4;

#[derive(Debug, Clone)]
struct FlowEdge {
    to: usize,
    cap: i32,
    cost: i64,
}

/// Unit-capacity flow network: source -> agents -> tasks -> sink.
#[derive(Debug)]
struct FlowGraph {
    edges: Vec<FlowEdge>,
    adj: Vec<Vec<usize>>,
}

impl FlowGraph {
    fn new(nodes: usize) -> Self {
        FlowGraph {
            edges: Vec::new(),
            adj: vec![Vec::new(); nodes],
        }
    }

    /// Returns the index of the forward edge; its residual twin is `index ^ 1`.
    fn add_edge(&mut self, from: usize, to: usize, cost: i64) -> usize {
        let index = self.edges.len();
        self.edges.push(FlowEdge { to, cap: 1, cost });
        self.adj[from].push(index);
        self.edges.push(FlowEdge {
            to: from,
            cap: 0,
            cost: -cost,
        });
        self.adj[to].push(index + 1);
        index
    }

    /// Successive shortest augmenting paths. Residual edges carry negative
    /// costs, so each round uses a queue-based Bellman-Ford.
    fn min_cost_max_flow(&mut self, source: usize, sink: usize) -> (usize, i64) {
        let n = self.adj.len();
        let mut flow = 0;
        let mut total_cost = 0;

        loop {
            let mut dist = vec![INF; n];
            let mut prev_edge = vec![usize::MAX; n];
            let mut in_queue = vec![false; n];
            let mut queue = VecDeque::new();

            dist[source] = 0;
            queue.push_back(source);
            in_queue[source] = true;

            while let Some(u) = queue.pop_front() {
                in_queue[u] = false;
                for &e in &self.adj[u] {
                    let edge = &self.edges[e];
                    if edge.cap > 0 && dist[u] + edge.cost < dist[edge.to] {
                        dist[edge.to] = dist[u] + edge.cost;
                        prev_edge[edge.to] = e;
                        if !in_queue[edge.to] {
                            in_queue[edge.to] = true;
                            queue.push_back(edge.to);
                        }
                    }
                }
            }

            if dist[sink] == INF {
                break;
            }

            let mut v = sink;
            while v != source {
                let e = prev_edge[v];
                self.edges[e].cap -= 1;
                self.edges[e ^ 1].cap += 1;
                v = self.edges[e ^ 1].to;
            }
            flow += 1;
            total_cost += dist[sink];
        }

        (flow, total_cost)
    }
}

/// Maximum-cardinality minimum-cost matching of idle agents to pending tasks.
///
/// Edge weight is `alpha * dist(agent, pickup) + beta * dist(pickup, dropoff)`.
/// Pairs that cannot finish before the deadline (`tick + weight > deadline`)
/// are left out of the network. Agents the matching leaves alone afterwards
/// take the cheapest remaining reachable task regardless of deadline.
pub struct OptimalMatching {
    policy: CostPolicy,
}

impl OptimalMatching {
    pub fn new(alpha: usize, beta: usize) -> Self {
        OptimalMatching {
            policy: CostPolicy::Weighted { alpha, beta },
        }
    }
}

impl AssignmentStrategy for OptimalMatching {
    fn assign(
        &self,
        idle: &[IdleAgent],
        pending: &[&Task],
        tick: usize,
        oracle: &ShortestPathOracle,
    ) -> Vec<(usize, TaskId)> {
        if idle.is_empty() || pending.is_empty() {
            return Vec::new();
        }

        let mut agents: Vec<IdleAgent> = idle.to_vec();
        agents.sort_by_key(|agent| agent.id);

        // Full reachable cost matrix, shared by the matching and the fallback.
        let costs: Vec<Vec<Option<usize>>> = agents
            .iter()
            .map(|agent| {
                pending
                    .iter()
                    .map(|task| self.policy.cost(oracle, agent.position, task))
                    .collect()
            })
            .collect();

        let num_agents = agents.len();
        let num_tasks = pending.len();
        let source = 0;
        let sink = num_agents + num_tasks + 1;
        let mut graph = FlowGraph::new(num_agents + num_tasks + 2);

        for a in 0..num_agents {
            graph.add_edge(source, 1 + a, 0);
        }
        let mut pair_edges = Vec::new();
        for (a, row) in costs.iter().enumerate() {
            for (t, cost) in row.iter().enumerate() {
                let Some(cost) = *cost else { continue };
                if tick + cost > pending[t].deadline {
                    continue;
                }
                let e = graph.add_edge(1 + a, 1 + num_agents + t, cost as i64);
                pair_edges.push((e, a, t));
            }
        }
        for t in 0..num_tasks {
            graph.add_edge(1 + num_agents + t, sink, 0);
        }

        let (flow, total_cost) = graph.min_cost_max_flow(source, sink);
        debug!("matching: {flow} feasible pairs with total cost {total_cost}");

        let mut agent_used = vec![false; num_agents];
        let mut task_used = vec![false; num_tasks];
        let mut pairs = Vec::new();
        for (e, a, t) in pair_edges {
            if graph.edges[e].cap == 0 {
                agent_used[a] = true;
                task_used[t] = true;
                pairs.push((agents[a].id, pending[t].id));
            }
        }

        for a in 0..num_agents {
            if agent_used[a] {
                continue;
            }
            let fallback = (0..num_tasks)
                .filter(|&t| !task_used[t])
                .filter_map(|t| {
                    costs[a][t].map(|cost| (t, (cost, pending[t].deadline, pending[t].id)))
                })
                .min_by_key(|&(_, key)| key);

            if let Some((t, (cost, _, _))) = fallback {
                debug!(
                    "matching fallback: agent {} -> task {} (cost {cost}, deadline ignored)",
                    agents[a].id, pending[t].id
                );
                agent_used[a] = true;
                task_used[t] = true;
                pairs.push((agents[a].id, pending[t].id));
            }
        }

        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Map;

    fn sorted(mut pairs: Vec<(usize, TaskId)>) -> Vec<(usize, TaskId)> {
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn test_matching_minimizes_total_cost() {
        let map = Map::open(1, 6).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let idle = [
            IdleAgent { id: 0, position: (0, 2) },
            IdleAgent { id: 1, position: (0, 5) },
        ];
        let near = Task::new(1, (0, 3), (0, 4), 0, 100);
        let far = Task::new(2, (0, 0), (0, 1), 0, 100);

        // Greedy would hand task 1 to agent 0 and leave agent 1 a five-step trip.
        let matching = OptimalMatching::new(1, 1);
        assert_eq!(
            sorted(matching.assign(&idle, &[&near, &far], 0, &oracle)),
            vec![(0, 2), (1, 1)]
        );
    }

    #[test]
    fn test_matching_prefers_deadline_feasible_pairs() {
        let map = Map::open(1, 8).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let idle = [
            IdleAgent { id: 0, position: (0, 0) },
            IdleAgent { id: 1, position: (0, 7) },
        ];
        // Only agent 1 reaches task 1 in time; agent 0 takes the relaxed task.
        let tight = Task::new(1, (0, 6), (0, 5), 0, 3);
        let relaxed = Task::new(2, (0, 4), (0, 3), 0, 100);

        let matching = OptimalMatching::new(1, 1);
        assert_eq!(
            sorted(matching.assign(&idle, &[&tight, &relaxed], 0, &oracle)),
            vec![(0, 2), (1, 1)]
        );
    }

    #[test]
    fn test_infeasible_agent_falls_back_to_nearest() {
        let map = Map::open(1, 8).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let idle = [IdleAgent { id: 3, position: (0, 0) }];
        let late = Task::new(5, (0, 6), (0, 7), 2, 4);

        let matching = OptimalMatching::new(1, 1);
        assert_eq!(matching.assign(&idle, &[&late], 2, &oracle), vec![(3, 5)]);
    }

    #[test]
    fn test_more_agents_than_tasks() {
        let map = Map::open(3, 3).unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let idle = [
            IdleAgent { id: 0, position: (0, 0) },
            IdleAgent { id: 1, position: (2, 2) },
            IdleAgent { id: 2, position: (1, 1) },
        ];
        let task = Task::new(1, (2, 1), (0, 1), 0, 50);

        let matching = OptimalMatching::new(1, 1);
        let pairs = matching.assign(&idle, &[&task], 0, &oracle);
        assert_eq!(pairs.len(), 1);
        // Agents 1 and 2 are both one step away; either is optimal.
        assert!(pairs[0] == (1, 1) || pairs[0] == (2, 1));
    }
}
