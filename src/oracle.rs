use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::common::{Cell, Move, Path};
use crate::map::Map;

const UNREACHABLE: u32 = u32::MAX;

/// All-pairs shortest paths over the free cells of a static map.
///
/// Built once per episode with one breadth-first search per free cell. Each
/// search expands neighbors in `Move::PRIORITY` order and keeps the first
/// predecessor it discovers, so the route between two cells is fixed for a
/// given map. Tables are flat `free × free` arrays indexed by dense free-cell
/// ids; after construction the oracle is immutable and can be shared across
/// threads.
#[derive(Debug, Clone)]
pub struct ShortestPathOracle {
    width: usize,
    free_index: Vec<u32>,
    cells: Vec<Cell>,
    dist: Vec<u32>,
    parent: Vec<u32>,
}

impl ShortestPathOracle {
    #[instrument(skip_all, name = "oracle_precompute", fields(height = map.height, width = map.width), level = "debug")]
    pub fn new(map: &Map) -> Self {
        let start_time = Instant::now();

        let cells: Vec<Cell> = map.free_cells().collect();
        let mut free_index = vec![UNREACHABLE; map.height * map.width];
        for (id, &cell) in cells.iter().enumerate() {
            free_index[map.index_of(cell)] = id as u32;
        }

        let n = cells.len();
        let mut dist = vec![UNREACHABLE; n * n];
        let mut parent = vec![UNREACHABLE; n * n];
        let mut queue = VecDeque::with_capacity(n);

        for source in 0..n {
            let row = source * n;
            dist[row + source] = 0;
            queue.clear();
            queue.push_back(source);

            while let Some(current) = queue.pop_front() {
                let next_dist = dist[row + current] + 1;
                for &neighbor in map.neighbors(cells[current]) {
                    let next = free_index[map.index_of(neighbor)] as usize;
                    if dist[row + next] == UNREACHABLE {
                        dist[row + next] = next_dist;
                        parent[row + next] = current as u32;
                        queue.push_back(next);
                    }
                }
            }
        }

        debug!(
            "precomputed {n} sources in {:?} microseconds",
            start_time.elapsed().as_micros()
        );

        ShortestPathOracle {
            width: map.width,
            free_index,
            cells,
            dist,
            parent,
        }
    }

    fn id(&self, cell: Cell) -> Option<usize> {
        if cell.1 >= self.width {
            return None;
        }
        match self.free_index.get(cell.0 * self.width + cell.1) {
            Some(&id) if id != UNREACHABLE => Some(id as usize),
            _ => None,
        }
    }

    /// Number of steps from `a` to `b`, `None` when unreachable or blocked.
    pub fn distance(&self, a: Cell, b: Cell) -> Option<usize> {
        let (a, b) = (self.id(a)?, self.id(b)?);
        match self.dist[a * self.cells.len() + b] {
            UNREACHABLE => None,
            d => Some(d as usize),
        }
    }

    pub fn same_component(&self, a: Cell, b: Cell) -> bool {
        self.distance(a, b).is_some()
    }

    /// Shortest path including both endpoints; empty when unreachable.
    pub fn path(&self, a: Cell, b: Cell) -> Path {
        let (Some(source), Some(target)) = (self.id(a), self.id(b)) else {
            return Vec::new();
        };
        let row = source * self.cells.len();
        if self.dist[row + target] == UNREACHABLE {
            return Vec::new();
        }

        let mut path = vec![self.cells[target]];
        let mut current = target;
        while current != source {
            current = self.parent[row + current] as usize;
            path.push(self.cells[current]);
        }
        path.reverse();
        path
    }

    /// Route from `a` to `b` spelled as move characters, e.g. `"RRD"`.
    pub fn directions(&self, a: Cell, b: Cell) -> Option<String> {
        let path = self.path(a, b);
        if path.is_empty() {
            return None;
        }
        Some(
            path.windows(2)
                .filter_map(|step| Move::between(step[0], step[1]))
                .map(Move::as_char)
                .collect(),
        )
    }

    /// First move along the shortest route, `Stay` when already there.
    pub fn first_move(&self, a: Cell, b: Cell) -> Option<Move> {
        let path = self.path(a, b);
        match path.len() {
            0 => None,
            1 => Some(Move::Stay),
            _ => Move::between(path[0], path[1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bfs_distance(map: &Map, a: Cell, b: Cell) -> Option<usize> {
        let mut seen = vec![false; map.height * map.width];
        let mut queue = VecDeque::from([(a, 0)]);
        seen[map.index_of(a)] = true;
        while let Some((cell, d)) = queue.pop_front() {
            if cell == b {
                return Some(d);
            }
            for &next in map.neighbors(cell) {
                if !seen[map.index_of(next)] {
                    seen[map.index_of(next)] = true;
                    queue.push_back((next, d + 1));
                }
            }
        }
        None
    }

    #[test]
    fn test_path_lengths_match_bfs() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let oracle = ShortestPathOracle::new(&map);
        let free: Vec<Cell> = map.free_cells().collect();

        for &a in &free {
            for &b in &free {
                let path = oracle.path(a, b);
                let expected = bfs_distance(&map, a, b).unwrap();
                assert_eq!(path.len(), expected + 1, "{a:?} -> {b:?}");
                assert_eq!(path.first(), Some(&a));
                assert_eq!(path.last(), Some(&b));
                assert!(path.windows(2).all(|s| map.neighbors(s[0]).contains(&s[1])));
            }
        }
        assert_eq!(oracle.path((2, 2), (2, 2)), vec![(2, 2)]);
    }

    #[test]
    fn test_disconnected_and_blocked_cells() {
        let map = Map::parse("0 1 0\n0 1 0\n0 1 0\n").unwrap();
        let oracle = ShortestPathOracle::new(&map);

        assert!(oracle.path((0, 0), (0, 2)).is_empty());
        assert_eq!(oracle.distance((0, 0), (0, 2)), None);
        assert!(!oracle.same_component((2, 0), (2, 2)));
        assert!(oracle.path((0, 0), (0, 1)).is_empty());
        assert!(oracle.path((0, 0), (9, 9)).is_empty());
        assert_eq!(oracle.distance((0, 0), (2, 0)), Some(2));
    }

    #[test]
    fn test_direction_priority_is_deterministic() {
        let map = Map::open(3, 3).unwrap();
        let oracle = ShortestPathOracle::new(&map);

        // From (0, 0) the BFS reaches (0, 1) through Right before (1, 0) through Down,
        // so the route to the opposite corner goes along the top row first.
        assert_eq!(oracle.directions((0, 0), (2, 2)).as_deref(), Some("RRDD"));
        assert_eq!(oracle.directions((2, 2), (0, 0)).as_deref(), Some("UULL"));
        assert_eq!(oracle.first_move((1, 1), (1, 1)), Some(Move::Stay));
        assert_eq!(oracle.directions((1, 1), (1, 1)).as_deref(), Some(""));
    }
}
