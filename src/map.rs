use anyhow::{anyhow, bail, Context};
use std::fs;

use crate::common::{Cell, Move};

#[derive(Debug, Clone)]
pub struct Tile {
    passable: bool,
    pub neighbors: Vec<Cell>, // Accessible neighbors in Up, Left, Right, Down order
}

impl Tile {
    pub fn is_passable(&self) -> bool {
        self.passable
    }
}

/// Static obstacle grid, fixed for the whole episode.
#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    grid: Vec<Vec<Tile>>,
}

impl Map {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("cannot read map file {path}"))?;
        Self::parse(&content).with_context(|| format!("malformed map file {path}"))
    }

    /// Accepts either rows of whitespace separated `0` (free) / `1` (blocked),
    /// or a MovingAI `.map` file where `.` is free.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());
        let first = lines.clone().next().ok_or_else(|| anyhow!("empty map"))?;

        let rows: Vec<Vec<bool>> = if first.trim_start().starts_with("type") {
            let _type = lines.next();
            let height = header_value(lines.next(), "height")?;
            let width = header_value(lines.next(), "width")?;
            let _map = lines.next();
            let rows: Vec<Vec<bool>> = lines
                .take(height)
                .map(|line| line.chars().take(width).map(|ch| ch == '.').collect())
                .collect();
            if rows.len() != height {
                bail!("expected {height} rows, found {}", rows.len());
            }
            rows
        } else {
            lines
                .map(|line| {
                    line.split_whitespace()
                        .map(|token| match token {
                            "0" => Ok(true),
                            "1" => Ok(false),
                            other => Err(anyhow!("unexpected map token {other:?}")),
                        })
                        .collect::<anyhow::Result<Vec<bool>>>()
                })
                .collect::<anyhow::Result<_>>()?
        };

        Self::from_rows(rows)
    }

    /// Builds a map from rows of passability flags.
    pub fn from_rows(rows: Vec<Vec<bool>>) -> anyhow::Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, |row| row.len());
        if height == 0 || width == 0 {
            bail!("map must have at least one row and one column");
        }
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            bail!("row {index} has width {}, expected {width}", row.len());
        }

        let grid = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|passable| Tile {
                        passable,
                        neighbors: Vec::new(),
                    })
                    .collect()
            })
            .collect();

        let mut map = Map {
            height,
            width,
            grid,
        };
        map.initialize_neighbors();
        Ok(map)
    }

    /// Open grid without obstacles.
    pub fn open(height: usize, width: usize) -> anyhow::Result<Self> {
        Self::from_rows(vec![vec![true; width]; height])
    }

    fn initialize_neighbors(&mut self) {
        for x in 0..self.height {
            for y in 0..self.width {
                if self.grid[x][y].passable {
                    self.grid[x][y].neighbors = self.get_neighbors(x, y, false);
                }
            }
        }
    }

    /// Passable cells around `(x, y)`, optionally including `(x, y)` itself for waiting.
    pub fn get_neighbors(&self, x: usize, y: usize, include_wait: bool) -> Vec<Cell> {
        let mut neighbors: Vec<Cell> = Move::PRIORITY
            .iter()
            .filter_map(|m| m.apply((x, y)))
            .filter(|&cell| self.is_passable(cell))
            .collect();

        if include_wait && self.is_passable((x, y)) {
            neighbors.push((x, y));
        }

        neighbors
    }

    /// Precomputed four-connected neighbors of a free cell.
    pub fn neighbors(&self, cell: Cell) -> &[Cell] {
        if self.in_bounds(cell) {
            &self.grid[cell.0][cell.1].neighbors
        } else {
            &[]
        }
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.0 < self.height && cell.1 < self.width
    }

    /// False for blocked and out-of-bounds cells.
    pub fn is_passable(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && self.grid[cell.0][cell.1].is_passable()
    }

    pub fn free_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.height)
            .flat_map(move |x| (0..self.width).map(move |y| (x, y)))
            .filter(move |&cell| self.is_passable(cell))
    }

    pub fn index_of(&self, cell: Cell) -> usize {
        cell.0 * self.width + cell.1
    }
}

fn header_value(line: Option<&str>, key: &str) -> anyhow::Result<usize> {
    let line = line.ok_or_else(|| anyhow!("missing {key} header"))?;
    let mut parts = line.split_whitespace();
    if parts.next() != Some(key) {
        bail!("expected {key} header, found {line:?}");
    }
    parts
        .next()
        .ok_or_else(|| anyhow!("missing {key} value"))?
        .parse::<usize>()
        .with_context(|| format!("invalid {key} value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_map() {
        let map = Map::from_file("map_file/test/test.map").unwrap();

        assert_eq!(map.height, 5);
        assert_eq!(map.width, 5);

        assert!(map.is_passable((0, 0)));
        assert!(!map.is_passable((1, 1)));
        assert!(!map.is_passable((5, 0)));

        let neighbors = map.get_neighbors(0, 1, false);
        assert_eq!(neighbors, vec![(0, 0), (0, 2)]);
        assert_eq!(map.get_neighbors(0, 1, true).last(), Some(&(0, 1)));
    }

    #[test]
    fn test_parse_binary_rows() {
        let map = Map::parse("0 0 1\n0 1 0\n0 0 0\n").unwrap();
        assert_eq!((map.height, map.width), (3, 3));
        assert!(!map.is_passable((0, 2)));
        assert_eq!(map.neighbors((1, 0)), &[(0, 0), (2, 0)]);
        assert_eq!(map.free_cells().count(), 7);
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        assert!(Map::parse("0 0 0\n0 0\n").is_err());
        assert!(Map::parse("0 2 0\n").is_err());
        assert!(Map::parse("").is_err());
    }

    #[test]
    fn test_parse_moving_ai_format() {
        let map = Map::parse("type octile\nheight 2\nwidth 3\nmap\n..@\n@..\n").unwrap();
        assert_eq!((map.height, map.width), (2, 3));
        assert!(map.is_passable((0, 1)));
        assert!(!map.is_passable((0, 2)));
        assert!(!map.is_passable((1, 0)));
    }
}
