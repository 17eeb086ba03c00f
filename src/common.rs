mod highlevel;
mod lowlevel;

pub(crate) use highlevel::PlanNode;
pub use highlevel::{detect_conflicts, first_conflict, Conflict, ConflictType, Constraint};
pub(crate) use lowlevel::LowLevelOpenNode;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid coordinate as (row, column), 0-based.
pub type Cell = (usize, usize);

pub type TaskId = usize;

/// Ordered sequence of cells, `path[0]` is the start. A single cell means "stay".
pub type Path = Vec<Cell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Move {
    Stay,
    Up,
    Down,
    Left,
    Right,
}

impl Move {
    /// Tie-break order used by every search over the grid.
    pub const PRIORITY: [Move; 4] = [Move::Up, Move::Left, Move::Right, Move::Down];

    pub fn delta(self) -> (isize, isize) {
        match self {
            Move::Stay => (0, 0),
            Move::Up => (-1, 0),
            Move::Down => (1, 0),
            Move::Left => (0, -1),
            Move::Right => (0, 1),
        }
    }

    /// Cell reached from `cell`, or `None` if it underflows. Upper bounds are the map's job.
    pub fn apply(self, cell: Cell) -> Option<Cell> {
        let (dx, dy) = self.delta();
        Some((
            cell.0.checked_add_signed(dx)?,
            cell.1.checked_add_signed(dy)?,
        ))
    }

    /// Move that takes `from` to the adjacent (or identical) cell `to`.
    pub fn between(from: Cell, to: Cell) -> Option<Move> {
        [Move::Stay, Move::Up, Move::Down, Move::Left, Move::Right]
            .into_iter()
            .find(|m| m.apply(from) == Some(to))
    }

    pub fn as_char(self) -> char {
        match self {
            Move::Stay => 'S',
            Move::Up => 'U',
            Move::Down => 'D',
            Move::Left => 'L',
            Move::Right => 'R',
        }
    }

    pub fn from_char(ch: char) -> Option<Move> {
        match ch {
            'S' => Some(Move::Stay),
            'U' => Some(Move::Up),
            'D' => Some(Move::Down),
            'L' => Some(Move::Left),
            'R' => Some(Move::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PackageAction {
    #[default]
    None,
    Pickup,
    Drop,
}

impl PackageAction {
    pub fn as_char(self) -> char {
        match self {
            PackageAction::None => '0',
            PackageAction::Pickup => '1',
            PackageAction::Drop => '2',
        }
    }
}

/// One tick of commands for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub movement: Move,
    pub package: PackageAction,
}

impl Action {
    pub fn stay() -> Self {
        Action {
            movement: Move::Stay,
            package: PackageAction::None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.movement.as_char(), self.package.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    InTransit,
    Delivered,
    Expired,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Delivered | TaskStatus::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub pickup: Cell,
    pub dropoff: Cell,
    pub release_time: usize,
    pub deadline: usize,
    #[serde(skip, default = "pending")]
    pub status: TaskStatus,
}

fn pending() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    pub fn new(
        id: TaskId,
        pickup: Cell,
        dropoff: Cell,
        release_time: usize,
        deadline: usize,
    ) -> Self {
        Task {
            id,
            pickup,
            dropoff,
            release_time,
            deadline,
            status: TaskStatus::Pending,
        }
    }
}

/// Read-only view of one agent as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub position: Cell,
    pub carrying: Option<TaskId>,
}

/// Everything the engine consumes from the simulator at the start of a tick.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tick: usize,
    pub agents: Vec<AgentState>,
    pub new_tasks: Vec<Task>,
}

pub fn manhattan(a: Cell, b: Cell) -> usize {
    a.0.abs_diff(b.0) + a.1.abs_diff(b.1)
}
