use thiserror::Error;

use crate::common::{Cell, TaskId, TaskStatus};

/// Errors raised by the task registry when the package lifecycle is violated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} is not registered")]
    UnknownTask(TaskId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("cannot bind agent {agent} to task {task}: agent already holds task {existing}")]
    AgentAlreadyAssigned {
        agent: usize,
        task: TaskId,
        existing: TaskId,
    },

    #[error("cannot bind agent {agent} to task {task}: task already held by agent {existing}")]
    TaskAlreadyAssigned {
        agent: usize,
        task: TaskId,
        existing: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("no path for agent {agent} from {start:?} to {goal:?} after {expanded} expansions")]
    PlanNotFound {
        agent: usize,
        start: Cell,
        goal: Cell,
        expanded: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("agent {agent} starts on blocked or out-of-bounds cell {cell:?}")]
    InvalidAgentStart { agent: usize, cell: Cell },

    #[error("agents {first} and {second} share start cell {cell:?}")]
    SharedAgentStart {
        first: usize,
        second: usize,
        cell: Cell,
    },

    #[error("task {id} has blocked or out-of-bounds endpoint {cell:?}")]
    InvalidTaskCell { id: TaskId, cell: Cell },

    #[error("task id {0} appears more than once")]
    DuplicateTaskId(TaskId),

    #[error("map has {free} free cells, cannot place {requested} agents")]
    NotEnoughFreeCells { free: usize, requested: usize },
}
