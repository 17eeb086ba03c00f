use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::common::{Task, TaskId, TaskStatus};
use crate::error::RegistryError;

/// Lifecycle bookkeeping for every package seen during an episode.
///
/// Records are never removed. Pending tasks are additionally indexed by
/// `(deadline, id)` so `pending()` can walk them in order without sorting.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    pending: BTreeSet<(usize, TaskId)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds newly released tasks as Pending and returns how many were new.
    pub fn ingest<I>(&mut self, new_tasks: I) -> usize
    where
        I: IntoIterator<Item = Task>,
    {
        let mut added = 0;
        for mut task in new_tasks {
            if self.tasks.contains_key(&task.id) {
                debug!("ignore duplicate task {}", task.id);
                continue;
            }
            if task.pickup == task.dropoff {
                warn!(
                    "task {} has identical pickup and dropoff {:?}",
                    task.id, task.pickup
                );
            }
            task.status = TaskStatus::Pending;
            self.pending.insert((task.deadline, task.id));
            self.tasks.insert(task.id, task);
            added += 1;
        }
        added
    }

    /// Pending tasks by ascending deadline, ties by ascending id.
    pub fn pending(&self) -> impl Iterator<Item = &Task> + Clone + '_ {
        self.pending.iter().map(move |(_, id)| &self.tasks[id])
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|task| task.status)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    pub fn mark_assigned(&mut self, id: TaskId) -> Result<(), RegistryError> {
        self.transition(id, &[TaskStatus::Pending], TaskStatus::Assigned)
    }

    pub fn mark_in_transit(&mut self, id: TaskId) -> Result<(), RegistryError> {
        self.transition(id, &[TaskStatus::Assigned], TaskStatus::InTransit)
    }

    pub fn mark_delivered(&mut self, id: TaskId) -> Result<(), RegistryError> {
        self.transition(id, &[TaskStatus::InTransit], TaskStatus::Delivered)
    }

    pub fn mark_expired(&mut self, id: TaskId) -> Result<(), RegistryError> {
        self.transition(
            id,
            &[TaskStatus::Pending, TaskStatus::Assigned],
            TaskStatus::Expired,
        )
    }

    /// Hands an assigned but not yet picked up task back to the pending pool.
    pub fn release(&mut self, id: TaskId) -> Result<(), RegistryError> {
        self.transition(id, &[TaskStatus::Assigned], TaskStatus::Pending)
    }

    /// Expires every pending task whose `deadline + grace` lies before `tick`.
    pub fn expire_overdue(&mut self, tick: usize, grace: usize) -> Vec<TaskId> {
        let overdue: Vec<TaskId> = self
            .pending
            .iter()
            .take_while(|(deadline, _)| deadline.saturating_add(grace) < tick)
            .map(|&(_, id)| id)
            .collect();

        for &id in &overdue {
            if let Err(err) = self.mark_expired(id) {
                warn!("{err}");
            }
        }
        overdue
    }

    fn transition(
        &mut self,
        id: TaskId,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<(), RegistryError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RegistryError::UnknownTask(id))?;

        if !allowed_from.contains(&task.status) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: task.status,
                to,
            });
        }

        if task.status == TaskStatus::Pending {
            self.pending.remove(&(task.deadline, id));
        }
        if to == TaskStatus::Pending {
            self.pending.insert((task.deadline, id));
        }
        debug!("task {id}: {:?} -> {to:?}", task.status);
        task.status = to;
        Ok(())
    }
}
