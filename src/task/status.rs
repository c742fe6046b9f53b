//! Task lifecycle states and the status cell that guards their ordering.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::task::store::StatusStore;
use crate::types::TaskId;

/// Lifecycle state of a task.
///
/// # State Machine
/// ```text
/// Created -> Running -> GeneratingProcess -> GeneratingGraphic -> Sculpting -> Completed
/// ```
/// Declaration order is the lifecycle order, so `Ord` compares progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Running,
    GeneratingProcess,
    GeneratingGraphic,
    Sculpting,
    Completed,
}

impl TaskStatus {
    /// Every state in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Created,
        TaskStatus::Running,
        TaskStatus::GeneratingProcess,
        TaskStatus::GeneratingGraphic,
        TaskStatus::Sculpting,
        TaskStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::GeneratingProcess => "GENERATING_PROCESS",
            TaskStatus::GeneratingGraphic => "GENERATING_GRAPHIC",
            TaskStatus::Sculpting => "SCULPTING",
            TaskStatus::Completed => "COMPLETED",
        }
    }

    /// The only state a task may move to from this one.
    pub fn next(self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Created => Some(TaskStatus::Running),
            TaskStatus::Running => Some(TaskStatus::GeneratingProcess),
            TaskStatus::GeneratingProcess => Some(TaskStatus::GeneratingGraphic),
            TaskStatus::GeneratingGraphic => Some(TaskStatus::Sculpting),
            TaskStatus::Sculpting => Some(TaskStatus::Completed),
            TaskStatus::Completed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Completed
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Spaced forms ("GENERATING PROCESS") are accepted for older status dumps.
        let normalized = s.trim().replace(' ', "_").to_ascii_uppercase();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("Unknown task status: {}", s))
    }
}

/// Remote generation phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Process,
    Graphic,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Process => "process",
            Phase::Graphic => "graphic",
        }
    }

    /// Status a task holds while this phase is in flight.
    pub fn status(self) -> TaskStatus {
        match self {
            Phase::Process => TaskStatus::GeneratingProcess,
            Phase::Graphic => TaskStatus::GeneratingGraphic,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task's entry in a shared status store.
///
/// The owning task is the only writer. Readers go through the store, so any
/// context holding the same store sees each write as soon as `advance` returns.
pub struct StatusCell {
    id: TaskId,
    store: Arc<dyn StatusStore>,
}

impl StatusCell {
    /// Create the entry with `Created`.
    pub fn create(id: TaskId, store: Arc<dyn StatusStore>) -> Result<Self, TaskError> {
        store.put(id, TaskStatus::Created)?;
        Ok(Self { id, store })
    }

    pub fn get(&self) -> Result<TaskStatus, TaskError> {
        self.store
            .get(self.id)?
            .ok_or(TaskError::StatusMissing(self.id))
    }

    /// Move to `to`, which must be the immediate successor of the current state.
    pub fn advance(&self, to: TaskStatus) -> Result<(), TaskError> {
        let from = self.get()?;
        if from.next() != Some(to) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from,
                to,
            });
        }
        self.store.put(self.id, to)?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }
}

impl Drop for StatusCell {
    fn drop(&mut self) {
        if let Err(err) = self.store.remove(self.id) {
            tracing::warn!(task_id = %self.id, error = %err, "failed to remove status entry");
        }
    }
}
