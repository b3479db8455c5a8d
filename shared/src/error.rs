//! Domain error kinds raised by the task entity, validators and use-cases.

use crate::task::TaskId;

/// The only error kinds the core raises. Each non-internal variant maps to
/// an HTTP status code at the transport boundary (see `TaskError::status_hint`).
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("invalid {field}: {reason}")]
    TaskValidationError { field: String, reason: String },

    #[error("task {id} already finished with status {status}")]
    TaskAlreadyFinished { id: TaskId, status: String },

    #[error("task {0} has not been started")]
    TaskNotStarted(TaskId),

    #[error("task {id} has unmet dependencies: {unmet_ids:?}")]
    DependencyNotMet { id: TaskId, unmet_ids: Vec<TaskId> },

    #[error("task {id} has incomplete children: {incomplete_children:?}")]
    IncompleteChildrenError {
        id: TaskId,
        incomplete_children: Vec<TaskId>,
    },
}

impl TaskError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::TaskValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code this error kind is documented to map to.
    pub fn status_hint(&self) -> u16 {
        match self {
            TaskError::TaskNotFound(_) => 404,
            TaskError::TaskValidationError { .. } => 422,
            TaskError::TaskAlreadyFinished { .. } => 409,
            TaskError::TaskNotStarted(_) => 409,
            TaskError::DependencyNotMet { .. } => 422,
            TaskError::IncompleteChildrenError { .. } => 409,
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;
