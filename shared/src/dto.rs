//! Wire DTOs shared between the controller and the HTTP layer (§6).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::task::{DailyAllocations, Task, TaskId};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub priority: Option<i32>,
    pub deadline: Option<NaiveDateTime>,
    pub estimated_duration: Option<f64>,
    pub planned_start: Option<NaiveDateTime>,
    pub planned_end: Option<NaiveDateTime>,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

/// All fields optional: unspecified fields are left unchanged (§6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub priority: Option<Option<i32>>,
    pub deadline: Option<Option<NaiveDateTime>>,
    pub estimated_duration: Option<Option<f64>>,
    pub planned_start: Option<Option<NaiveDateTime>>,
    pub planned_end: Option<Option<NaiveDateTime>>,
    pub is_fixed: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: TaskId,
    pub name: String,
    pub priority: Option<i32>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub planned_start: Option<NaiveDateTime>,
    pub planned_end: Option<NaiveDateTime>,
    pub deadline: Option<NaiveDateTime>,
    pub actual_start: Option<NaiveDateTime>,
    pub actual_end: Option<NaiveDateTime>,
    pub actual_duration: Option<f64>,
    pub estimated_duration: Option<f64>,
    pub is_fixed: bool,
    pub is_archived: bool,
    pub daily_allocations: DailyAllocations,
    pub actual_daily_hours: DailyAllocations,
    pub depends_on: Vec<TaskId>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        TaskResponse {
            id: task.id(),
            name: task.name().to_string(),
            priority: task.priority(),
            status: task.status().to_string(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
            planned_start: task.planned_start(),
            planned_end: task.planned_end(),
            deadline: task.deadline(),
            actual_start: task.actual_start(),
            actual_end: task.actual_end(),
            actual_duration: task.actual_duration(),
            estimated_duration: task.estimated_duration(),
            is_fixed: task.is_fixed(),
            is_archived: task.is_archived(),
            daily_allocations: task.daily_allocations().clone(),
            actual_daily_hours: task.actual_daily_hours().clone(),
            depends_on: task.depends_on().to_vec(),
            tags: task.tags().to_vec(),
            notes: task.notes().map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeRequest {
    pub algorithm: String,
    pub start_date: NaiveDateTime,
    pub max_hours_per_day: f64,
    #[serde(default = "crate::defaults::default_force_override")]
    pub force_override: bool,
    pub task_ids: Option<Vec<TaskId>>,
    #[serde(default)]
    pub include_all_days: bool,
}

/// A task the allocator could not place, with the reason it records (§3
/// DailyAllocation grid, §7 `AllocationFailure`: never surfaced as an
/// exception, only ever carried here).
#[derive(Debug, Clone, Serialize)]
pub struct AllocationFailure {
    pub task_id: TaskId,
    pub task_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeResult {
    pub successful_tasks: Vec<TaskId>,
    pub failed_tasks: Vec<AllocationFailure>,
    pub algorithm: String,
}
