//! The task entity and its status machine.
//!
//! A `Task` only comes into existence already valid: every constructor and
//! every transition goes through [`TaskDraft::build`], which re-runs the
//! invariants in §3 of the domain model. There is no setter that mutates a
//! `Task` in place; callers take a draft, change fields on it, and build a
//! new `Task` (or get a `TaskValidationError` back).

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

pub type TaskId = i64;

/// `date -> hours` allocation grid, keyed by calendar date so JSON
/// serialization produces ISO-8601 date strings (see §6 persisted state).
pub type DailyAllocations = BTreeMap<NaiveDate, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An always-valid task record. Fields are private; read through the
/// accessors below, mutate through [`Task::draft`] + [`TaskDraft::build`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: String,
    priority: Option<i32>,
    status: TaskStatus,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    planned_start: Option<NaiveDateTime>,
    planned_end: Option<NaiveDateTime>,
    deadline: Option<NaiveDateTime>,
    actual_start: Option<NaiveDateTime>,
    actual_end: Option<NaiveDateTime>,
    actual_duration: Option<f64>,
    estimated_duration: Option<f64>,
    is_fixed: bool,
    is_archived: bool,
    daily_allocations: DailyAllocations,
    actual_daily_hours: DailyAllocations,
    depends_on: Vec<TaskId>,
    tags: Vec<String>,
    notes: Option<String>,
}

/// A mutable, not-yet-validated sibling of [`Task`]. Every field is `pub` so
/// use-cases can change exactly the fields an update names; [`build`] is the
/// only path back to a `Task` and re-checks every invariant.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub id: TaskId,
    pub name: String,
    pub priority: Option<i32>,
    pub status: TaskStatus,
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

impl TaskDraft {
    /// A fresh draft for a task about to be created. `id`/timestamps are
    /// filled in by the repository (see `repository::generate_next_id`).
    pub fn new(id: TaskId, name: impl Into<String>, now: NaiveDateTime) -> Self {
        TaskDraft {
            id,
            name: name.into(),
            priority: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            planned_start: None,
            planned_end: None,
            deadline: None,
            actual_start: None,
            actual_end: None,
            actual_duration: None,
            estimated_duration: None,
            is_fixed: false,
            is_archived: false,
            daily_allocations: DailyAllocations::new(),
            actual_daily_hours: DailyAllocations::new(),
            depends_on: Vec::new(),
            tags: Vec::new(),
            notes: None,
        }
    }

    /// Re-validate the draft and produce a `Task`, the only constructor path.
    pub fn build(self) -> TaskResult<Task> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(TaskError::validation("name", "must not be empty"));
        }
        if let Some(p) = self.priority {
            if p <= 0 {
                return Err(TaskError::validation("priority", "must be > 0 when set"));
            }
        }
        if let Some(d) = self.estimated_duration {
            if d <= 0.0 {
                return Err(TaskError::validation(
                    "estimated_duration",
                    "must be > 0 when set",
                ));
            }
        }
        {
            let mut seen = std::collections::HashSet::new();
            for t in &self.tags {
                if t.is_empty() {
                    return Err(TaskError::validation("tags", "tag must not be empty"));
                }
                if !seen.insert(t) {
                    return Err(TaskError::validation("tags", format!("duplicate tag {t}")));
                }
            }
        }
        if let (Some(s), Some(e)) = (self.planned_start, self.planned_end) {
            if s > e {
                return Err(TaskError::validation(
                    "planned_start",
                    "planned_start must be <= planned_end",
                ));
            }
        }
        if let (Some(s), Some(e)) = (self.actual_start, self.actual_end) {
            if s > e {
                return Err(TaskError::validation(
                    "actual_start",
                    "actual_start must be <= actual_end",
                ));
            }
        }
        for hours in self.daily_allocations.values() {
            if *hours < 0.0 {
                return Err(TaskError::validation(
                    "daily_allocations",
                    "hours must be >= 0",
                ));
            }
        }

        Ok(Task {
            id: self.id,
            name: self.name.trim().to_string(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            deadline: self.deadline,
            actual_start: self.actual_start,
            actual_end: self.actual_end,
            actual_duration: self.actual_duration,
            estimated_duration: self.estimated_duration,
            is_fixed: self.is_fixed,
            is_archived: self.is_archived,
            daily_allocations: self.daily_allocations,
            actual_daily_hours: self.actual_daily_hours,
            depends_on: self.depends_on,
            tags: self.tags,
            notes: self.notes,
        })
    }
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }
    pub fn status(&self) -> TaskStatus {
        self.status
    }
    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }
    pub fn updated_at(&self) -> NaiveDateTime {
        self.updated_at
    }
    pub fn planned_start(&self) -> Option<NaiveDateTime> {
        self.planned_start
    }
    pub fn planned_end(&self) -> Option<NaiveDateTime> {
        self.planned_end
    }
    pub fn deadline(&self) -> Option<NaiveDateTime> {
        self.deadline
    }
    pub fn actual_start(&self) -> Option<NaiveDateTime> {
        self.actual_start
    }
    pub fn actual_end(&self) -> Option<NaiveDateTime> {
        self.actual_end
    }
    pub fn actual_duration(&self) -> Option<f64> {
        self.actual_duration
    }
    pub fn estimated_duration(&self) -> Option<f64> {
        self.estimated_duration
    }
    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }
    pub fn is_archived(&self) -> bool {
        self.is_archived
    }
    pub fn daily_allocations(&self) -> &DailyAllocations {
        &self.daily_allocations
    }
    pub fn actual_daily_hours(&self) -> &DailyAllocations {
        &self.actual_daily_hours
    }
    pub fn depends_on(&self) -> &[TaskId] {
        &self.depends_on
    }
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Start a draft from this task's current field values.
    pub fn draft(&self) -> TaskDraft {
        TaskDraft {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            deadline: self.deadline,
            actual_start: self.actual_start,
            actual_end: self.actual_end,
            actual_duration: self.actual_duration,
            estimated_duration: self.estimated_duration,
            is_fixed: self.is_fixed,
            is_archived: self.is_archived,
            daily_allocations: self.daily_allocations.clone(),
            actual_daily_hours: self.actual_daily_hours.clone(),
            depends_on: self.depends_on.clone(),
            tags: self.tags.clone(),
            notes: self.notes.clone(),
        }
    }

    /// Transition to `InProgress`. `dependency_statuses` must contain every id
    /// in `depends_on` that the repository could resolve; missing entries are
    /// treated as unmet.
    pub fn start(
        &self,
        now: NaiveDateTime,
        dependency_statuses: &HashMap<TaskId, TaskStatus>,
    ) -> TaskResult<Task> {
        if self.status.is_terminal() {
            return Err(TaskError::TaskAlreadyFinished {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        let unmet: Vec<TaskId> = self
            .depends_on
            .iter()
            .copied()
            .filter(|dep_id| dependency_statuses.get(dep_id) != Some(&TaskStatus::Completed))
            .collect();
        if !unmet.is_empty() {
            return Err(TaskError::DependencyNotMet {
                id: self.id,
                unmet_ids: unmet,
            });
        }

        let mut draft = self.draft();
        draft.status = TaskStatus::InProgress;
        if draft.actual_start.is_none() {
            draft.actual_start = Some(now);
        }
        draft.actual_end = None;
        draft.updated_at = now;
        draft.build()
    }

    pub fn complete(&self, now: NaiveDateTime) -> TaskResult<Task> {
        if self.status.is_terminal() {
            return Err(TaskError::TaskAlreadyFinished {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        let mut draft = self.draft();
        draft.status = TaskStatus::Completed;
        draft.actual_end = Some(now);
        draft.updated_at = now;
        draft.build()
    }

    pub fn cancel(&self, now: NaiveDateTime) -> TaskResult<Task> {
        if self.status.is_terminal() {
            return Err(TaskError::TaskAlreadyFinished {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        let mut draft = self.draft();
        draft.status = TaskStatus::Canceled;
        draft.actual_end = Some(now);
        draft.updated_at = now;
        draft.build()
    }

    /// Revert a terminal task to `Pending` without clearing timestamps. Used
    /// by the update path when a caller sets `status=Pending` explicitly.
    pub fn reopen(&self, now: NaiveDateTime) -> TaskResult<Task> {
        let mut draft = self.draft();
        draft.status = TaskStatus::Pending;
        draft.updated_at = now;
        draft.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn new_task(id: TaskId) -> Task {
        TaskDraft::new(id, "write report", now()).build().unwrap()
    }

    #[test]
    fn rejects_empty_name() {
        let err = TaskDraft::new(1, "   ", now()).build().unwrap_err();
        assert!(matches!(err, TaskError::TaskValidationError { field, .. } if field == "name"));
    }

    #[test]
    fn start_sets_in_progress_and_actual_start() {
        let task = new_task(1);
        let started = task.start(now(), &HashMap::new()).unwrap();
        assert_eq!(started.status(), TaskStatus::InProgress);
        assert_eq!(started.actual_start(), Some(now()));
    }

    #[test]
    fn start_blocked_by_unmet_dependency() {
        let mut draft = new_task(2).draft();
        draft.depends_on = vec![1];
        let task = draft.build().unwrap();
        let err = task.start(now(), &HashMap::new()).unwrap_err();
        match err {
            TaskError::DependencyNotMet { unmet_ids, .. } => assert_eq!(unmet_ids, vec![1]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn start_allowed_once_dependency_completed() {
        let mut draft = new_task(2).draft();
        draft.depends_on = vec![1];
        let task = draft.build().unwrap();
        let mut deps = HashMap::new();
        deps.insert(1, TaskStatus::Completed);
        assert!(task.start(now(), &deps).is_ok());
    }

    #[test]
    fn complete_then_start_again_fails() {
        let task = new_task(1);
        let completed = task.complete(now()).unwrap();
        let err = completed.start(now(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, TaskError::TaskAlreadyFinished { .. }));
    }

    #[test]
    fn reopen_resets_status_but_keeps_timestamps() {
        let task = new_task(1);
        let completed = task.complete(now()).unwrap();
        let reopened = completed.reopen(now()).unwrap();
        assert_eq!(reopened.status(), TaskStatus::Pending);
        assert_eq!(reopened.actual_end(), completed.actual_end());
    }

    #[test]
    fn duplicate_tags_rejected() {
        let mut draft = new_task(1).draft();
        draft.tags = vec!["a".to_string(), "a".to_string()];
        let err = draft.build().unwrap_err();
        assert!(matches!(err, TaskError::TaskValidationError { field, .. } if field == "tags"));
    }
}
