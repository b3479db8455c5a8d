//! Use-cases / controller layer (§4.11): the only entry points that mutate
//! tasks. Each write follows load -> validate -> mutate -> persist -> audit
//! -> broadcast, serialised by a single process-wide write lock (§5 "coarse
//! per-process mutex acceptable").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{NaiveDateTime, NaiveTime};
use serde_json::Value;
use shared::allocation::initialize_allocations;
use shared::dto::{CreateTaskRequest, OptimizeRequest, OptimizeResult, TaskResponse, UpdateTaskRequest};
use shared::error::TaskError;
use shared::events::{AuditEvent, BroadcastEvent};
use shared::task::{Task, TaskDraft, TaskId, TaskStatus};
use shared::time::{AllocationParams, HolidayChecker};
use shared::validators::{validate_field, ValidatorContext};
use shared::workload;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::broadcaster::Broadcaster;
use crate::optimization::Strategy;
use crate::repository::TaskRepository;

/// Surfaces both the domain error kinds §7 enumerates and the infrastructure
/// failures (§4.2) that the repository alone can raise. Kept as a distinct
/// type from `TaskError` so that enum stays exactly the "only kinds the core
/// raises" (shared crate) while the server layer still reports storage
/// failures with their own status code.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Domain(#[from] TaskError),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ControllerError {
    pub fn status_hint(&self) -> u16 {
        match self {
            ControllerError::Domain(e) => e.status_hint(),
            ControllerError::Storage(_) => 500,
        }
    }
}

type Result<T> = std::result::Result<T, ControllerError>;

pub struct Controller {
    repository: Arc<TaskRepository>,
    broadcaster: Arc<Broadcaster>,
    holiday_checker: Arc<dyn HolidayChecker>,
    default_start_time: NaiveTime,
    default_end_time: NaiveTime,
    write_lock: AsyncMutex<()>,
}

impl Controller {
    pub fn new(
        repository: Arc<TaskRepository>,
        broadcaster: Arc<Broadcaster>,
        holiday_checker: Arc<dyn HolidayChecker>,
        default_start_time: NaiveTime,
        default_end_time: NaiveTime,
    ) -> Self {
        Controller {
            repository,
            broadcaster,
            holiday_checker,
            default_start_time,
            default_end_time,
            write_lock: AsyncMutex::new(()),
        }
    }

    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn load(&self, id: TaskId) -> Result<Task> {
        self.repository
            .get_by_id(id)?
            .ok_or(ControllerError::Domain(TaskError::TaskNotFound(id)))
    }

    fn dependency_statuses(&self, task: &Task) -> Result<HashMap<TaskId, TaskStatus>> {
        let found = self.repository.get_by_ids(task.depends_on())?;
        Ok(found.into_iter().map(|(id, t)| (id, t.status())).collect())
    }

    fn write_audit(
        &self,
        operation: &str,
        resource_id: Option<TaskId>,
        resource_name: Option<String>,
        success: bool,
        old_values: Option<Value>,
        new_values: Option<Value>,
        error_message: Option<String>,
    ) {
        let event = AuditEvent {
            timestamp: self.now(),
            operation: operation.to_string(),
            resource_type: "task".to_string(),
            resource_id,
            resource_name,
            success,
            client_name: None,
            old_values,
            new_values,
            error_message,
        };
        // Audit persistence must be durable before the controller returns
        // success, but a failure here must not fail the caller's operation.
        if let Err(e) = self.repository.append_audit(&event) {
            warn!("failed to persist audit log entry: {e:#}");
        }
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.load(id)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.repository.get_all()?)
    }

    pub async fn create_task(&self, req: CreateTaskRequest, source_user_name: Option<String>) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let now = self.now();
        let next_id = self.repository.generate_next_id()?;

        let mut draft = TaskDraft::new(next_id, req.name, now);
        draft.priority = req.priority;
        draft.deadline = req.deadline;
        draft.estimated_duration = req.estimated_duration;
        draft.planned_start = req.planned_start;
        draft.planned_end = req.planned_end;
        draft.is_fixed = req.is_fixed;
        draft.tags = req.tags;
        draft.notes = req.notes;

        let result = draft.build().map_err(ControllerError::from);
        self.write_audit(
            "create_task",
            None,
            result.as_ref().ok().map(|t| t.name().to_string()),
            result.is_ok(),
            None,
            result.as_ref().ok().map(|t| serde_json::to_value(TaskResponse::from(t)).unwrap()),
            result.as_ref().err().map(|e| e.to_string()),
        );
        let built = result?;
        let saved = self.repository.save(&built, now)?;

        self.broadcaster.publish(
            BroadcastEvent::TaskCreated {
                task_id: saved.id(),
                task_name: saved.name().to_string(),
                priority: saved.priority(),
                status: saved.status().to_string(),
            },
            source_user_name,
        );
        Ok(saved)
    }

    pub async fn update_task(
        &self,
        id: TaskId,
        req: UpdateTaskRequest,
        source_user_name: Option<String>,
    ) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let now = self.now();
        let current = self.load(id)?;
        let old_value = serde_json::to_value(TaskResponse::from(&current)).unwrap();

        let changed_fields = changed_field_names(&req);
        let result = self.apply_update(&current, req, now);
        self.write_audit(
            "update_task",
            Some(id),
            Some(current.name().to_string()),
            result.is_ok(),
            Some(old_value),
            result.as_ref().ok().map(|t| serde_json::to_value(TaskResponse::from(t)).unwrap()),
            result.as_ref().err().map(|e| e.to_string()),
        );
        let updated = result?;
        let saved = self.repository.save(&updated, now)?;

        if saved.status() != current.status() {
            self.broadcaster.publish(
                BroadcastEvent::TaskStatusChanged {
                    task_id: saved.id(),
                    task_name: saved.name().to_string(),
                    old_status: current.status().to_string(),
                    new_status: saved.status().to_string(),
                },
                source_user_name.clone(),
            );
        }
        if changed_fields == ["notes"] {
            self.broadcaster.publish(
                BroadcastEvent::TaskNotesUpdated {
                    task_id: saved.id(),
                    task_name: saved.name().to_string(),
                },
                source_user_name,
            );
        } else if !changed_fields.is_empty() {
            self.broadcaster.publish(
                BroadcastEvent::TaskUpdated {
                    task_id: saved.id(),
                    task_name: saved.name().to_string(),
                    updated_fields: changed_fields,
                    status: saved.status().to_string(),
                },
                source_user_name,
            );
        }
        Ok(saved)
    }

    /// Applies every present field in `req` to a draft off `current`,
    /// validating each through the registry (§4.12), delegating `status`
    /// changes to the matching lifecycle transition, and recomputing
    /// `daily_allocations` when the planned window or duration moved (§4.11).
    fn apply_update(&self, current: &Task, req: UpdateTaskRequest, now: NaiveDateTime) -> Result<Task> {
        let mut draft = current.draft();
        let mut schedule_touched = false;

        if let Some(name) = req.name {
            draft.name = name;
        }
        if let Some(priority) = req.priority {
            let ctx = ValidatorContext {
                current,
                lookup: self.repository.as_ref(),
            };
            validate_field("priority", &serde_json::json!(priority), &ctx)?;
            draft.priority = priority;
        }
        if let Some(deadline) = req.deadline {
            draft.deadline = deadline;
        }
        if let Some(estimated_duration) = req.estimated_duration {
            let ctx = ValidatorContext {
                current,
                lookup: self.repository.as_ref(),
            };
            validate_field("estimated_duration", &serde_json::json!(estimated_duration), &ctx)?;
            draft.estimated_duration = estimated_duration;
            schedule_touched = true;
        }
        if let Some(planned_start) = req.planned_start {
            draft.planned_start = planned_start;
            schedule_touched = true;
        }
        if let Some(planned_end) = req.planned_end {
            draft.planned_end = planned_end;
            schedule_touched = true;
        }
        if let Some(is_fixed) = req.is_fixed {
            draft.is_fixed = is_fixed;
        }
        if let Some(tags) = req.tags {
            let ctx = ValidatorContext {
                current,
                lookup: self.repository.as_ref(),
            };
            validate_field("tags", &serde_json::json!(tags), &ctx)?;
            draft.tags = tags;
        }
        if let Some(notes) = req.notes {
            draft.notes = notes;
        }
        draft.updated_at = now;

        if let Some(status_str) = req.status {
            let ctx = ValidatorContext {
                current,
                lookup: self.repository.as_ref(),
            };
            validate_field("status", &serde_json::json!(status_str), &ctx)?;
            let built = draft.build()?;
            let transitioned = match status_str.as_str() {
                "in_progress" => {
                    let deps = self.dependency_statuses(&built)?;
                    built.start(now, &deps)?
                }
                "completed" => built.complete(now)?,
                "canceled" => built.cancel(now)?,
                "pending" => built.reopen(now)?,
                other => return Err(TaskError::validation("status", format!("unknown status {other}")).into()),
            };
            draft = transitioned.draft();
        }

        if schedule_touched {
            let probe = draft.clone().build()?;
            draft.daily_allocations = workload::actual_schedule(&probe, self.holiday_checker.as_ref());
        }

        Ok(draft.build()?)
    }

    pub async fn delete_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.load(id)?;
        self.repository.delete(id)?;
        self.write_audit(
            "delete_task",
            Some(id),
            Some(current.name().to_string()),
            true,
            Some(serde_json::to_value(TaskResponse::from(&current)).unwrap()),
            None,
            None,
        );
        self.broadcaster.publish(
            BroadcastEvent::TaskDeleted {
                task_id: id,
                task_name: current.name().to_string(),
            },
            source_user_name,
        );
        Ok(())
    }

    async fn transition(
        &self,
        id: TaskId,
        operation: &str,
        source_user_name: Option<String>,
        transition: impl FnOnce(&Task, NaiveDateTime, &HashMap<TaskId, TaskStatus>) -> shared::error::TaskResult<Task>,
    ) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let now = self.now();
        let current = self.load(id)?;
        let deps = self.dependency_statuses(&current)?;
        let result = transition(&current, now, &deps).map_err(ControllerError::from);
        self.write_audit(
            operation,
            Some(id),
            Some(current.name().to_string()),
            result.is_ok(),
            Some(serde_json::to_value(TaskResponse::from(&current)).unwrap()),
            result.as_ref().ok().map(|t| serde_json::to_value(TaskResponse::from(t)).unwrap()),
            result.as_ref().err().map(|e| e.to_string()),
        );
        let updated = result?;
        let saved = self.repository.save(&updated, now)?;
        self.broadcaster.publish(
            BroadcastEvent::TaskStatusChanged {
                task_id: saved.id(),
                task_name: saved.name().to_string(),
                old_status: current.status().to_string(),
                new_status: saved.status().to_string(),
            },
            source_user_name,
        );
        Ok(saved)
    }

    pub async fn start_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.transition(id, "start_task", source_user_name, |task, now, deps| task.start(now, deps))
            .await
    }

    pub async fn complete_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.transition(id, "complete_task", source_user_name, |task, now, _| task.complete(now))
            .await
    }

    pub async fn cancel_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.transition(id, "cancel_task", source_user_name, |task, now, _| task.cancel(now))
            .await
    }

    pub async fn reopen_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.transition(id, "reopen_task", source_user_name, |task, now, _| task.reopen(now))
            .await
    }

    async fn set_archived(&self, id: TaskId, archived: bool, operation: &str, source_user_name: Option<String>) -> Result<Task> {
        let _guard = self.write_lock.lock().await;
        let now = self.now();
        let current = self.load(id)?;
        let mut draft = current.draft();
        draft.is_archived = archived;
        draft.updated_at = now;
        let result = draft.build().map_err(ControllerError::from);
        self.write_audit(
            operation,
            Some(id),
            Some(current.name().to_string()),
            result.is_ok(),
            Some(serde_json::to_value(TaskResponse::from(&current)).unwrap()),
            result.as_ref().ok().map(|t| serde_json::to_value(TaskResponse::from(t)).unwrap()),
            result.as_ref().err().map(|e| e.to_string()),
        );
        let built = result?;
        let saved = self.repository.save(&built, now)?;
        self.broadcaster.publish(
            BroadcastEvent::TaskUpdated {
                task_id: saved.id(),
                task_name: saved.name().to_string(),
                updated_fields: vec!["is_archived".to_string()],
                status: saved.status().to_string(),
            },
            source_user_name,
        );
        Ok(saved)
    }

    pub async fn archive_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.set_archived(id, true, "archive_task", source_user_name).await
    }

    pub async fn restore_task(&self, id: TaskId, source_user_name: Option<String>) -> Result<Task> {
        self.set_archived(id, false, "restore_task", source_user_name).await
    }

    /// §4.1-§4.10, §6 `POST /api/v1/optimize`. Tasks outside `req.task_ids`
    /// (and every fixed task, regardless of the filter) form the background
    /// `initializeAllocations` context instead of being handed to the
    /// allocator; only non-fixed, selected tasks are candidates.
    ///
    /// A non-fixed task that already carries a `planned_start` is treated as
    /// already scheduled and left in the context unless `force_override` is
    /// set, in which case its existing plan is cleared and it competes for
    /// allocation like any other candidate.
    pub async fn optimize(&self, req: OptimizeRequest, source_user_name: Option<String>) -> Result<OptimizeResult> {
        let _guard = self.write_lock.lock().await;
        let all = self.repository.get_all()?;
        let selected: Option<HashSet<TaskId>> = req.task_ids.as_ref().map(|ids| ids.iter().copied().collect());
        let is_candidate = |t: &Task| -> bool {
            if t.is_fixed() || t.is_archived() {
                return false;
            }
            if t.planned_start().is_some() && !req.force_override {
                return false;
            }
            match &selected {
                Some(ids) => ids.contains(&t.id()),
                None => true,
            }
        };
        let candidates: Vec<Task> = all.iter().filter(|t| is_candidate(t)).cloned().collect();
        let context: Vec<Task> = all.iter().filter(|t| !is_candidate(t)).cloned().collect();

        let strategy = Strategy::from_name(&req.algorithm)
            .ok_or_else(|| TaskError::validation("algorithm", format!("unknown algorithm {}", req.algorithm)))?;

        let params = AllocationParams {
            start_date: req.start_date,
            current_time: Some(self.now()),
            max_hours_per_day: req.max_hours_per_day,
            holiday_checker: self.holiday_checker.as_ref(),
            include_all_days: req.include_all_days,
            default_start_time: self.default_start_time,
            default_end_time: self.default_end_time,
        };
        let mut grid = initialize_allocations(context.iter());
        let budget = matches!(strategy, Strategy::Genetic | Strategy::MonteCarlo).then_some(StdDuration::from_secs(10));
        let (successes, failures) = strategy.run(&candidates, &mut grid, &params, budget);

        let now = self.now();
        let saved = self.repository.save_all(&successes, now)?;
        let result = OptimizeResult {
            successful_tasks: saved.iter().map(|t| t.id()).collect(),
            failed_tasks: failures,
            algorithm: req.algorithm.clone(),
        };

        self.write_audit(
            "optimize",
            None,
            None,
            true,
            None,
            Some(serde_json::to_value(&result).unwrap()),
            None,
        );
        self.broadcaster.publish(
            BroadcastEvent::ScheduleOptimized {
                scheduled_count: result.successful_tasks.len(),
                failed_count: result.failed_tasks.len(),
                algorithm: req.algorithm,
            },
            source_user_name,
        );
        Ok(result)
    }
}

fn changed_field_names(req: &UpdateTaskRequest) -> Vec<String> {
    let mut fields = Vec::new();
    if req.name.is_some() {
        fields.push("name".to_string());
    }
    if req.priority.is_some() {
        fields.push("priority".to_string());
    }
    if req.deadline.is_some() {
        fields.push("deadline".to_string());
    }
    if req.estimated_duration.is_some() {
        fields.push("estimated_duration".to_string());
    }
    if req.planned_start.is_some() {
        fields.push("planned_start".to_string());
    }
    if req.planned_end.is_some() {
        fields.push("planned_end".to_string());
    }
    if req.is_fixed.is_some() {
        fields.push("is_fixed".to_string());
    }
    if req.tags.is_some() {
        fields.push("tags".to_string());
    }
    if req.notes.is_some() {
        fields.push("notes".to_string());
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared::time::NoHolidays;

    fn holidays() -> Arc<dyn HolidayChecker> {
        Arc::new(NoHolidays)
    }

    fn controller() -> (Controller, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = TaskRepository::new(dir.path()).unwrap();
        repo.initialize().unwrap();
        let controller = Controller::new(
            Arc::new(repo),
            Arc::new(Broadcaster::new()),
            holidays(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        (controller, dir)
    }

    fn create_req(name: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            name: name.to_string(),
            priority: None,
            deadline: None,
            estimated_duration: None,
            planned_start: None,
            planned_end: None,
            is_fixed: false,
            tags: Vec::new(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (controller, _dir) = controller();
        let created = controller.create_task(create_req("write report"), None).await.unwrap();
        let fetched = controller.get_task(created.id()).unwrap();
        assert_eq!(fetched.name(), "write report");
    }

    #[tokio::test]
    async fn start_without_dependencies_succeeds() {
        let (controller, _dir) = controller();
        let created = controller.create_task(create_req("t"), None).await.unwrap();
        let started = controller.start_task(created.id(), None).await.unwrap();
        assert_eq!(started.status(), TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn complete_without_start_is_rejected() {
        let (controller, _dir) = controller();
        let created = controller.create_task(create_req("t"), None).await.unwrap();
        let err = controller.complete_task(created.id(), None).await.unwrap_err();
        assert!(matches!(err, ControllerError::Domain(TaskError::TaskNotStarted(_))));
    }

    #[tokio::test]
    async fn update_recomputes_daily_allocations_on_schedule_change() {
        let (controller, _dir) = controller();
        let created = controller.create_task(create_req("t"), None).await.unwrap();
        let start = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 10, 21).unwrap().and_hms_opt(18, 0, 0).unwrap();
        let mut req = UpdateTaskRequest::default();
        req.estimated_duration = Some(Some(10.0));
        req.planned_start = Some(Some(start));
        req.planned_end = Some(Some(end));
        let updated = controller.update_task(created.id(), req, None).await.unwrap();
        assert_eq!(updated.daily_allocations().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_task() {
        let (controller, _dir) = controller();
        let created = controller.create_task(create_req("t"), None).await.unwrap();
        controller.delete_task(created.id(), None).await.unwrap();
        assert!(matches!(
            controller.get_task(created.id()).unwrap_err(),
            ControllerError::Domain(TaskError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn optimize_schedules_eligible_tasks() {
        let (controller, _dir) = controller();
        let mut req = create_req("t");
        req.estimated_duration = Some(8.0);
        controller.create_task(req, None).await.unwrap();

        let optimize_req = OptimizeRequest {
            algorithm: "greedy".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 10, 20).unwrap().and_hms_opt(9, 0, 0).unwrap(),
            max_hours_per_day: 8.0,
            force_override: false,
            task_ids: None,
            include_all_days: false,
        };
        let result = controller.optimize(optimize_req, None).await.unwrap();
        assert_eq!(result.successful_tasks.len(), 1);
        assert!(result.failed_tasks.is_empty());
    }
}
