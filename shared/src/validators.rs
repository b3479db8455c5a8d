//! Validator registry: a dispatch table from field name to a validator
//! invoked by the update path (§4.12). Unknown fields pass without
//! validation.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{TaskError, TaskResult};
use crate::task::{Task, TaskId, TaskStatus};

/// Read access the dependency/cycle validators need. Implemented by the
/// repository in the `server` crate; kept minimal and object-safe so
/// `shared` never depends on a concrete persistence layer.
pub trait TaskLookup {
    fn get_by_ids(&self, ids: &[TaskId]) -> HashMap<TaskId, Task>;
}

pub struct ValidatorContext<'a> {
    pub current: &'a Task,
    pub lookup: &'a dyn TaskLookup,
}

/// Validate a single named field update. Unknown field names are accepted
/// silently, per the registry contract.
pub fn validate_field(field: &str, value: &Value, ctx: &ValidatorContext) -> TaskResult<()> {
    match field {
        "status" => validate_status_transition(value, ctx.current),
        "priority" => validate_positive_number(field, value),
        "estimated_duration" => validate_positive_number(field, value),
        "depends_on" => validate_dependencies(value, ctx),
        "tags" => validate_tags(value),
        _ => Ok(()),
    }
}

fn validate_status_transition(value: &Value, current: &Task) -> TaskResult<()> {
    let Some(raw) = value.as_str() else {
        return Err(TaskError::validation("status", "must be a string"));
    };
    let new_status = match raw {
        "pending" => TaskStatus::Pending,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "canceled" => TaskStatus::Canceled,
        other => {
            return Err(TaskError::validation(
                "status",
                format!("unknown status {other}"),
            ))
        }
    };

    let current_status = current.status();
    if current_status.is_terminal() && new_status != current_status {
        // Only the explicit `reopen` use-case may leave a terminal status;
        // a plain field-update to another active status is rejected here.
        if new_status != TaskStatus::Pending {
            return Err(TaskError::TaskAlreadyFinished {
                id: current.id(),
                status: current_status.to_string(),
            });
        }
        return Ok(());
    }

    match (current_status, new_status) {
        (TaskStatus::Pending, TaskStatus::Completed) => Err(TaskError::TaskNotStarted(current.id())),
        _ => Ok(()),
    }
}

fn validate_positive_number(field: &str, value: &Value) -> TaskResult<()> {
    if value.is_null() {
        return Ok(());
    }
    let Some(n) = value.as_f64() else {
        return Err(TaskError::validation(field, "must be numeric"));
    };
    if n <= 0.0 {
        return Err(TaskError::validation(field, "must be > 0"));
    }
    Ok(())
}

fn validate_dependencies(value: &Value, ctx: &ValidatorContext) -> TaskResult<()> {
    let Some(arr) = value.as_array() else {
        return Err(TaskError::validation("depends_on", "must be an array of ids"));
    };
    let mut ids = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(id) = item.as_i64() else {
            return Err(TaskError::validation("depends_on", "ids must be integers"));
        };
        ids.push(id);
    }
    if ids.contains(&ctx.current.id()) {
        return Err(TaskError::validation(
            "depends_on",
            "a task cannot depend on itself",
        ));
    }

    let found = ctx.lookup.get_by_ids(&ids);
    for id in &ids {
        if !found.contains_key(id) {
            return Err(TaskError::validation(
                "depends_on",
                format!("dependency {id} does not exist"),
            ));
        }
    }

    if would_introduce_cycle(ctx.current.id(), &ids, ctx.lookup) {
        return Err(TaskError::validation(
            "depends_on",
            "update would introduce a dependency cycle",
        ));
    }
    Ok(())
}

/// Depth-first walk from each proposed dependency; a cycle exists if the
/// walk reaches `task_id` again.
fn would_introduce_cycle(task_id: TaskId, proposed: &[TaskId], lookup: &dyn TaskLookup) -> bool {
    let mut stack: Vec<TaskId> = proposed.to_vec();
    let mut visited = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if id == task_id {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        let found = lookup.get_by_ids(&[id]);
        if let Some(task) = found.get(&id) {
            stack.extend(task.depends_on().iter().copied());
        }
    }
    false
}

fn validate_tags(value: &Value) -> TaskResult<()> {
    let Some(arr) = value.as_array() else {
        return Err(TaskError::validation("tags", "must be an array of strings"));
    };
    let mut seen = std::collections::HashSet::new();
    for item in arr {
        let Some(tag) = item.as_str() else {
            return Err(TaskError::validation("tags", "tags must be strings"));
        };
        if tag.is_empty() {
            return Err(TaskError::validation("tags", "tag must not be empty"));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TaskError::validation(
                "tags",
                format!("tag {tag} contains invalid characters"),
            ));
        }
        if !seen.insert(tag) {
            return Err(TaskError::validation("tags", format!("duplicate tag {tag}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDraft;
    use chrono::NaiveDate;
    use serde_json::json;

    struct EmptyLookup;
    impl TaskLookup for EmptyLookup {
        fn get_by_ids(&self, _ids: &[TaskId]) -> HashMap<TaskId, Task> {
            HashMap::new()
        }
    }

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn pending_to_completed_without_start_is_rejected() {
        let task = TaskDraft::new(1, "t", now()).build().unwrap();
        let lookup = EmptyLookup;
        let ctx = ValidatorContext {
            current: &task,
            lookup: &lookup,
        };
        let err = validate_field("status", &json!("completed"), &ctx).unwrap_err();
        assert!(matches!(err, TaskError::TaskNotStarted(_)));
    }

    #[test]
    fn completed_to_in_progress_is_rejected() {
        let task = TaskDraft::new(1, "t", now())
            .build()
            .unwrap()
            .complete(now())
            .unwrap();
        let lookup = EmptyLookup;
        let ctx = ValidatorContext {
            current: &task,
            lookup: &lookup,
        };
        let err = validate_field("status", &json!("in_progress"), &ctx).unwrap_err();
        assert!(matches!(err, TaskError::TaskAlreadyFinished { .. }));
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let task = TaskDraft::new(1, "t", now()).build().unwrap();
        let lookup = EmptyLookup;
        let ctx = ValidatorContext {
            current: &task,
            lookup: &lookup,
        };
        let err = validate_field("depends_on", &json!([99]), &ctx).unwrap_err();
        assert!(matches!(err, TaskError::TaskValidationError { field, .. } if field == "depends_on"));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let task = TaskDraft::new(1, "t", now()).build().unwrap();
        let lookup = EmptyLookup;
        let ctx = ValidatorContext {
            current: &task,
            lookup: &lookup,
        };
        let err = validate_field("depends_on", &json!([1]), &ctx).unwrap_err();
        assert!(matches!(err, TaskError::TaskValidationError { .. }));
    }

    #[test]
    fn invalid_tag_characters_rejected() {
        let err = validate_tags(&json!(["ok_tag", "bad tag!"])).unwrap_err();
        assert!(matches!(err, TaskError::TaskValidationError { field, .. } if field == "tags"));
    }

    #[test]
    fn unknown_field_passes_without_validation() {
        let task = TaskDraft::new(1, "t", now()).build().unwrap();
        let lookup = EmptyLookup;
        let ctx = ValidatorContext {
            current: &task,
            lookup: &lookup,
        };
        assert!(validate_field("color", &json!("blue"), &ctx).is_ok());
    }
}
