//! Change-notification payloads (§4.13, §6 WebSocket envelope, §3 AuditEvent).
//!
//! These are plain data: the broadcaster and audit sink (in `server`) decide
//! how and when to deliver them.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::task::TaskId;

/// One of the five task events plus the system-level `schedule_optimized`
/// event (§4.13). `into_envelope` produces the wire shape from §6.
#[derive(Debug, Clone)]
pub enum BroadcastEvent {
    TaskCreated {
        task_id: TaskId,
        task_name: String,
        priority: Option<i32>,
        status: String,
    },
    TaskUpdated {
        task_id: TaskId,
        task_name: String,
        updated_fields: Vec<String>,
        status: String,
    },
    TaskDeleted {
        task_id: TaskId,
        task_name: String,
    },
    TaskStatusChanged {
        task_id: TaskId,
        task_name: String,
        old_status: String,
        new_status: String,
    },
    TaskNotesUpdated {
        task_id: TaskId,
        task_name: String,
    },
    ScheduleOptimized {
        scheduled_count: usize,
        failed_count: usize,
        algorithm: String,
    },
}

impl BroadcastEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            BroadcastEvent::TaskCreated { .. } => "task_created",
            BroadcastEvent::TaskUpdated { .. } => "task_updated",
            BroadcastEvent::TaskDeleted { .. } => "task_deleted",
            BroadcastEvent::TaskStatusChanged { .. } => "task_status_changed",
            // Notes updates are reported as a task_updated with a fixed
            // field list, mirroring the original broadcaster's payload.
            BroadcastEvent::TaskNotesUpdated { .. } => "task_updated",
            BroadcastEvent::ScheduleOptimized { .. } => "schedule_optimized",
        }
    }

    /// Build the `{type, ...payload, source_user_name}` JSON envelope
    /// delivered to each connected client.
    pub fn into_envelope(self, source_user_name: Option<String>) -> Value {
        let type_name = self.type_name();
        let mut payload = match self {
            BroadcastEvent::TaskCreated {
                task_id,
                task_name,
                priority,
                status,
            } => serde_json::json!({
                "task_id": task_id,
                "task_name": task_name,
                "priority": priority,
                "status": status,
            }),
            BroadcastEvent::TaskUpdated {
                task_id,
                task_name,
                updated_fields,
                status,
            } => serde_json::json!({
                "task_id": task_id,
                "task_name": task_name,
                "updated_fields": updated_fields,
                "status": status,
            }),
            BroadcastEvent::TaskDeleted { task_id, task_name } => serde_json::json!({
                "task_id": task_id,
                "task_name": task_name,
            }),
            BroadcastEvent::TaskStatusChanged {
                task_id,
                task_name,
                old_status,
                new_status,
            } => serde_json::json!({
                "task_id": task_id,
                "task_name": task_name,
                "old_status": old_status,
                "new_status": new_status,
            }),
            BroadcastEvent::TaskNotesUpdated { task_id, task_name } => serde_json::json!({
                "task_id": task_id,
                "task_name": task_name,
                "updated_fields": ["notes"],
            }),
            BroadcastEvent::ScheduleOptimized {
                scheduled_count,
                failed_count,
                algorithm,
            } => serde_json::json!({
                "scheduled_count": scheduled_count,
                "failed_count": failed_count,
                "algorithm": algorithm,
            }),
        };
        payload["type"] = Value::String(type_name.to_string());
        payload["source_user_name"] = match source_user_name {
            Some(name) => Value::String(name),
            None => Value::Null,
        };
        payload
    }
}

/// Append-only audit record persisted for every controller write, including
/// ones that fail validation (§4.13).
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: NaiveDateTime,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: Option<TaskId>,
    pub resource_name: Option<String>,
    pub success: bool,
    pub client_name: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_and_source_user_name() {
        let event = BroadcastEvent::TaskDeleted {
            task_id: 7,
            task_name: "cleanup".to_string(),
        };
        let envelope = event.into_envelope(Some("alice".to_string()));
        assert_eq!(envelope["type"], "task_deleted");
        assert_eq!(envelope["task_id"], 7);
        assert_eq!(envelope["source_user_name"], "alice");
    }

    #[test]
    fn notes_update_reports_as_task_updated_with_notes_field() {
        let event = BroadcastEvent::TaskNotesUpdated {
            task_id: 1,
            task_name: "t".to_string(),
        };
        let envelope = event.into_envelope(None);
        assert_eq!(envelope["type"], "task_updated");
        assert_eq!(envelope["updated_fields"][0], "notes");
        assert!(envelope["source_user_name"].is_null());
    }
}
