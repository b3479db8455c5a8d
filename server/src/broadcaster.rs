//! WebSocket broadcaster (§4.13, §5): a process-global connection registry
//! guarded by a lock (mirrors the teacher's `Arc<RwLock<State>>` state
//! managers), with a bounded, drop-oldest-on-overflow queue per client so a
//! slow client can never block a fast one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use shared::events::BroadcastEvent;
use tokio::sync::Notify;
use tracing::warn;

const CLIENT_QUEUE_CAPACITY: usize = 64;

/// Per-client delivery queue. FIFO in enqueue order; overflow drops the
/// oldest pending event and logs a warning rather than blocking the
/// publisher.
pub struct ClientQueue {
    pending: Mutex<VecDeque<Value>>,
    notify: Notify,
}

impl ClientQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(CLIENT_QUEUE_CAPACITY)),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: Value) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= CLIENT_QUEUE_CAPACITY {
            pending.pop_front();
            warn!("websocket client queue full, dropping oldest event");
        }
        pending.push_back(event);
        drop(pending);
        self.notify.notify_one();
    }

    /// Awaits the next event for this client. Cancel-safe: if the future is
    /// dropped before completion, no event is lost.
    pub async fn recv(&self) -> Value {
        loop {
            if let Some(event) = self.pending.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

pub type ClientId = u64;

/// Process-global registry of connected WebSocket clients (§5 "Shared
/// resources"). Broadcasting iterates a snapshot of the registry so a
/// client connecting or disconnecting mid-broadcast never deadlocks it.
#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<HashMap<ClientId, Arc<ClientQueue>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (ClientId, Arc<ClientQueue>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ClientQueue::new());
        self.clients.write().unwrap().insert(id, queue.clone());
        (id, queue)
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.write().unwrap().remove(&id);
    }

    /// Enqueues `event` onto every connected client's queue. Never blocks on
    /// client I/O: this is the non-blocking handoff the controller relies on
    /// so a write use-case's HTTP response is never held up by broadcast.
    pub fn publish(&self, event: BroadcastEvent, source_user_name: Option<String>) {
        let envelope = event.into_envelope(source_user_name);
        let snapshot: Vec<Arc<ClientQueue>> = self.clients.read().unwrap().values().cloned().collect();
        for client in snapshot {
            client.push(envelope.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_client_receives_published_event() {
        let broadcaster = Broadcaster::new();
        let (_id, queue) = broadcaster.register();
        broadcaster.publish(
            BroadcastEvent::TaskDeleted {
                task_id: 1,
                task_name: "t".to_string(),
            },
            None,
        );
        let event = queue.recv().await;
        assert_eq!(event["type"], "task_deleted");
    }

    #[tokio::test]
    async fn unregistered_client_does_not_receive_events() {
        let broadcaster = Broadcaster::new();
        let (id, queue) = broadcaster.register();
        broadcaster.unregister(id);
        broadcaster.publish(
            BroadcastEvent::TaskDeleted {
                task_id: 1,
                task_name: "t".to_string(),
            },
            None,
        );
        assert!(queue.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn overflow_drops_oldest_event() {
        let queue = ClientQueue::new();
        for i in 0..CLIENT_QUEUE_CAPACITY + 5 {
            queue.push(serde_json::json!({ "n": i }));
        }
        let pending = queue.pending.lock().unwrap();
        assert_eq!(pending.len(), CLIENT_QUEUE_CAPACITY);
        assert_eq!(pending.front().unwrap()["n"], 5);
    }
}
