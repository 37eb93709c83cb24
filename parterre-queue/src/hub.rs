use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Buffered messages per listener before it is considered too slow to keep.
const LISTENER_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusUpdate,
    ReservationComplete,
    ReservationFailed,
    ReservationCancelled,
}

/// One live message about a queued request, fanned out to WebSocket
/// listeners. `data` carries the request-status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub request_id: String,
    pub user_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Request,
    User,
}

struct ListenerEntry {
    id: Uuid,
    tx: mpsc::Sender<Notification>,
}

#[derive(Default)]
struct Registry {
    by_request: HashMap<String, Vec<ListenerEntry>>,
    by_user: HashMap<String, Vec<ListenerEntry>>,
}

impl Registry {
    fn bucket(&mut self, target: Target) -> &mut HashMap<String, Vec<ListenerEntry>> {
        match target {
            Target::Request => &mut self.by_request,
            Target::User => &mut self.by_user,
        }
    }

    fn remove(&mut self, target: Target, key: &str, id: Uuid) {
        let bucket = self.bucket(target);
        if let Some(entries) = bucket.get_mut(key) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                bucket.remove(key);
            }
        }
    }
}

/// Dropping the handle deregisters the listener; explicit `cancel` does the
/// same and both are idempotent.
pub struct ListenerHandle {
    hub: Weak<NotificationHub>,
    target: Target,
    key: String,
    id: Uuid,
}

impl ListenerHandle {
    pub fn cancel(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.registry.lock().expect("hub lock poisoned").remove(self.target, &self.key, self.id);
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// In-process fan-out from request/user keys to live listeners. Delivery is
/// per-listener buffered and never blocks the publisher: a listener whose
/// buffer overflows is disconnected instead.
#[derive(Default)]
pub struct NotificationHub {
    registry: Mutex<Registry>,
}

impl NotificationHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe_request(
        self: &Arc<Self>,
        request_id: &str,
    ) -> (ListenerHandle, mpsc::Receiver<Notification>) {
        self.subscribe(Target::Request, request_id)
    }

    pub fn subscribe_user(self: &Arc<Self>, user_id: &str) -> (ListenerHandle, mpsc::Receiver<Notification>) {
        self.subscribe(Target::User, user_id)
    }

    fn subscribe(self: &Arc<Self>, target: Target, key: &str) -> (ListenerHandle, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let id = Uuid::new_v4();

        let mut registry = self.registry.lock().expect("hub lock poisoned");
        registry.bucket(target).entry(key.to_string()).or_default().push(ListenerEntry { id, tx });

        let handle = ListenerHandle { hub: Arc::downgrade(self), target, key: key.to_string(), id };
        (handle, rx)
    }

    /// Deliver to every listener matching the request id or the user id.
    /// Returns the number of listeners reached; slow listeners are dropped
    /// (their channel closes, which the socket loop reads as a
    /// SlowConsumer disconnect).
    pub fn publish(&self, notification: &Notification) -> usize {
        let mut registry = self.registry.lock().expect("hub lock poisoned");
        let mut delivered = 0;

        for (target, key) in [
            (Target::Request, notification.request_id.as_str()),
            (Target::User, notification.user_id.as_str()),
        ] {
            let bucket = registry.bucket(target);
            if let Some(entries) = bucket.get_mut(key) {
                entries.retain(|entry| match entry.tx.try_send(notification.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(key, "slow consumer disconnected from notification hub");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
                if entries.is_empty() {
                    bucket.remove(key);
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        let registry = self.registry.lock().expect("hub lock poisoned");
        registry.by_request.values().map(Vec::len).sum::<usize>()
            + registry.by_user.values().map(Vec::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(request_id: &str, user_id: &str) -> Notification {
        Notification {
            kind: NotificationKind::StatusUpdate,
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            data: serde_json::json!({"state": "pending"}),
        }
    }

    #[tokio::test]
    async fn test_fanout_to_request_and_user_listeners() {
        let hub = NotificationHub::new();
        let (_h1, mut by_request) = hub.subscribe_request("req-1");
        let (_h2, mut by_user) = hub.subscribe_user("u1");

        let delivered = hub.publish(&notification("req-1", "u1"));
        assert_eq!(delivered, 2);
        assert_eq!(by_request.recv().await.unwrap().request_id, "req-1");
        assert_eq!(by_user.recv().await.unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn test_unmatched_keys_deliver_nowhere() {
        let hub = NotificationHub::new();
        let (_h, _rx) = hub.subscribe_request("req-1");
        assert_eq!(hub.publish(&notification("req-2", "u2")), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_deregisters() {
        let hub = NotificationHub::new();
        let (handle, _rx) = hub.subscribe_request("req-1");
        assert_eq!(hub.listener_count(), 1);
        drop(handle);
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let hub = NotificationHub::new();
        let (handle, _rx) = hub.subscribe_request("req-1");
        handle.cancel();
        handle.cancel();
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_disconnected_without_blocking_others() {
        let hub = NotificationHub::new();
        let (_slow, slow_rx) = hub.subscribe_request("req-1");
        let (_fast, mut fast_rx) = hub.subscribe_user("u1");

        // Overflow the slow listener's buffer; the user listener keeps
        // draining.
        for _ in 0..(LISTENER_BUFFER + 1) {
            hub.publish(&notification("req-1", "nobody"));
        }
        let delivered = hub.publish(&notification("req-1", "u1"));
        assert_eq!(delivered, 1, "slow listener should be gone");
        assert_eq!(fast_rx.recv().await.unwrap().user_id, "u1");

        // The slow listener's channel closes once its sender is dropped.
        drop(slow_rx);
        assert_eq!(hub.listener_count(), 1);
    }
}
