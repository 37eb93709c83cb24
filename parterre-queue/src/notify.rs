use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parterre_store::RedisClient;
use tracing::{error, info, warn};

use crate::hub::{Notification, NotificationHub};
use crate::queue::QueueError;

pub fn request_channel(request_id: &str) -> String {
    format!("notify:request:{request_id}")
}

pub fn user_channel(user_id: &str) -> String {
    format!("notify:user:{user_id}")
}

/// Publishes notifications through the shared store so every API instance's
/// hub sees them, wherever the worker ran.
#[derive(Clone)]
pub struct NotificationPublisher {
    redis: Arc<RedisClient>,
}

impl NotificationPublisher {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    pub async fn publish(&self, notification: &Notification) -> Result<(), QueueError> {
        let payload = serde_json::to_string(notification).map_err(|e| QueueError::Malformed {
            id: notification.request_id.clone(),
            reason: e.to_string(),
        })?;
        // The bridge fans the request channel out to both listener maps;
        // the user channel exists for external subscribers.
        self.redis.publish(&request_channel(&notification.request_id), &payload).await?;
        self.redis.publish(&user_channel(&notification.user_id), &payload).await?;
        Ok(())
    }
}

/// Long-running subscriber: receives worker notifications from the shared
/// store and fans them out to this instance's in-process hub. Reconnects on
/// any subscription failure.
pub async fn run_notification_bridge(redis: Arc<RedisClient>, hub: Arc<NotificationHub>) {
    info!("notification bridge started");
    loop {
        match subscribe_and_pump(&redis, &hub).await {
            Ok(()) => warn!("notification subscription ended, reconnecting"),
            Err(e) => error!(error = %e, "notification bridge lost its subscription"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn subscribe_and_pump(
    redis: &Arc<RedisClient>,
    hub: &Arc<NotificationHub>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = redis.pubsub().await?;
    pubsub.psubscribe("notify:request:*").await?;

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "undecodable pub/sub payload");
                continue;
            }
        };
        match serde_json::from_str::<Notification>(&payload) {
            Ok(notification) => {
                hub.publish(&notification);
            }
            Err(e) => warn!(error = %e, "unparseable notification payload"),
        }
    }
    Ok(())
}
