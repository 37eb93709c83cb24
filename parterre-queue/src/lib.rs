pub mod hub;
pub mod notify;
pub mod queue;
pub mod service;
pub mod status;
pub mod worker;

pub use hub::{ListenerHandle, Notification, NotificationHub, NotificationKind};
pub use notify::{request_channel, run_notification_bridge, user_channel, NotificationPublisher};
pub use queue::{PriorityQueue, QueueError, QueueMessage, QueueStats, CONSUMER_GROUP};
pub use service::{QueueService, ServiceError};
pub use status::{RequestRecord, StatusError, StatusStore};
pub use worker::{QueueWorker, Throughput, WorkerManager};
