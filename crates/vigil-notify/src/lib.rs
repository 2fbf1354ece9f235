pub mod adapter;
pub mod dispatcher;
pub mod providers;
pub mod queue;
pub mod subscriber;

pub use adapter::{ChannelAdapter, DeliveryResult};
pub use dispatcher::{DispatchStats, NotificationDispatcher};
pub use providers::{ConsoleAdapter, EmailAdapter, EmailConfig, WebhookAdapter, WebhookConfig};
pub use queue::{DeliveryStatus, NotificationQueue, NotifyError, QueueItem};
pub use subscriber::{NotifyChannel, QuietHours, Subscriber, SubscriberDirectory};
