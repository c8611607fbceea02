//! Durable task queue: wire envelope, broker storage, publisher, consumer.
//!
//! # Responsibility
//! - Carry `TaskEnvelope`s from the request path to the worker.
//! - Provide at-least-once delivery with explicit ack/nack.
//!
//! # Invariants
//! - One named, durable queue; publishes target it directly.
//! - A consumer holds at most one unacknowledged delivery (prefetch 1).
//! - Unacknowledged deliveries are redelivered when a consumer reconnects.

pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod publisher;

pub use consumer::QueueConsumer;
pub use envelope::{RawTaskEnvelope, TaskEnvelope, TEXT_TO_COMMAND_TASK};
pub use publisher::QueuePublisher;

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub type QueueResult<T> = Result<T, QueueError>;

/// Default queue name shared by publisher and worker.
pub const DEFAULT_QUEUE_NAME: &str = "ml_tasks";
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(600);
pub const DEFAULT_BLOCKED_CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum QueueError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    NotConnected,
    /// A second delivery was requested while one is still unacknowledged.
    PrefetchExceeded { in_flight: u64 },
    UnknownDeliveryTag(u64),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "broker storage error: {err}"),
            Self::Serialization(err) => write!(f, "envelope serialization error: {err}"),
            Self::NotConnected => write!(f, "broker connection is not open"),
            Self::PrefetchExceeded { in_flight } => write!(
                f,
                "delivery {in_flight} is still unacknowledged; prefetch limit is 1"
            ),
            Self::UnknownDeliveryTag(tag) => write!(f, "unknown delivery tag {tag}"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker database file.
    pub path: PathBuf,
    pub queue: String,
    /// Idle liveness interval for consumers.
    pub heartbeat: Duration,
    /// How long a connection waits on a locked broker before failing.
    pub blocked_connection_timeout: Duration,
}

impl BrokerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            queue: DEFAULT_QUEUE_NAME.to_string(),
            heartbeat: DEFAULT_HEARTBEAT,
            blocked_connection_timeout: DEFAULT_BLOCKED_CONNECTION_TIMEOUT,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: String,
    /// Set when the message was handed out before and never acknowledged.
    pub redelivered: bool,
}

/// Publish side of the queue.
pub trait TaskPublisher {
    /// Enqueues one envelope with persistent delivery.
    ///
    /// Returns `false` on any transport failure; never panics or raises.
    fn publish(&mut self, envelope: &TaskEnvelope) -> bool;
}

/// Consume side of the queue.
pub trait TaskConsumer {
    /// Takes the next ready message, if any, without blocking.
    fn receive(&mut self) -> QueueResult<Option<Delivery>>;
    /// Removes an acknowledged message for good.
    fn ack(&mut self, delivery_tag: u64) -> QueueResult<()>;
    /// Rejects a message; with `requeue == false` it is dropped.
    fn nack(&mut self, delivery_tag: u64, requeue: bool) -> QueueResult<()>;
}

impl<T: TaskPublisher + ?Sized> TaskPublisher for &mut T {
    fn publish(&mut self, envelope: &TaskEnvelope) -> bool {
        (**self).publish(envelope)
    }
}
