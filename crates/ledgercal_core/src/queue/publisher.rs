//! Publish side of the task queue.
//!
//! # Invariants
//! - The connection opens lazily on the first publish, or explicitly via
//!   `connect`.
//! - A failed publish closes the connection; the next publish reconnects.
//! - `publish` reports failure through its return value only.

use crate::queue::broker::{self, DeliveryMode};
use crate::queue::{BrokerConfig, QueueError, QueueResult, TaskEnvelope, TaskPublisher};
use log::{error, info};
use rusqlite::Connection;

/// Broker client used by the request path.
pub struct QueuePublisher {
    config: BrokerConfig,
    conn: Option<Connection>,
}

impl QueuePublisher {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config, conn: None }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the broker connection if it is not open yet.
    pub fn connect(&mut self) -> QueueResult<()> {
        if self.conn.is_none() {
            self.conn = Some(broker::connect(&self.config)?);
            info!(
                "event=queue_connect module=queue status=ok role=publisher queue={}",
                self.config.queue
            );
        }
        Ok(())
    }

    /// Closes the broker connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                error!(
                    "event=queue_close module=queue status=error role=publisher error={}",
                    err
                );
            }
        }
    }

    fn try_publish(&mut self, envelope: &TaskEnvelope) -> QueueResult<u64> {
        self.connect()?;
        let body = envelope.to_json()?;
        let conn = self.conn.as_ref().ok_or(QueueError::NotConnected)?;
        broker::enqueue(conn, &self.config.queue, &body, DeliveryMode::Persistent)
    }
}

impl TaskPublisher for QueuePublisher {
    fn publish(&mut self, envelope: &TaskEnvelope) -> bool {
        match self.try_publish(envelope) {
            Ok(delivery_tag) => {
                info!(
                    "event=task_publish module=queue status=ok queue={} task_id={} delivery_tag={}",
                    self.config.queue, envelope.task_id, delivery_tag
                );
                true
            }
            Err(err) => {
                error!(
                    "event=task_publish module=queue status=error queue={} task_id={} error_code=publish_failed error={}",
                    self.config.queue, envelope.task_id, err
                );
                self.close();
                false
            }
        }
    }
}

impl Drop for QueuePublisher {
    fn drop(&mut self) {
        self.close();
    }
}
