//! Consume side of the task queue.

use crate::queue::broker;
use crate::queue::{BrokerConfig, Delivery, QueueError, QueueResult, TaskConsumer};
use log::{error, info, warn};
use rusqlite::Connection;
use uuid::Uuid;

/// Single consumer with a prefetch window of one message.
pub struct QueueConsumer {
    config: BrokerConfig,
    consumer_tag: String,
    conn: Option<Connection>,
    in_flight: Option<u64>,
}

impl QueueConsumer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            consumer_tag: format!("consumer-{}", Uuid::new_v4()),
            conn: None,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Opens the connection and requeues anything left unacknowledged by a
    /// previous consumer.
    pub fn connect(&mut self) -> QueueResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = broker::connect(&self.config)?;
        let recovered = broker::recover_unacked(&conn, &self.config.queue)?;
        info!(
            "event=queue_connect module=queue status=ok role=consumer queue={} consumer_tag={} recovered={}",
            self.config.queue, self.consumer_tag, recovered
        );
        self.conn = Some(conn);
        self.in_flight = None;
        Ok(())
    }

    /// Closes the connection. An unacknowledged delivery stays unacked in the
    /// broker and is redelivered to the next consumer.
    pub fn close(&mut self) {
        if let Some(tag) = self.in_flight.take() {
            warn!(
                "event=queue_close module=queue status=skip role=consumer delivery_tag={} reason=unacked_on_close",
                tag
            );
        }
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                error!(
                    "event=queue_close module=queue status=error role=consumer error={}",
                    err
                );
            }
        }
    }

    fn settle(&mut self, delivery_tag: u64) -> QueueResult<&Connection> {
        if self.in_flight != Some(delivery_tag) {
            return Err(QueueError::UnknownDeliveryTag(delivery_tag));
        }
        self.in_flight = None;
        self.conn.as_ref().ok_or(QueueError::NotConnected)
    }
}

impl TaskConsumer for QueueConsumer {
    fn receive(&mut self) -> QueueResult<Option<Delivery>> {
        if let Some(in_flight) = self.in_flight {
            return Err(QueueError::PrefetchExceeded { in_flight });
        }
        self.connect()?;
        let conn = self.conn.as_mut().ok_or(QueueError::NotConnected)?;
        let delivery = broker::claim_next(conn, &self.config.queue, &self.consumer_tag)?;
        if let Some(delivery) = &delivery {
            self.in_flight = Some(delivery.delivery_tag);
        }
        Ok(delivery)
    }

    fn ack(&mut self, delivery_tag: u64) -> QueueResult<()> {
        let consumer_tag = self.consumer_tag.clone();
        let conn = self.settle(delivery_tag)?;
        broker::ack(conn, delivery_tag, &consumer_tag)
    }

    fn nack(&mut self, delivery_tag: u64, requeue: bool) -> QueueResult<()> {
        let consumer_tag = self.consumer_tag.clone();
        let conn = self.settle(delivery_tag)?;
        broker::reject(conn, delivery_tag, &consumer_tag, requeue)
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        self.close();
    }
}
