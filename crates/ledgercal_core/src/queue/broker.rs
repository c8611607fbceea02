//! File-backed broker storage.
//!
//! # Responsibility
//! - Open broker connections and declare the durable queue.
//! - Implement the message state machine: `ready` → `unacked` → removed,
//!   with `unacked` → `ready` on requeue or consumer reconnect.
//!
//! # Invariants
//! - Message bodies are written once and never modified.
//! - State changes on one message happen inside a single write transaction.

use crate::db::now_epoch_ms;
use crate::queue::{BrokerConfig, Delivery, QueueError, QueueResult};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

const BROKER_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS broker_queues (
    name TEXT PRIMARY KEY NOT NULL,
    durable INTEGER NOT NULL CHECK (durable IN (0, 1)),
    declared_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS broker_messages (
    delivery_tag INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL REFERENCES broker_queues(name),
    body TEXT NOT NULL,
    delivery_mode INTEGER NOT NULL CHECK (delivery_mode IN (1, 2)),
    state TEXT NOT NULL CHECK (state IN ('ready', 'unacked')),
    consumer_tag TEXT,
    redelivered INTEGER NOT NULL DEFAULT 0 CHECK (redelivered IN (0, 1)),
    published_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_broker_messages_queue_state
    ON broker_messages (queue, state, delivery_tag);
";

/// AMQP-style delivery mode recorded with each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Transient = 1,
    Persistent = 2,
}

/// Opens a broker connection and declares `config.queue` as durable.
pub fn connect(config: &BrokerConfig) -> QueueResult<Connection> {
    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(config.blocked_connection_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(BROKER_SCHEMA_SQL)?;
    declare_queue(&conn, &config.queue)?;
    Ok(conn)
}

/// Idempotently declares a durable queue.
pub fn declare_queue(conn: &Connection, queue: &str) -> QueueResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO broker_queues (name, durable, declared_at)
         VALUES (?1, 1, ?2);",
        params![queue, now_epoch_ms()],
    )?;
    Ok(())
}

/// Appends a message to `queue` and returns its delivery tag.
pub fn enqueue(
    conn: &Connection,
    queue: &str,
    body: &str,
    mode: DeliveryMode,
) -> QueueResult<u64> {
    conn.execute(
        "INSERT INTO broker_messages (queue, body, delivery_mode, state, published_at)
         VALUES (?1, ?2, ?3, 'ready', ?4);",
        params![queue, body, mode as i64, now_epoch_ms()],
    )?;
    tag_from_rowid(conn.last_insert_rowid())
}

/// Claims the oldest ready message of `queue` for `consumer_tag`.
pub fn claim_next(
    conn: &mut Connection,
    queue: &str,
    consumer_tag: &str,
) -> QueueResult<Option<Delivery>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let next = tx
        .query_row(
            "SELECT delivery_tag, body, redelivered
             FROM broker_messages
             WHERE queue = ?1
               AND state = 'ready'
             ORDER BY delivery_tag ASC
             LIMIT 1;",
            [queue],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((rowid, body, redelivered)) = next else {
        return Ok(None);
    };
    tx.execute(
        "UPDATE broker_messages
         SET state = 'unacked', consumer_tag = ?2
         WHERE delivery_tag = ?1;",
        params![rowid, consumer_tag],
    )?;
    tx.commit()?;

    Ok(Some(Delivery {
        delivery_tag: tag_from_rowid(rowid)?,
        body,
        redelivered: redelivered == 1,
    }))
}

/// Deletes an unacknowledged message held by `consumer_tag`.
pub fn ack(conn: &Connection, delivery_tag: u64, consumer_tag: &str) -> QueueResult<()> {
    let changed = conn.execute(
        "DELETE FROM broker_messages
         WHERE delivery_tag = ?1
           AND state = 'unacked'
           AND consumer_tag = ?2;",
        params![rowid_from_tag(delivery_tag)?, consumer_tag],
    )?;
    if changed == 0 {
        return Err(QueueError::UnknownDeliveryTag(delivery_tag));
    }
    Ok(())
}

/// Rejects an unacknowledged message: requeued as redelivered, or dropped.
pub fn reject(
    conn: &Connection,
    delivery_tag: u64,
    consumer_tag: &str,
    requeue: bool,
) -> QueueResult<()> {
    let rowid = rowid_from_tag(delivery_tag)?;
    let changed = if requeue {
        conn.execute(
            "UPDATE broker_messages
             SET state = 'ready', consumer_tag = NULL, redelivered = 1
             WHERE delivery_tag = ?1
               AND state = 'unacked'
               AND consumer_tag = ?2;",
            params![rowid, consumer_tag],
        )?
    } else {
        conn.execute(
            "DELETE FROM broker_messages
             WHERE delivery_tag = ?1
               AND state = 'unacked'
               AND consumer_tag = ?2;",
            params![rowid, consumer_tag],
        )?
    };
    if changed == 0 {
        return Err(QueueError::UnknownDeliveryTag(delivery_tag));
    }
    Ok(())
}

/// Returns every unacknowledged message of `queue` to `ready`, flagged as
/// redelivered. Called when a consumer (re)connects: with a single consumer
/// per queue, anything still unacked belongs to a consumer that went away.
pub fn recover_unacked(conn: &Connection, queue: &str) -> QueueResult<usize> {
    let recovered = conn.execute(
        "UPDATE broker_messages
         SET state = 'ready', consumer_tag = NULL, redelivered = 1
         WHERE queue = ?1
           AND state = 'unacked';",
        [queue],
    )?;
    if recovered > 0 {
        info!(
            "event=broker_recover module=queue status=ok queue={} recovered={}",
            queue, recovered
        );
    }
    Ok(recovered)
}

/// Messages waiting in `queue`, ready or unacknowledged.
pub fn queue_depth(conn: &Connection, queue: &str) -> QueueResult<u64> {
    let depth: i64 = conn.query_row(
        "SELECT COUNT(*) FROM broker_messages WHERE queue = ?1;",
        [queue],
        |row| row.get(0),
    )?;
    Ok(depth.max(0).unsigned_abs())
}

fn tag_from_rowid(rowid: i64) -> QueueResult<u64> {
    u64::try_from(rowid).map_err(|_| QueueError::UnknownDeliveryTag(0))
}

fn rowid_from_tag(tag: u64) -> QueueResult<i64> {
    i64::try_from(tag).map_err(|_| QueueError::UnknownDeliveryTag(tag))
}
