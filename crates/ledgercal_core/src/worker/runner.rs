//! Background worker thread under the `Service` lifecycle.

use crate::db::{now_epoch_ms, open_db};
use crate::parser::CommandParser;
use crate::queue::{BrokerConfig, QueueConsumer, TaskConsumer};
use crate::service::lifecycle::{Service, ServiceStatus};
use crate::worker::task_worker::TaskWorker;
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default sleep between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const SERVICE_NAME: &str = "task_worker";

/// Runs `worker` until `stop` is set.
///
/// Sleeps `poll_interval` whenever the queue is empty and logs a liveness
/// line every `heartbeat` of idleness. Broker errors close the cycle and are
/// retried after `poll_interval`.
pub fn run_worker_loop<C: TaskConsumer>(
    worker: &mut TaskWorker<C>,
    stop: &AtomicBool,
    poll_interval: Duration,
    heartbeat: Duration,
) {
    let mut last_heartbeat = Instant::now();
    let mut processed: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        match worker.run_once() {
            Ok(outcome) if outcome.is_idle() => {
                if last_heartbeat.elapsed() >= heartbeat {
                    info!(
                        "event=worker_heartbeat module=worker status=ok processed={}",
                        processed
                    );
                    last_heartbeat = Instant::now();
                }
                std::thread::sleep(poll_interval);
            }
            Ok(_) => {
                processed += 1;
                last_heartbeat = Instant::now();
            }
            Err(err) => {
                error!(
                    "event=worker_cycle module=worker status=error error={}",
                    err
                );
                std::thread::sleep(poll_interval);
            }
        }
    }

    info!(
        "event=worker_stop module=worker status=ok processed={}",
        processed
    );
}

/// Owns the worker thread for one database and broker.
pub struct WorkerService {
    db_path: PathBuf,
    broker: BrokerConfig,
    poll_interval: Duration,
    parser_factory: fn() -> CommandParser,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    started_at: Option<i64>,
}

impl WorkerService {
    pub fn new(db_path: impl Into<PathBuf>, broker: BrokerConfig) -> Self {
        Self {
            db_path: db_path.into(),
            broker,
            poll_interval: DEFAULT_POLL_INTERVAL,
            parser_factory: CommandParser::new,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            started_at: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides how the worker thread builds its parser.
    pub fn with_parser_factory(mut self, factory: fn() -> CommandParser) -> Self {
        self.parser_factory = factory;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn spawn(&mut self) -> Result<JoinHandle<()>, String> {
        let conn = open_db(&self.db_path).map_err(|err| err.to_string())?;
        let mut consumer = QueueConsumer::new(self.broker.clone());
        consumer.connect().map_err(|err| err.to_string())?;

        let mut worker = TaskWorker::new(conn, consumer).with_parser((self.parser_factory)());
        let stop = Arc::clone(&self.stop);
        let poll_interval = self.poll_interval;
        let heartbeat = self.broker.heartbeat;

        std::thread::Builder::new()
            .name(SERVICE_NAME.to_string())
            .spawn(move || run_worker_loop(&mut worker, &stop, poll_interval, heartbeat))
            .map_err(|err| err.to_string())
    }
}

impl Service for WorkerService {
    fn start(&mut self) -> bool {
        if self.handle.is_some() {
            return false;
        }
        self.stop.store(false, Ordering::SeqCst);
        match self.spawn() {
            Ok(handle) => {
                self.handle = Some(handle);
                self.started_at = Some(now_epoch_ms());
                info!(
                    "event=service_start module=worker status=ok name={} queue={}",
                    SERVICE_NAME, self.broker.queue
                );
                true
            }
            Err(err) => {
                error!(
                    "event=service_start module=worker status=error name={} error={}",
                    SERVICE_NAME, err
                );
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        self.stop.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            error!(
                "event=service_stop module=worker status=error name={} error=worker_thread_panicked",
                SERVICE_NAME
            );
        }
        self.started_at = None;
        info!(
            "event=service_stop module=worker status=ok name={}",
            SERVICE_NAME
        );
        true
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: SERVICE_NAME.to_string(),
            running: self.is_running(),
            started_at: self.started_at,
        }
    }

    fn name(&self) -> &str {
        SERVICE_NAME
    }
}

impl Drop for WorkerService {
    fn drop(&mut self) {
        self.stop();
    }
}
