//! Operator CLI over `ledgercal_core`.
//!
//! # Responsibility
//! - Expose account, submission and history operations from the shell.
//! - Run the task worker in the foreground.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledgercal_core::queue::QueueConsumer;
use ledgercal_core::worker::runner::run_worker_loop;
use ledgercal_core::{
    init_logging, open_db, CommandParser, LedgerService, Money, PipelineConfig, PredictionService,
    QueuePublisher, TaskWorker, HISTORY_DEFAULT_LIMIT,
};
use log::info;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ledgercal")]
#[command(about = "Ledger-backed text-to-command pipeline", long_about = None)]
struct Cli {
    /// Ledger database file
    #[arg(long, global = true, env = "LEDGERCAL_DB_PATH")]
    db: Option<PathBuf>,
    /// Broker database file
    #[arg(long, global = true, env = "LEDGERCAL_BROKER_PATH")]
    broker: Option<PathBuf>,
    /// Queue name
    #[arg(long, global = true, env = "LEDGERCAL_QUEUE")]
    queue: Option<String>,
    /// Absolute directory for log files; logging is off when unset
    #[arg(long, global = true, env = "LEDGERCAL_LOG_DIR")]
    log_dir: Option<PathBuf>,
    #[arg(long, global = true, env = "LEDGERCAL_LOG_LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the ledger database
    InitDb,
    /// Open a new account at zero balance
    OpenAccount,
    /// Credit an account
    Deposit {
        account: Uuid,
        amount: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Debit an account
    Withdraw {
        account: Uuid,
        amount: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show the current balance
    Balance { account: Uuid },
    /// Replay the transaction log against stored balances
    Audit { account: Uuid },
    /// Pay for and enqueue a text-to-command prediction
    Submit { account: Uuid, text: String },
    /// Prediction history, newest first
    Predictions {
        account: Uuid,
        #[arg(long, default_value_t = HISTORY_DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Transaction history, newest first
    Transactions {
        account: Uuid,
        #[arg(long, default_value_t = HISTORY_DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Prediction statistics
    Stats { account: Uuid },
    /// Run the parser without charging or queueing
    Parse { text: String },
    /// Consume the task queue
    Worker {
        /// Exit once the queue is empty
        #[arg(long)]
        drain: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    if let Some(logging) = config.logging_config() {
        let logging = logging.with_stderr(matches!(cli.command, Commands::Worker { .. }));
        init_logging(&logging).context("failed to initialize logging")?;
    }

    match cli.command {
        Commands::InitDb => {
            open_db(&config.db_path)
                .with_context(|| format!("failed to open {}", config.db_path.display()))?;
            println!("database ready at {}", config.db_path.display());
        }
        Commands::OpenAccount => {
            let conn = open_db(&config.db_path)?;
            let account = LedgerService::new(&conn).open_account()?;
            println!("{}", account.id);
        }
        Commands::Deposit {
            account,
            amount,
            description,
        } => {
            let conn = open_db(&config.db_path)?;
            let entry = LedgerService::new(&conn).deposit(
                account,
                parse_amount(&amount)?,
                description.as_deref(),
            )?;
            println!("{} balance={}", entry.id, entry.balance_after);
        }
        Commands::Withdraw {
            account,
            amount,
            description,
        } => {
            let conn = open_db(&config.db_path)?;
            let entry = LedgerService::new(&conn).withdraw(
                account,
                parse_amount(&amount)?,
                description.as_deref(),
            )?;
            println!("{} balance={}", entry.id, entry.balance_after);
        }
        Commands::Balance { account } => {
            let conn = open_db(&config.db_path)?;
            println!("{}", LedgerService::new(&conn).balance(account)?);
        }
        Commands::Audit { account } => {
            let conn = open_db(&config.db_path)?;
            let audit = LedgerService::new(&conn).audit(account)?;
            println!(
                "transactions={} replayed={} current={} consistent={}",
                audit.transaction_count,
                audit.replayed_balance,
                audit.current_balance,
                audit.is_consistent()
            );
            if !audit.is_consistent() {
                bail!("ledger audit failed for account {account}");
            }
        }
        Commands::Submit { account, text } => {
            let conn = open_db(&config.db_path)?;
            let publisher = QueuePublisher::new(config.broker_config());
            let mut service =
                PredictionService::new(&conn, publisher).with_cost(config.prediction_cost);
            let record = service.submit_text(account, &text)?;
            println!("{} status={}", record.id, record.status.as_str());
        }
        Commands::Predictions { account, limit } => {
            let conn = open_db(&config.db_path)?;
            let publisher = QueuePublisher::new(config.broker_config());
            for record in PredictionService::new(&conn, publisher).history(account, limit)? {
                println!(
                    "{} {} confidence={} input={:?} output={}",
                    record.id,
                    record.status.as_str(),
                    record
                        .confidence
                        .map_or_else(|| "-".to_string(), |value| value.to_string()),
                    record.input_data,
                    record.output_data.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Transactions { account, limit } => {
            let conn = open_db(&config.db_path)?;
            for entry in LedgerService::new(&conn).list_transactions(account, limit)? {
                println!(
                    "{} {} {} balance_after={} {}",
                    entry.id,
                    entry.kind.as_str(),
                    entry.amount,
                    entry.balance_after,
                    entry.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::Stats { account } => {
            let conn = open_db(&config.db_path)?;
            let publisher = QueuePublisher::new(config.broker_config());
            let stats = PredictionService::new(&conn, publisher).statistics(account)?;
            println!(
                "total={} completed={} failed={} average_confidence={:.2} models={}",
                stats.total_records,
                stats.completed_records,
                stats.failed_records,
                stats.average_confidence,
                stats.models_used.join(",")
            );
        }
        Commands::Parse { text } => {
            let parsed = CommandParser::new().parse(&text)?;
            println!("{}", parsed.to_json()?);
        }
        Commands::Worker { drain } => {
            let conn = open_db(&config.db_path)?;
            let mut consumer = QueueConsumer::new(config.broker_config());
            consumer.connect()?;
            let mut worker = TaskWorker::new(conn, consumer);
            if drain {
                let outcomes = worker.drain()?;
                println!("processed={}", outcomes.len());
            } else {
                info!(
                    "event=worker_run module=cli status=start queue={}",
                    config.queue_name
                );
                let stop = AtomicBool::new(false);
                run_worker_loop(&mut worker, &stop, config.poll_interval, config.heartbeat);
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(broker) = &cli.broker {
        config.broker_path = broker.clone();
    }
    if let Some(queue) = &cli.queue {
        config.queue_name = queue.clone();
    }
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn parse_amount(value: &str) -> Result<Money> {
    match Money::parse_decimal(value) {
        Some(amount) => Ok(amount),
        None => bail!("invalid amount `{value}`; expected e.g. 100 or 12.50"),
    }
}
