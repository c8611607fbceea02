use ledgercal_core::db::{open_db, open_db_in_memory};
use ledgercal_core::queue::{BrokerConfig, QueuePublisher};
use ledgercal_core::service::prediction_service::QUEUE_UNAVAILABLE_MESSAGE;
use ledgercal_core::{
    LedgerError, LedgerService, Money, PredictionService, PredictionStatus, SubmitError,
    TaskEnvelope, TaskPublisher, TransactionKind,
};
use rusqlite::Connection;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct RecordingPublisher {
    sent: Vec<TaskEnvelope>,
    reject: bool,
}

impl TaskPublisher for RecordingPublisher {
    fn publish(&mut self, envelope: &TaskEnvelope) -> bool {
        if self.reject {
            return false;
        }
        self.sent.push(envelope.clone());
        true
    }
}

fn funded_account(conn: &Connection, major: i64) -> Uuid {
    let ledger = LedgerService::new(conn);
    let account = ledger.open_account().unwrap();
    ledger
        .deposit(account.id, Money::from_major(major), None)
        .unwrap();
    account.id
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn submit_charges_records_and_publishes() {
    let conn = open_db_in_memory().unwrap();
    let account_id = funded_account(&conn, 100);
    let mut publisher = RecordingPublisher::default();

    let record = PredictionService::new(&conn, &mut publisher)
        .submit_text(account_id, "  Создай встречу завтра в 15:00 ")
        .unwrap();

    assert_eq!(record.status, PredictionStatus::Pending);
    assert!(record.output_data.is_none());
    assert_eq!(record.input_data, "Создай встречу завтра в 15:00");

    let ledger = LedgerService::new(&conn);
    assert_eq!(ledger.balance(account_id).unwrap(), Money::from_major(90));
    let charge = &ledger.list_transactions(account_id, 1).unwrap()[0];
    assert_eq!(charge.kind, TransactionKind::Withdrawal);
    assert_eq!(charge.amount, Money::from_major(10));
    assert_eq!(
        charge.description.as_deref(),
        Some(format!("Оплата предсказания #{}", record.id).as_str())
    );

    assert_eq!(publisher.sent.len(), 1);
    let sent = &publisher.sent[0];
    assert_eq!(sent.prediction_id, record.id.to_string());
    assert_eq!(sent.user_id, account_id.to_string());
    assert_eq!(Some(sent.task_id.clone()), record.task_id.map(|id| id.to_string()));
    assert_eq!(sent.task_type, "text_to_command");
}

#[test]
fn insufficient_funds_leaves_no_record_and_no_charge() {
    let conn = open_db_in_memory().unwrap();
    let account_id = funded_account(&conn, 5);
    let mut publisher = RecordingPublisher::default();

    let err = PredictionService::new(&conn, &mut publisher)
        .submit_text(account_id, "покажи события")
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Ledger(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(count(&conn, "predictions"), 0);
    assert_eq!(count(&conn, "ledger_transactions"), 1);
    assert!(publisher.sent.is_empty());
}

#[test]
fn unknown_account_and_blank_text_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let mut publisher = RecordingPublisher::default();
    let mut service = PredictionService::new(&conn, &mut publisher);

    assert!(matches!(
        service.submit_text(Uuid::new_v4(), "покажи события"),
        Err(SubmitError::Ledger(LedgerError::AccountNotFound(_)))
    ));
    assert!(matches!(
        service.submit_text(Uuid::new_v4(), "   "),
        Err(SubmitError::EmptyInput)
    ));
    drop(service);
    assert_eq!(count(&conn, "predictions"), 0);
}

#[test]
fn publish_failure_refunds_and_fails_the_record() {
    let conn = open_db_in_memory().unwrap();
    let account_id = funded_account(&conn, 30);
    let mut publisher = RecordingPublisher {
        reject: true,
        ..RecordingPublisher::default()
    };
    let mut service = PredictionService::new(&conn, &mut publisher);

    let (prediction_id, refund) = match service.submit_text(account_id, "Создай встречу") {
        Err(SubmitError::QueuePublishFailure {
            prediction_id,
            refund,
        }) => (prediction_id, refund),
        other => panic!("unexpected result: {other:?}"),
    };

    let refund = refund.expect("refund should be recorded");
    assert_eq!(refund.kind, TransactionKind::Deposit);
    assert_eq!(refund.amount, Money::from_major(10));
    assert_eq!(refund.balance_after, Money::from_major(30));

    let record = service.get_prediction(prediction_id).unwrap().unwrap();
    assert_eq!(record.status, PredictionStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(QUEUE_UNAVAILABLE_MESSAGE));

    let ledger = LedgerService::new(&conn);
    assert_eq!(ledger.balance(account_id).unwrap(), Money::from_major(30));
    assert!(ledger.audit(account_id).unwrap().is_consistent());
}

#[test]
fn real_publisher_failure_is_compensated() {
    let conn = open_db_in_memory().unwrap();
    let account_id = funded_account(&conn, 10);
    let dir = tempfile::tempdir().unwrap();
    let publisher = QueuePublisher::new(BrokerConfig::new(
        dir.path().join("no-such-dir").join("broker.db"),
    ));

    let err = PredictionService::new(&conn, publisher)
        .submit_text(account_id, "покажи события")
        .unwrap_err();

    assert!(matches!(err, SubmitError::QueuePublishFailure { .. }));
    assert_eq!(
        LedgerService::new(&conn).balance(account_id).unwrap(),
        Money::from_major(10)
    );
}

#[test]
fn history_is_newest_first_and_bounded() {
    let conn = open_db_in_memory().unwrap();
    let account_id = funded_account(&conn, 1_000);
    let other_account = funded_account(&conn, 1_000);
    let mut publisher = RecordingPublisher::default();
    let mut service =
        PredictionService::new(&conn, &mut publisher).with_cost(Money::from_minor(150));
    assert_eq!(service.cost(), Money::from_minor(150));

    for index in 0..5 {
        service
            .submit_text(account_id, &format!("покажи события {index}"))
            .unwrap();
    }
    service.submit_text(other_account, "чужой запрос").unwrap();

    let history = service.history(account_id, 3).unwrap();
    let inputs: Vec<&str> = history.iter().map(|r| r.input_data.as_str()).collect();
    assert_eq!(
        inputs,
        vec!["покажи события 4", "покажи события 3", "покажи события 2"]
    );
    assert!(service.history(account_id, 0).unwrap().is_empty());
    assert_eq!(service.history(account_id, 20).unwrap().len(), 5);

    let transactions = service.transactions(account_id, 2).unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].amount, Money::from_minor(150));

    let stats = service.statistics(account_id).unwrap();
    assert_eq!(stats.total_records, 5);
    assert_eq!(stats.completed_records, 0);
}

#[test]
fn charge_waiting_on_write_lock_is_stamped_after_earlier_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let account_id = {
        let conn = open_db(&path).unwrap();
        funded_account(&conn, 100)
    };

    for _ in 0..3 {
        let blocker = open_db(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let submit_path = path.clone();
        let submitter = thread::spawn(move || {
            let conn = open_db(&submit_path).unwrap();
            let mut publisher = RecordingPublisher::default();
            PredictionService::new(&conn, &mut publisher)
                .submit_text(account_id, "покажи события")
                .map(|record| record.id)
                .map_err(|err| err.to_string())
        });
        thread::sleep(Duration::from_millis(30));

        let deposit_path = path.clone();
        let depositor = thread::spawn(move || {
            let conn = open_db(&deposit_path).unwrap();
            LedgerService::new(&conn)
                .deposit(account_id, Money::from_major(1), None)
                .map(|entry| entry.id)
                .map_err(|err| err.to_string())
        });
        thread::sleep(Duration::from_millis(30));

        blocker.execute_batch("ROLLBACK;").unwrap();
        submitter.join().unwrap().unwrap();
        depositor.join().unwrap().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT kind, amount_minor, balance_after_minor FROM ledger_transactions
             WHERE account_id = ?1
             ORDER BY created_at ASC, seq ASC;",
        )
        .unwrap();
    let rows: Vec<(String, i64, i64)> = stmt
        .query_map([account_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(rows.len(), 7);

    let mut running = 0;
    for (kind, amount, balance_after) in rows {
        running += if kind == "withdrawal" { -amount } else { amount };
        assert_eq!(running, balance_after);
    }

    let ledger = LedgerService::new(&conn);
    let newest = &ledger.list_transactions(account_id, 1).unwrap()[0];
    assert_eq!(newest.balance_after, ledger.balance(account_id).unwrap());
}
