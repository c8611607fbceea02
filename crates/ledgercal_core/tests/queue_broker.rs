use ledgercal_core::queue::broker::{self, queue_depth};
use ledgercal_core::queue::{
    BrokerConfig, QueueConsumer, QueueError, QueuePublisher, RawTaskEnvelope, TaskConsumer,
    TaskEnvelope, TaskPublisher,
};
use std::time::Duration;
use uuid::Uuid;

fn envelope(input: &str) -> TaskEnvelope {
    TaskEnvelope::text_to_command(Uuid::new_v4(), Uuid::new_v4(), input, Uuid::new_v4())
}

fn depth(config: &BrokerConfig) -> u64 {
    let conn = broker::connect(config).unwrap();
    queue_depth(&conn, &config.queue).unwrap()
}

#[test]
fn published_envelope_reaches_consumer_and_ack_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db"));
    let mut publisher = QueuePublisher::new(config.clone());
    assert!(!publisher.is_connected());

    let sent = envelope("Создай встречу завтра в 15:00");
    assert!(publisher.publish(&sent));
    assert!(publisher.is_connected());
    assert_eq!(depth(&config), 1);

    let mut consumer = QueueConsumer::new(config.clone());
    let delivery = consumer.receive().unwrap().unwrap();
    assert!(!delivery.redelivered);
    let body: serde_json::Value = serde_json::from_str(&delivery.body).unwrap();
    assert_eq!(body["task_type"], "text_to_command");
    assert_eq!(body["prediction_id"], sent.prediction_id.as_str());
    assert_eq!(
        RawTaskEnvelope::from_json(&delivery.body)
            .unwrap()
            .validate()
            .unwrap()
            .input_data,
        "Создай встречу завтра в 15:00"
    );

    consumer.ack(delivery.delivery_tag).unwrap();
    assert_eq!(depth(&config), 0);
    assert!(consumer.receive().unwrap().is_none());
}

#[test]
fn deliveries_are_fifo_with_prefetch_of_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db"));
    let mut publisher = QueuePublisher::new(config.clone());
    assert!(publisher.publish(&envelope("first")));
    assert!(publisher.publish(&envelope("second")));

    let mut consumer = QueueConsumer::new(config);
    let first = consumer.receive().unwrap().unwrap();
    assert!(first.body.contains("first"));

    match consumer.receive() {
        Err(QueueError::PrefetchExceeded { in_flight }) => {
            assert_eq!(in_flight, first.delivery_tag)
        }
        other => panic!("unexpected result: {other:?}"),
    }

    consumer.ack(first.delivery_tag).unwrap();
    let second = consumer.receive().unwrap().unwrap();
    assert!(second.body.contains("second"));
    assert!(second.delivery_tag > first.delivery_tag);
}

#[test]
fn nack_without_requeue_drops_and_with_requeue_redelivers() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db"));
    let mut publisher = QueuePublisher::new(config.clone());
    assert!(publisher.publish(&envelope("poison")));
    assert!(publisher.publish(&envelope("retry")));

    let mut consumer = QueueConsumer::new(config.clone());
    let poison = consumer.receive().unwrap().unwrap();
    consumer.nack(poison.delivery_tag, false).unwrap();
    assert_eq!(depth(&config), 1);

    let retry = consumer.receive().unwrap().unwrap();
    consumer.nack(retry.delivery_tag, true).unwrap();
    let again = consumer.receive().unwrap().unwrap();
    assert_eq!(again.delivery_tag, retry.delivery_tag);
    assert!(again.redelivered);
}

#[test]
fn settling_unknown_tag_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db"));
    let mut consumer = QueueConsumer::new(config);
    consumer.connect().unwrap();

    assert!(matches!(
        consumer.ack(42),
        Err(QueueError::UnknownDeliveryTag(42))
    ));
}

#[test]
fn unacked_delivery_is_redelivered_to_next_consumer() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db"));
    let mut publisher = QueuePublisher::new(config.clone());
    assert!(publisher.publish(&envelope("crash mid-task")));

    {
        let mut crashed = QueueConsumer::new(config.clone());
        let delivery = crashed.receive().unwrap().unwrap();
        assert!(!delivery.redelivered);
    }

    let mut restarted = QueueConsumer::new(config);
    let delivery = restarted.receive().unwrap().unwrap();
    assert!(delivery.redelivered);
    assert!(delivery.body.contains("crash mid-task"));
}

#[test]
fn messages_survive_publisher_close() {
    let dir = tempfile::tempdir().unwrap();
    let config = BrokerConfig::new(dir.path().join("broker.db")).with_queue("durable_tasks");
    {
        let mut publisher = QueuePublisher::new(config.clone());
        assert!(publisher.publish(&envelope("kept")));
        publisher.close();
        assert!(!publisher.is_connected());
    }

    let mut consumer = QueueConsumer::new(config);
    assert!(consumer.receive().unwrap().is_some());
}

#[test]
fn publish_reports_failure_instead_of_raising() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BrokerConfig::new(dir.path().join("missing").join("broker.db"));
    config.blocked_connection_timeout = Duration::from_millis(50);
    let mut publisher = QueuePublisher::new(config);

    assert!(!publisher.publish(&envelope("lost")));
    assert!(!publisher.is_connected());
}
