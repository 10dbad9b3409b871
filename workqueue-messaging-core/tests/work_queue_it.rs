use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use workqueue_messaging_core::{
    Consumer, ConsumerOptions, Delivery, InMemoryBroker, MessageHandler, MessagingError,
    Producer, ProducerOptions, QueueBroker, QueueSpec, SimulatedWork, SIMULATED_WORK, TASK_QUEUE,
};

#[derive(Debug, Clone)]
struct Processed {
    body: String,
    started: Instant,
    finished: Instant,
    acks_before: u64,
    unacked_during: usize,
}

/// Wraps the simulated workload and records what it saw.
struct Recording {
    broker: InMemoryBroker,
    inner: SimulatedWork,
    log: Arc<Mutex<Vec<Processed>>>,
}

#[async_trait]
impl MessageHandler for Recording {
    async fn handle(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        let started = Instant::now();
        let acks_before = self.broker.ack_count();
        let unacked_during = self.broker.unacked_count(TASK_QUEUE);
        self.inner.handle(delivery).await?;
        self.log.lock().unwrap().push(Processed {
            body: delivery.body_text(),
            started,
            finished: Instant::now(),
            acks_before,
            unacked_during,
        });
        Ok(())
    }
}

fn recording_consumer(
    broker: &InMemoryBroker,
) -> (Consumer<InMemoryBroker>, Arc<Mutex<Vec<Processed>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler = Recording {
        broker: broker.clone(),
        inner: SimulatedWork::default(),
        log: Arc::clone(&log),
    };
    let consumer = Consumer::new(
        Arc::new(broker.clone()),
        ConsumerOptions::default(),
        Arc::new(handler),
    );
    (consumer, log)
}

#[tokio::test(start_paused = true)]
async fn messages_are_consumed_in_order_one_at_a_time() {
    let broker = InMemoryBroker::new();
    let (consumer, log) = recording_consumer(&broker);
    let mut deliveries = consumer.start().await.unwrap();

    let mut producer = Producer::new(Arc::new(broker.clone()), ProducerOptions::default());
    producer.declare_queue().await.unwrap();
    for _ in 0..3 {
        producer.publish_next().await.unwrap();
    }

    let report = consumer
        .receive_loop(&mut deliveries, tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(report.acknowledged, 3);

    let log = log.lock().unwrap();
    let bodies: Vec<&str> = log.iter().map(|p| p.body.as_str()).collect();
    assert_eq!(
        bodies,
        [
            "Hello from producer! Message #1",
            "Hello from producer! Message #2",
            "Hello from producer! Message #3",
        ]
    );

    for (i, p) in log.iter().enumerate() {
        assert!(p.finished - p.started >= SIMULATED_WORK);
        // previous deliveries settled, this one not yet
        assert_eq!(p.acks_before, i as u64);
        assert_eq!(p.unacked_during, 1);
    }
    for pair in log.windows(2) {
        assert!(pair[1].started >= pair[0].finished, "processing overlapped");
    }

    assert_eq!(broker.peak_in_flight(), 1);
    assert_eq!(broker.ack_count(), 3);
    assert_eq!(broker.ready_count(TASK_QUEUE), 0);
    assert_eq!(broker.unacked_count(TASK_QUEUE), 0);
}

#[tokio::test(start_paused = true)]
async fn producer_and_consumer_run_side_by_side() {
    let broker = InMemoryBroker::new();
    let (consumer, log) = recording_consumer(&broker);

    let mut producer = Producer::new(Arc::new(broker.clone()), ProducerOptions::default());
    let producing = tokio::spawn(async move {
        producer
            .run(tokio::time::sleep(Duration::from_secs(14)))
            .await
    });

    let report = consumer
        .run(tokio::time::sleep(Duration::from_secs(20)))
        .await
        .unwrap();
    let produced = producing.await.unwrap().unwrap();

    assert_eq!(produced.published, 3);
    assert_eq!(report.acknowledged, 3);
    let log = log.lock().unwrap();
    assert!(log[2].body.ends_with("#3"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_the_message_in_flight() {
    let broker = InMemoryBroker::new();
    let (consumer, log) = recording_consumer(&broker);
    let mut deliveries = consumer.start().await.unwrap();

    let mut producer = Producer::new(Arc::new(broker.clone()), ProducerOptions::default());
    producer.publish_next().await.unwrap();

    // fires mid-way through the simulated work
    let report = consumer
        .receive_loop(&mut deliveries, tokio::time::sleep(Duration::from_millis(500)))
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 1);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(broker.unacked_count(TASK_QUEUE), 0);
}

#[tokio::test]
async fn both_sides_declaring_the_queue_leaves_one_queue() {
    let broker = InMemoryBroker::new();
    let (consumer, _log) = recording_consumer(&broker);
    let producer = Producer::new(Arc::new(broker.clone()), ProducerOptions::default());

    producer.declare_queue().await.unwrap();
    let _deliveries = consumer.start().await.unwrap();
    broker
        .declare_queue(&QueueSpec::durable(TASK_QUEUE))
        .await
        .unwrap();

    assert_eq!(broker.queue_count(), 1);
}
