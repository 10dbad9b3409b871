// workqueue-messaging-core/src/memory.rs
//! In-process broker with AMQP-like queue semantics.
//!
//! Queues hold ready messages in FIFO order; a delivery moves a message to
//! the unacknowledged set until it is acked (gone) or nacked (dropped, or
//! put back at the head when requeued). Delivery is gated by the prefetch
//! count: with a prefetch of `n > 0`, no more than `n` deliveries are
//! outstanding on the broker at once. A prefetch of 0 means unlimited.
//!
//! Unacknowledged deliveries belong to the subscription that received them.
//! When that delivery stream is dropped, or the broker is closed, they go
//! back to the head of their queue flagged as redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio::sync::Notify;
use tracing::debug;

use crate::{
    Acknowledger, Delivery, DeliveryStream, MessagingError, OutgoingMessage, QueueBroker,
    QueueSpec,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    content_type: String,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    consumer: u64,
    message: StoredMessage,
}

#[derive(Debug)]
struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, QueueState>,
    prefetch: u16,
    next_tag: u64,
    next_consumer: u64,
    in_flight: usize,
    peak_in_flight: usize,
    acked: u64,
    rejected: u64,
    fail_publishes: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

enum Next {
    Ready(Delivery),
    Empty,
    Closed,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_next(self: &Arc<Self>, queue: &str, consumer: u64) -> Next {
        let mut state = self.lock();
        if state.closed {
            return Next::Closed;
        }
        if state.prefetch > 0 && state.in_flight >= usize::from(state.prefetch) {
            return Next::Empty;
        }

        let tag = state.next_tag + 1;
        let Some(q) = state.queues.get_mut(queue) else {
            return Next::Closed;
        };
        let Some(message) = q.ready.pop_front() else {
            return Next::Empty;
        };
        q.unacked.insert(
            tag,
            Unacked {
                consumer,
                message: message.clone(),
            },
        );

        state.next_tag = tag;
        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);

        let acker = MemoryAcker {
            shared: Arc::clone(self),
            queue: queue.to_string(),
        };
        Next::Ready(Delivery::new(
            tag,
            message.redelivered,
            Some(message.content_type),
            message.body,
            Box::new(acker),
        ))
    }

    fn settle(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: Option<bool>,
    ) -> Result<(), MessagingError> {
        let mut state = self.lock();
        let message = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.unacked.remove(&delivery_tag))
            .map(|unacked| unacked.message)
            .ok_or_else(|| {
                MessagingError::Acknowledge(format!(
                    "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
                ))
            })?;
        state.in_flight -= 1;

        match requeue {
            None => state.acked += 1,
            Some(requeue) => {
                state.rejected += 1;
                if requeue {
                    if let Some(q) = state.queues.get_mut(queue) {
                        q.ready.push_front(StoredMessage {
                            redelivered: true,
                            ..message
                        });
                    }
                }
            }
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Puts matching unacknowledged deliveries back at the head of their
    /// queue, oldest first, and releases their prefetch slots.
    fn requeue_unacked<F>(&self, owned: F)
    where
        F: Fn(u64) -> bool,
    {
        let mut state = self.lock();
        let mut released = 0;
        for q in state.queues.values_mut() {
            let mut tags: Vec<u64> = q
                .unacked
                .iter()
                .filter(|(_, unacked)| owned(unacked.consumer))
                .map(|(tag, _)| *tag)
                .collect();
            tags.sort_unstable();
            for tag in tags.into_iter().rev() {
                if let Some(unacked) = q.unacked.remove(&tag) {
                    q.ready.push_front(StoredMessage {
                        redelivered: true,
                        ..unacked.message
                    });
                    released += 1;
                }
            }
        }
        state.in_flight -= released;
        drop(state);
        if released > 0 {
            debug!(released, "unacknowledged deliveries requeued");
            self.notify.notify_waiters();
        }
    }
}

/// One registered consumer; dropping it hands its deliveries back.
struct Subscription {
    shared: Arc<Shared>,
    queue: String,
    consumer: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let consumer = self.consumer;
        self.shared.requeue_unacked(|owner| owner == consumer);
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.shared.settle(&self.queue, delivery_tag, None)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.shared.settle(&self.queue, delivery_tag, Some(requeue))
    }
}

/// Cloning yields another handle onto the same broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail until switched off again.
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.lock().fail_publishes = fail;
    }

    pub fn queue_count(&self) -> usize {
        self.shared.lock().queues.len()
    }

    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub fn ack_count(&self) -> u64 {
        self.shared.lock().acked
    }

    pub fn reject_count(&self) -> u64 {
        self.shared.lock().rejected
    }

    pub fn prefetch(&self) -> u16 {
        self.shared.lock().prefetch
    }

    /// Highest number of simultaneously unacknowledged deliveries seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.lock().peak_in_flight
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), MessagingError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(MessagingError::Setup("channel closed".into()));
        }
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec == *spec => Ok(()),
            Some(_) => Err(MessagingError::Setup(format!(
                "PRECONDITION_FAILED - inequivalent arguments for queue '{}'",
                spec.name
            ))),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueState {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                        unacked: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(&self, queue: &str, message: &OutgoingMessage) -> Result<(), MessagingError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(MessagingError::Publish("channel closed".into()));
        }
        if state.fail_publishes {
            return Err(MessagingError::Publish("broker unreachable".into()));
        }
        match state.queues.get_mut(queue) {
            Some(q) => q.ready.push_back(StoredMessage {
                body: message.body.clone(),
                content_type: message.content_type.clone(),
                redelivered: false,
            }),
            // default exchange with no matching queue: unroutable, dropped
            None => debug!(queue, "no such queue, message dropped"),
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError> {
        self.shared.lock().prefetch = count;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        let consumer = {
            let mut state = self.shared.lock();
            if !state.queues.contains_key(queue) {
                return Err(MessagingError::Setup(format!(
                    "NOT_FOUND - no queue '{queue}'"
                )));
            }
            state.next_consumer += 1;
            state.next_consumer
        };
        debug!(queue, consumer_tag, consumer, "consumer registered");

        let subscription = Subscription {
            shared: Arc::clone(&self.shared),
            queue: queue.to_string(),
            consumer,
        };
        let deliveries = stream::unfold(subscription, |sub| async move {
            loop {
                let next = {
                    let notified = sub.shared.notify.notified();
                    tokio::pin!(notified);
                    // register before checking so a concurrent publish is not missed
                    notified.as_mut().enable();
                    match sub.shared.take_next(&sub.queue, sub.consumer) {
                        Next::Ready(delivery) => Some(delivery),
                        Next::Closed => None,
                        Next::Empty => {
                            notified.await;
                            continue;
                        }
                    }
                };
                return next.map(|delivery| (Ok(delivery), sub));
            }
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.shared.lock().closed = true;
        self.shared.requeue_unacked(|_| true);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
