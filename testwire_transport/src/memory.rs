// Copyright (c) The Testwire Authors.
// Licensed under the MIT License.

//! In-process implementation of the transport boundary.
//!
//! [`MemoryBroker`] keeps queues and topics in process memory: queues are
//! selector-aware buffers, topics fan out to live subscribers and to named
//! durable subscription buffers. It implements [`SessionProvider`] directly,
//! so a test can hand a cloned broker to the engine and a responder task
//! without any network setup.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::destination::Destination;
use crate::error::TransportError;
use crate::interface::{
    MessageConsumer, MessageProducer, Selector, SessionProvider, TransportSession, WireMessage,
};

/// Buffer capacity for live (non-durable) topic subscribers.
const LIVE_SUBSCRIBER_CAPACITY: usize = 16;

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<WireMessage>>,
    notify: Notify,
    deleted: AtomicBool,
}

impl QueueState {
    fn push(&self, message: WireMessage) {
        self.messages.lock().unwrap().push_back(message);
        self.notify.notify_waiters();
    }

    fn take(&self, selector: Option<&Selector>) -> Option<WireMessage> {
        let mut messages = self.messages.lock().unwrap();
        match selector {
            None => messages.pop_front(),
            Some(selector) => {
                let index = messages.iter().position(|m| selector.matches(m))?;
                messages.remove(index)
            }
        }
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

struct TopicState {
    live: broadcast::Sender<WireMessage>,
    durable: Mutex<HashMap<String, Arc<QueueState>>>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            live: broadcast::Sender::new(LIVE_SUBSCRIBER_CAPACITY),
            durable: Mutex::new(HashMap::new()),
        }
    }

    fn publish(&self, message: &WireMessage) {
        // A send error only means there is no live subscriber right now.
        let _ = self.live.send(message.clone());
        for queue in self.durable.lock().unwrap().values() {
            queue.push(message.clone());
        }
    }
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    topics: Mutex<HashMap<String, Arc<TopicState>>>,
}

/// An in-process broker holding queues and topics.
///
/// Cloning is cheap and every clone addresses the same broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a queue or topic with the given name currently
    /// exists. Intended for test assertions, notably that temporary
    /// destinations were deleted.
    #[must_use]
    pub fn destination_exists(&self, name: &str) -> bool {
        self.inner.queues.lock().unwrap().contains_key(name)
            || self.inner.topics.lock().unwrap().contains_key(name)
    }

    /// Returns the number of messages buffered on the named queue, zero if
    /// the queue does not exist.
    #[must_use]
    pub fn pending(&self, name: &str) -> usize {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |q| q.messages.lock().unwrap().len())
    }

    /// Looks up a queue. Named queues are created lazily; temporary queues
    /// must already exist.
    fn queue(&self, destination: &Destination) -> Result<Arc<QueueState>, TransportError> {
        let mut queues = self.inner.queues.lock().unwrap();
        if destination.is_temporary() {
            queues.get(destination.name()).cloned().ok_or_else(|| {
                TransportError::DestinationUnavailable(destination.name().to_string())
            })
        } else {
            Ok(queues
                .entry(destination.name().to_string())
                .or_default()
                .clone())
        }
    }

    /// Looks up a topic, with the same lazy-vs-strict split as [`Self::queue`].
    fn topic(&self, destination: &Destination) -> Result<Arc<TopicState>, TransportError> {
        let mut topics = self.inner.topics.lock().unwrap();
        if destination.is_temporary() {
            topics.get(destination.name()).cloned().ok_or_else(|| {
                TransportError::DestinationUnavailable(destination.name().to_string())
            })
        } else {
            Ok(topics
                .entry(destination.name().to_string())
                .or_insert_with(|| Arc::new(TopicState::new()))
                .clone())
        }
    }

    fn publish(
        &self,
        destination: &Destination,
        message: WireMessage,
    ) -> Result<(), TransportError> {
        if destination.is_topic() {
            self.topic(destination)?.publish(&message);
        } else {
            self.queue(destination)?.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for MemoryBroker {
    type Session = MemorySession;

    async fn session(&self) -> Result<MemorySession, TransportError> {
        Ok(MemorySession {
            broker: self.clone(),
        })
    }
}

/// A session handle onto a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemorySession {
    broker: MemoryBroker,
}

#[async_trait]
impl TransportSession for MemorySession {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    async fn create_producer(
        &self,
        destination: &Destination,
    ) -> Result<MemoryProducer, TransportError> {
        // Validate temporary destinations up front so a producer onto a
        // deleted destination fails at creation rather than first send.
        if destination.is_topic() {
            self.broker.topic(destination)?;
        } else {
            self.broker.queue(destination)?;
        }
        Ok(MemoryProducer {
            broker: self.broker.clone(),
            destination: destination.clone(),
            closed: false,
        })
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
    ) -> Result<MemoryConsumer, TransportError> {
        let source = if destination.is_topic() {
            ConsumerSource::Live(self.broker.topic(destination)?.live.subscribe())
        } else {
            ConsumerSource::Queue(self.broker.queue(destination)?)
        };
        Ok(MemoryConsumer {
            destination: destination.name().to_string(),
            source,
            selector: None,
            closed: false,
        })
    }

    async fn create_selective_consumer(
        &self,
        destination: &Destination,
        selector: &Selector,
        subscription: Option<&str>,
    ) -> Result<MemoryConsumer, TransportError> {
        let source = if destination.is_topic() {
            match subscription {
                // A durable subscription buffers matching messages published
                // while no consumer is attached.
                Some(name) => {
                    let topic = self.broker.topic(destination)?;
                    let queue = topic
                        .durable
                        .lock()
                        .unwrap()
                        .entry(name.to_string())
                        .or_default()
                        .clone();
                    ConsumerSource::Queue(queue)
                }
                None => ConsumerSource::Live(self.broker.topic(destination)?.live.subscribe()),
            }
        } else {
            ConsumerSource::Queue(self.broker.queue(destination)?)
        };
        Ok(MemoryConsumer {
            destination: destination.name().to_string(),
            source,
            selector: Some(selector.clone()),
            closed: false,
        })
    }

    async fn create_temporary_destination(
        &self,
        pub_sub: bool,
    ) -> Result<Destination, TransportError> {
        if pub_sub {
            let name = format!("tmp.topic.{}", Uuid::new_v4());
            self.broker
                .inner
                .topics
                .lock()
                .unwrap()
                .insert(name.clone(), Arc::new(TopicState::new()));
            Ok(Destination::TemporaryTopic(name))
        } else {
            let name = format!("tmp.queue.{}", Uuid::new_v4());
            self.broker
                .inner
                .queues
                .lock()
                .unwrap()
                .insert(name.clone(), Arc::default());
            Ok(Destination::TemporaryQueue(name))
        }
    }

    async fn resolve(&self, name: &str, pub_sub: bool) -> Result<Destination, TransportError> {
        let destination = if pub_sub {
            Destination::Topic(name.to_string())
        } else {
            Destination::Queue(name.to_string())
        };
        // Register eagerly so resolution is observable and deterministic.
        if pub_sub {
            self.broker.topic(&destination)?;
        } else {
            self.broker.queue(&destination)?;
        }
        Ok(destination)
    }

    async fn delete_destination(&self, destination: &Destination) -> Result<(), TransportError> {
        if !destination.is_temporary() {
            log::debug!("skipping delete of non-temporary destination '{destination}'");
            return Ok(());
        }
        match destination {
            Destination::TemporaryQueue(name) => {
                match self.broker.inner.queues.lock().unwrap().remove(name) {
                    Some(queue) => queue.mark_deleted(),
                    None => log::debug!("temporary destination '{destination}' already deleted"),
                }
            }
            Destination::TemporaryTopic(name) => {
                match self.broker.inner.topics.lock().unwrap().remove(name) {
                    // Dropping the topic ends live subscriptions; durable
                    // buffers are woken so waiters observe the deletion.
                    Some(topic) => {
                        for queue in topic.durable.lock().unwrap().values() {
                            queue.mark_deleted();
                        }
                    }
                    None => log::debug!("temporary destination '{destination}' already deleted"),
                }
            }
            Destination::Queue(_) | Destination::Topic(_) => {}
        }
        Ok(())
    }
}

/// Producer onto a [`MemoryBroker`] destination.
pub struct MemoryProducer {
    broker: MemoryBroker,
    destination: Destination,
    closed: bool,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn send(&mut self, mut message: WireMessage) -> Result<String, TransportError> {
        if self.closed {
            return Err(TransportError::HandleClosed);
        }
        let message_id = format!("ID:{}", Uuid::new_v4());
        message.message_id.clone_from(&message_id);
        self.broker.publish(&self.destination, message)?;
        Ok(message_id)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

enum ConsumerSource {
    Queue(Arc<QueueState>),
    Live(broadcast::Receiver<WireMessage>),
}

/// Consumer on a [`MemoryBroker`] destination, optionally selector-filtered.
pub struct MemoryConsumer {
    destination: String,
    source: ConsumerSource,
    selector: Option<Selector>,
    closed: bool,
}

impl MemoryConsumer {
    async fn receive_from_queue(
        queue: &QueueState,
        destination: &str,
        selector: Option<&Selector>,
        deadline: Option<Instant>,
    ) -> Result<Option<WireMessage>, TransportError> {
        loop {
            if queue.is_deleted() {
                return Err(TransportError::DestinationUnavailable(
                    destination.to_string(),
                ));
            }
            if let Some(message) = queue.take(selector) {
                return Ok(Some(message));
            }
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // A message may have landed between the take and the wakeup
            // registration; check again before parking.
            if let Some(message) = queue.take(selector) {
                return Ok(Some(message));
            }
            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn receive_live(
        rx: &mut broadcast::Receiver<WireMessage>,
        destination: &str,
        selector: Option<&Selector>,
        deadline: Option<Instant>,
    ) -> Result<Option<WireMessage>, TransportError> {
        loop {
            let next = async {
                match deadline {
                    Some(deadline) => match timeout_at(deadline, rx.recv()).await {
                        Ok(result) => Some(result),
                        Err(_) => None,
                    },
                    None => Some(rx.recv().await),
                }
            }
            .await;
            match next {
                None => return Ok(None),
                Some(Ok(message)) => {
                    if selector.is_none_or(|s| s.matches(&message)) {
                        return Ok(Some(message));
                    }
                }
                Some(Err(broadcast::error::RecvError::Lagged(count))) => {
                    log::warn!(
                        "subscriber on '{destination}' lagged, {count} message(s) dropped"
                    );
                }
                Some(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::DestinationUnavailable(
                        destination.to_string(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<WireMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::HandleClosed);
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        match &mut self.source {
            ConsumerSource::Queue(queue) => {
                Self::receive_from_queue(queue, &self.destination, self.selector.as_ref(), deadline)
                    .await
            }
            ConsumerSource::Live(rx) => {
                Self::receive_live(rx, &self.destination, self.selector.as_ref(), deadline).await
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn message(payload: &'static [u8], correlation_id: Option<&str>) -> WireMessage {
        WireMessage {
            correlation_id: correlation_id.map(String::from),
            payload: Bytes::from_static(payload),
            ..WireMessage::default()
        }
    }

    async fn session(broker: &MemoryBroker) -> MemorySession {
        broker.session().await.unwrap()
    }

    #[tokio::test]
    async fn queue_send_then_receive() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Queue("orders".into());

        let mut producer = session.create_producer(&destination).await.unwrap();
        let id = producer.send(message(b"hello", None)).await.unwrap();
        assert!(!id.is_empty());

        let mut consumer = session.create_consumer(&destination).await.unwrap();
        let received = consumer
            .receive(Some(Duration::from_millis(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload, Bytes::from_static(b"hello"));
        assert_eq!(received.message_id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_receive_times_out_without_message() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Queue("quiet".into());

        let mut consumer = session.create_consumer(&destination).await.unwrap();
        let started = Instant::now();
        let received = consumer.receive(Some(Duration::from_secs(2))).await.unwrap();
        assert!(received.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn selective_consumer_leaves_non_matching_messages() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Queue("replies".into());

        let mut producer = session.create_producer(&destination).await.unwrap();
        producer.send(message(b"first", Some("ID:1"))).await.unwrap();
        producer.send(message(b"second", Some("ID:2"))).await.unwrap();

        let selector = Selector::correlation_id("ID:2");
        let mut consumer = session
            .create_selective_consumer(&destination, &selector, None)
            .await
            .unwrap();
        let received = consumer
            .receive(Some(Duration::from_millis(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload, Bytes::from_static(b"second"));
        // The non-matching message stays queued for other consumers.
        assert_eq!(broker.pending("replies"), 1);
    }

    #[tokio::test]
    async fn topic_fans_out_to_live_subscribers() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Topic("events".into());

        let mut first = session.create_consumer(&destination).await.unwrap();
        let mut second = session.create_consumer(&destination).await.unwrap();
        let mut producer = session.create_producer(&destination).await.unwrap();
        producer.send(message(b"tick", None)).await.unwrap();

        for consumer in [&mut first, &mut second] {
            let received = consumer
                .receive(Some(Duration::from_millis(100)))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.payload, Bytes::from_static(b"tick"));
        }
    }

    #[tokio::test]
    async fn durable_subscription_buffers_while_detached() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Topic("events".into());
        let selector = Selector::correlation_id("ID:7");

        // Creating the durable subscription first means a publish while no
        // consumer is receiving is still retained.
        let mut consumer = session
            .create_selective_consumer(&destination, &selector, Some("listener"))
            .await
            .unwrap();
        let mut producer = session.create_producer(&destination).await.unwrap();
        producer.send(message(b"kept", Some("ID:7"))).await.unwrap();

        let received = consumer
            .receive(Some(Duration::from_millis(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload, Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn temporary_destination_lifecycle() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;

        let destination = session.create_temporary_destination(false).await.unwrap();
        assert!(destination.is_temporary());
        assert!(broker.destination_exists(destination.name()));

        session.delete_destination(&destination).await.unwrap();
        assert!(!broker.destination_exists(destination.name()));
        // Deleting again is a no-op.
        session.delete_destination(&destination).await.unwrap();

        // A producer can no longer be created onto the deleted destination.
        let result = session.create_producer(&destination).await;
        assert!(matches!(
            result,
            Err(TransportError::DestinationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn delete_of_named_destination_is_noop() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = session.resolve("orders", false).await.unwrap();

        session.delete_destination(&destination).await.unwrap();
        assert!(broker.destination_exists("orders"));
    }

    #[tokio::test]
    async fn waiting_consumer_observes_deletion() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = session.create_temporary_destination(false).await.unwrap();
        let mut consumer = session.create_consumer(&destination).await.unwrap();

        let deleter = {
            let session = session.clone();
            let destination = destination.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                session.delete_destination(&destination).await.unwrap();
            })
        };

        let result = consumer.receive(Some(Duration::from_secs(5))).await;
        assert!(matches!(
            result,
            Err(TransportError::DestinationUnavailable(_))
        ));
        deleter.await.unwrap();
    }

    #[tokio::test]
    async fn closed_handles_reject_use() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let destination = Destination::Queue("orders".into());

        let mut producer = session.create_producer(&destination).await.unwrap();
        producer.close().await.unwrap();
        assert!(matches!(
            producer.send(message(b"late", None)).await,
            Err(TransportError::HandleClosed)
        ));

        let mut consumer = session.create_consumer(&destination).await.unwrap();
        consumer.close().await.unwrap();
        assert!(matches!(
            consumer.receive(None).await,
            Err(TransportError::HandleClosed)
        ));
    }
}
