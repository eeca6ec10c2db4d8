//! In-memory topic broker.
//!
//! Implements exchange-to-exchange and exchange-to-queue topic routing with
//! AMQP pattern semantics (`*` matches one word, `#` matches zero or more)
//! inside a single process. Used by tests and for local development without
//! a RabbitMQ instance.
//!
//! Every declaration is recorded so tests can inspect the resulting topology.
//! Publishes and settlements are kept in logs holding the most recent
//! [`DEFAULT_LOG_CAPACITY`] entries (see [`InMemoryBroker::with_log_capacity`]).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use super::{
    Acknowledger, Broker, BrokerError, Delivery, DeliveryStream, MessageProperties, QueueOptions,
    Result,
};

/// Entries kept in the publish and settlement logs by default.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// A routing edge from an exchange to an exchange or queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Binding {
    pub destination: String,
    pub source: String,
    pub pattern: String,
}

/// A message accepted by `publish`, with the queues it was routed to.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    pub routed_to: Vec<String>,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack { delivery_tag: u64 },
    Nack { delivery_tag: u64, requeue: bool },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    properties: MessageProperties,
    body: Vec<u8>,
    redelivered: bool,
}

type ConsumerSender = mpsc::UnboundedSender<Result<Delivery>>;

#[derive(Default)]
struct QueueState {
    options: QueueOptions,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    consumers: Vec<ConsumerSender>,
    next_consumer: usize,
}

#[derive(Default)]
struct State {
    exchanges: BTreeMap<String, bool>,
    exchange_bindings: BTreeSet<Binding>,
    queues: BTreeMap<String, QueueState>,
    queue_bindings: BTreeSet<Binding>,
    published: VecDeque<PublishedMessage>,
    settlements: VecDeque<Settlement>,
    // `None` means DEFAULT_LOG_CAPACITY.
    log_capacity: Option<usize>,
    next_tag: u64,
    failing_resources: BTreeSet<String>,
    fail_on_publish: bool,
}

impl State {
    fn log_capacity(&self) -> usize {
        self.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY)
    }
}

fn record<T>(log: &mut VecDeque<T>, capacity: usize, entry: T) {
    if capacity == 0 {
        return;
    }
    while log.len() >= capacity {
        log.pop_front();
    }
    log.push_back(entry);
}

/// Match a routing key against a topic binding pattern.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}

/// In-process broker with topic exchange semantics.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries in the publish and settlement logs.
    /// Zero disables recording.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                log_capacity: Some(capacity),
                ..Default::default()
            })),
        }
    }

    /// Fail every declaration or binding targeting `name`.
    pub async fn fail_on_resource(&self, name: impl Into<String>) {
        self.state.lock().await.failing_resources.insert(name.into());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing_resources.clear();
        state.fail_on_publish = false;
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Drop every consumer, as a lost connection would.
    ///
    /// Open streams yield one connection error and end. Unsettled messages
    /// return to their queues marked as redelivered.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        for (name, queue) in state.queues.iter_mut() {
            for consumer in queue.consumers.drain(..) {
                let _ = consumer.send(Err(BrokerError::Connection("connection closed".to_string())));
            }
            let mut unacked: Vec<(u64, StoredMessage)> = queue.unacked.drain().collect();
            unacked.sort_by_key(|(tag, _)| *tag);
            for (_, mut message) in unacked.into_iter().rev() {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            debug!(queue = %name, "Consumers disconnected");
        }
    }

    pub async fn exchanges(&self) -> Vec<String> {
        self.state.lock().await.exchanges.keys().cloned().collect()
    }

    pub async fn has_exchange(&self, name: &str) -> bool {
        self.state.lock().await.exchanges.contains_key(name)
    }

    pub async fn queues(&self) -> Vec<String> {
        self.state.lock().await.queues.keys().cloned().collect()
    }

    pub async fn queue_options(&self, name: &str) -> Option<QueueOptions> {
        self.state
            .lock()
            .await
            .queues
            .get(name)
            .map(|q| q.options.clone())
    }

    pub async fn exchange_bindings(&self) -> Vec<Binding> {
        self.state.lock().await.exchange_bindings.iter().cloned().collect()
    }

    pub async fn queue_bindings(&self) -> Vec<Binding> {
        self.state.lock().await.queue_bindings.iter().cloned().collect()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.iter().cloned().collect()
    }

    pub async fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().await.settlements.iter().copied().collect()
    }

    pub async fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().filter(|c| !c.is_closed()).count())
            .unwrap_or(0)
    }

    /// Messages waiting in `queue` that no consumer holds.
    pub async fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    fn check_failure(state: &State, name: &str) -> Result<()> {
        if state.failing_resources.contains(name) {
            return Err(BrokerError::Declare(format!(
                "injected failure for '{}'",
                name
            )));
        }
        Ok(())
    }

    /// Exchanges reachable from `exchange` for `routing_key`, including itself.
    fn reachable_exchanges(state: &State, exchange: &str, routing_key: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::from([exchange.to_string()]);
        let mut pending = vec![exchange.to_string()];
        while let Some(current) = pending.pop() {
            for binding in &state.exchange_bindings {
                if binding.source == current
                    && topic_matches(&binding.pattern, routing_key)
                    && visited.insert(binding.destination.clone())
                {
                    pending.push(binding.destination.clone());
                }
            }
        }
        visited
    }

    fn route(state: &State, exchange: &str, routing_key: &str) -> BTreeSet<String> {
        let exchanges = Self::reachable_exchanges(state, exchange, routing_key);
        state
            .queue_bindings
            .iter()
            .filter(|b| exchanges.contains(&b.source) && topic_matches(&b.pattern, routing_key))
            .map(|b| b.destination.clone())
            .collect()
    }

    /// Hand ready messages of `queue` to its consumers, round robin.
    fn dispatch(state: &mut State, weak: &Weak<Mutex<State>>, queue_name: &str) {
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return;
        };
        queue.consumers.retain(|c| !c.is_closed());
        while !queue.consumers.is_empty() {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            state.next_tag += 1;
            let tag = state.next_tag;
            let delivery = Delivery::new(
                tag,
                message.exchange.clone(),
                message.routing_key.clone(),
                message.redelivered,
                message.properties.clone(),
                message.body.clone(),
                Box::new(MemoryAcker {
                    state: weak.clone(),
                    queue: queue_name.to_string(),
                    delivery_tag: tag,
                }),
            );
            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;
            if queue.consumers[index].send(Ok(delivery)).is_err() {
                queue.consumers.remove(index);
                queue.ready.push_front(message);
                continue;
            }
            queue.unacked.insert(tag, message);
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, name: &str, durable: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_failure(&state, name)?;
        match state.exchanges.get(name) {
            Some(existing) if *existing != durable => Err(BrokerError::Declare(format!(
                "exchange '{}' already declared with durable={}",
                name, existing
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), durable);
                info!(exchange = %name, "Declared exchange");
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_failure(&state, name)?;
        match state.queues.get(name) {
            Some(existing) if existing.options != *options => Err(BrokerError::Declare(format!(
                "queue '{}' already declared with different options",
                name
            ))),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        options: options.clone(),
                        ..Default::default()
                    },
                );
                info!(queue = %name, durable = options.durable, "Declared queue");
                Ok(())
            }
        }
    }

    async fn bind_exchange(&self, destination: &str, source: &str, pattern: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_failure(&state, destination)?;
        for exchange in [destination, source] {
            if !state.exchanges.contains_key(exchange) {
                return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
            }
        }
        state.exchange_bindings.insert(Binding {
            destination: destination.to_string(),
            source: source.to_string(),
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_failure(&state, queue)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue)));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
        }
        state.queue_bindings.insert(Binding {
            destination: queue.to_string(),
            source: exchange.to_string(),
            pattern: pattern.to_string(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()> {
        let weak = Arc::downgrade(&self.state);
        let mut state = self.state.lock().await;
        if state.fail_on_publish {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
        }

        let queues = Self::route(&state, exchange, routing_key);
        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            queues = queues.len(),
            "Routed message"
        );

        let message = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.clone(),
            redelivered: false,
        };
        for queue in &queues {
            if let Some(q) = state.queues.get_mut(queue) {
                q.ready.push_back(message.clone());
            }
            Self::dispatch(&mut state, &weak, queue);
        }

        let capacity = state.log_capacity();
        record(
            &mut state.published,
            capacity,
            PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                properties,
                body,
                routed_to: queues.into_iter().collect(),
            },
        );
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream> {
        let weak = Arc::downgrade(&self.state);
        let mut state = self.state.lock().await;
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(BrokerError::NotFound(format!("queue '{}'", queue)));
        };
        let (tx, rx) = mpsc::unbounded_channel();
        q.consumers.push(tx);
        Self::dispatch(&mut state, &weak, queue);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

struct MemoryAcker {
    state: Weak<Mutex<State>>,
    queue: String,
    delivery_tag: u64,
}

impl MemoryAcker {
    async fn settle(self: Box<Self>, requeue: Option<bool>) -> Result<()> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| BrokerError::Connection("broker dropped".to_string()))?;
        let mut state = state.lock().await;
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{}'", self.queue)))?;
        let mut message = queue.unacked.remove(&self.delivery_tag).ok_or_else(|| {
            BrokerError::Ack(format!("unknown delivery tag {}", self.delivery_tag))
        })?;

        let settlement = match requeue {
            None => Settlement::Ack {
                delivery_tag: self.delivery_tag,
            },
            Some(requeue) => {
                if requeue {
                    message.redelivered = true;
                    queue.ready.push_front(message);
                }
                Settlement::Nack {
                    delivery_tag: self.delivery_tag,
                    requeue,
                }
            }
        };
        let capacity = state.log_capacity();
        record(&mut state.settlements, capacity, settlement);
        if matches!(requeue, Some(true)) {
            InMemoryBroker::dispatch(&mut state, &self.state, &self.queue);
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.settle(None).await
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        self.settle(Some(requeue)).await
    }
}

#[cfg(test)]
mod tests;
