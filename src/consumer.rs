//! Inbound message path.
//!
//! One task per consumed queue drains the broker's delivery stream. Each
//! delivery is decoded into a [`MessageEnvelope`] and passed to the
//! application's [`EventHandler`]:
//! - handler returns `true`: ack
//! - handler returns `false`: nack with requeue
//! - handler panics: nack with requeue, the consumer keeps running
//! - envelope cannot be decoded: reject, never requeued

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{self, Broker, BrokerError, Delivery, DeliveryStream};
use crate::envelope::MessageEnvelope;
use crate::topology::ConsumerRegistry;

/// Application callback for received events.
///
/// Returning `false` asks the broker to redeliver the message.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, envelope: MessageEnvelope) -> BoxFuture<'static, bool>;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(MessageEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn handle(&self, envelope: MessageEnvelope) -> BoxFuture<'static, bool> {
        Box::pin(self(envelope))
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Requeued,
    Rejected,
}

/// A queue stopped delivering.
#[derive(Debug)]
pub struct SubscriptionEnded {
    pub queue: String,
    /// `None` when the stream ended without an error (consumer cancelled).
    pub error: Option<BrokerError>,
}

/// Runs the consumers of one application.
pub struct DeliveryAdapter<B: Broker + ?Sized> {
    broker: Arc<B>,
    handler: Arc<dyn EventHandler>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    ended_tx: mpsc::UnboundedSender<SubscriptionEnded>,
    ended_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SubscriptionEnded>>>,
}

impl<B: Broker + ?Sized> DeliveryAdapter<B> {
    pub fn new(broker: Arc<B>, handler: Arc<dyn EventHandler>) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            handler,
            tasks: Mutex::new(HashMap::new()),
            ended_tx,
            ended_rx: std::sync::Mutex::new(Some(ended_rx)),
        }
    }

    /// Receiver of subscription endings. Available once.
    pub fn take_subscription_endings(&self) -> Option<mpsc::UnboundedReceiver<SubscriptionEnded>> {
        self.ended_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Start consuming `queue` unless its consumer is still running.
    pub async fn start(&self, queue: &str) -> broker::Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(queue) {
            if !task.is_finished() {
                debug!(queue = %queue, "Consumer already running");
                return Ok(());
            }
        }

        let stream = self.broker.consume(queue).await?;
        let handler = Arc::clone(&self.handler);
        let ended_tx = self.ended_tx.clone();
        let name = queue.to_string();
        let task = tokio::spawn(run_consumer(name, stream, handler, ended_tx));
        tasks.insert(queue.to_string(), task);

        info!(queue = %queue, "Consumer started");
        Ok(())
    }

    /// Queues with a live consumer task.
    pub async fn running_queues(&self) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        let mut queues: Vec<String> = tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(queue, _)| queue.clone())
            .collect();
        queues.sort();
        queues
    }

    /// Stop every consumer task.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (queue, task) in tasks.drain() {
            task.abort();
            debug!(queue = %queue, "Consumer stopped");
        }
    }
}

#[async_trait]
impl<B: Broker + ?Sized> ConsumerRegistry for DeliveryAdapter<B> {
    async fn start_consumer(&self, queue: &str) -> broker::Result<()> {
        self.start(queue).await
    }
}

/// Drain one queue until its stream ends, then report the ending.
async fn run_consumer(
    queue: String,
    mut stream: DeliveryStream,
    handler: Arc<dyn EventHandler>,
    ended_tx: mpsc::UnboundedSender<SubscriptionEnded>,
) {
    let error = loop {
        match stream.next().await {
            Some(Ok(delivery)) => {
                process_delivery(delivery, handler.as_ref()).await;
            }
            Some(Err(e)) => break Some(e),
            None => break None,
        }
    };

    match &error {
        Some(e) => warn!(queue = %queue, error = %e, "Subscription ended with error"),
        None => warn!(queue = %queue, "Subscription ended"),
    }
    let _ = ended_tx.send(SubscriptionEnded { queue, error });
}

/// Decode, dispatch and settle one delivery.
pub async fn process_delivery(delivery: Delivery, handler: &dyn EventHandler) -> DeliveryOutcome {
    let envelope =
        match MessageEnvelope::from_wire(&delivery.properties, &delivery.routing_key, &delivery.body)
        {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    error = %e,
                    routing_key = %delivery.routing_key,
                    "Failed to decode message, rejecting"
                );
                if let Err(e) = delivery.reject().await {
                    error!(error = %e, "Failed to reject message");
                }
                return DeliveryOutcome::Rejected;
            }
        };

    let event_id = envelope.event_id();
    debug!(
        event_id = %event_id,
        routing_key = %delivery.routing_key,
        redelivered = delivery.redelivered,
        "Received message"
    );

    let handled = AssertUnwindSafe(async move { handler.handle(envelope).await })
        .catch_unwind()
        .await;

    match handled {
        Ok(true) => {
            if let Err(e) = delivery.ack().await {
                error!(event_id = %event_id, error = %e, "Failed to ack message");
            }
            return DeliveryOutcome::Acked;
        }
        Ok(false) => warn!(event_id = %event_id, "Handler declined message, requeueing"),
        Err(_) => error!(event_id = %event_id, "Handler panicked, requeueing"),
    }
    if let Err(e) = delivery.nack(true).await {
        error!(event_id = %event_id, error = %e, "Failed to nack message");
    }
    DeliveryOutcome::Requeued
}
