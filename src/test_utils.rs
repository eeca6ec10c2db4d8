//! Test utilities.
//!
//! Recording handlers for exercising the delivery path without application
//! logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::consumer::EventHandler;
use crate::envelope::MessageEnvelope;

/// Handler that records every envelope it receives.
#[derive(Clone)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<MessageEnvelope>>>,
    accept: Arc<AtomicBool>,
}

impl RecordingHandler {
    /// Acknowledges every message.
    pub fn accepting() -> Self {
        Self {
            received: Arc::default(),
            accept: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Requests redelivery of every message.
    pub fn declining() -> Self {
        let handler = Self::accepting();
        handler.set_accept(false);
        handler
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<MessageEnvelope> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` envelopes arrived, up to one second.
    pub async fn wait_for(&self, count: usize) -> Vec<MessageEnvelope> {
        for _ in 0..100 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.received()
    }
}

impl EventHandler for RecordingHandler {
    fn handle(&self, envelope: MessageEnvelope) -> BoxFuture<'static, bool> {
        if let Ok(mut received) = self.received.lock() {
            received.push(envelope);
        }
        let accept = self.accept.load(Ordering::SeqCst);
        Box::pin(async move { accept })
    }
}
