#![forbid(unsafe_code)]
//! An in-process, single-binary pub/sub broker implementing the
//! [`rpcbus::Broker`]/[`rpcbus::Message`] traits.
//!
//! This is a reference implementation for tests and the demo CLI, not a
//! production broker: topics are unbounded in-memory channels scoped to a
//! single process, there is no persistence, and only one subscriber per
//! topic is supported (matching the single-consumer-group assumption the
//! correlation engine is built against).

mod message;

pub use message::InMemoryMessage;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rpcbus::{Broker, BrokerError, Message as _};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A handle to the shared broker state. Cheap to clone; every clone talks to
/// the same set of topics.
#[derive(Clone)]
pub struct InMemoryBroker {
    topics: std::sync::Arc<Mutex<HashMap<String, mpsc::UnboundedSender<InMemoryMessage>>>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            topics: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribes to `topic`, returning a [`Subscription`] that yields
    /// delivered messages in order. Subscribing again to the same topic
    /// replaces the previous subscriber (single-consumer semantics).
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.lock().expect("broker mutex poisoned").insert(topic.to_string(), tx);
        Subscription { rx }
    }
}

impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let sender = self
            .topics
            .lock()
            .expect("broker mutex poisoned")
            .get(topic)
            .cloned();
        let sender = sender.ok_or_else(|| BrokerError::new(format!("no subscriber for topic {topic:?}")))?;
        trace!(topic, bytes = payload.len(), "publishing message");
        let message = InMemoryMessage::new(topic.to_string(), payload, self.clone());
        sender
            .send(message)
            .map_err(|_| BrokerError::new(format!("subscriber for topic {topic:?} has gone away")))
    }
}

/// An active subscription to one topic.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<InMemoryMessage>,
}

impl Subscription {
    /// Waits for the next delivered message.
    pub async fn recv(&mut self) -> Option<InMemoryMessage> {
        self.rx.recv().await
    }
}

/// Drives a subscription, calling `handler` for every delivered message
/// until the subscription closes or `cancellation` fires.
///
/// This is the glue a production broker client would provide internally;
/// here it is explicit since `InMemoryBroker` has no background I/O thread
/// of its own. A real broker (NSQ and friends) redelivers any in-flight
/// message that was never finished or explicitly requeued once its lease
/// expires, so the handler's own errors don't silently lose messages; this
/// loop plays that same "own-initiative requeue" role for the in-memory
/// reference broker. `auto_requeue_delay` is the delay applied when that
/// kicks in — pass the same value as `RpcConfig::requeue_delay` to match
/// the dispatcher's own requeue timing.
pub async fn run_subscription<F, Fut>(
    mut subscription: Subscription,
    cancellation: tokio_util::sync::CancellationToken,
    auto_requeue_delay: Duration,
    mut handler: F,
) where
    F: FnMut(InMemoryMessage) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            message = subscription.recv() => {
                match message {
                    Some(message) => {
                        let watch = message.clone();
                        handler(message).await;
                        if !watch.is_finished() && !watch.is_requeue_scheduled() {
                            warn!("handler left message unfinished, requeuing on the broker's own initiative");
                            watch.requeue_without_backoff(auto_requeue_delay);
                        }
                    }
                    None => break,
                }
            }
        }
    }
}
