use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpcbus::{Broker, Message};
use tracing::trace;

use crate::InMemoryBroker;

struct Inner {
    topic: String,
    body: Vec<u8>,
    broker: InMemoryBroker,
    finished: AtomicBool,
    requeue_scheduled: AtomicBool,
    touch_count: AtomicUsize,
}

/// A single in-flight message delivered by [`InMemoryBroker`].
///
/// Cheap to clone: clones share the same underlying state, which is what
/// lets [`rpcbus::Server`] clone a message into its touch keep-alive task
/// while the original stays with the dispatch loop.
#[derive(Clone)]
pub struct InMemoryMessage {
    inner: Arc<Inner>,
}

impl InMemoryMessage {
    pub(crate) fn new(topic: String, body: Vec<u8>, broker: InMemoryBroker) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic,
                body,
                broker,
                finished: AtomicBool::new(false),
                requeue_scheduled: AtomicBool::new(false),
                touch_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of times [`Message::touch`] has been called on this message.
    /// Exposed for tests exercising the keep-alive lifecycle.
    pub fn touch_count(&self) -> usize {
        self.inner.touch_count.load(Ordering::SeqCst)
    }

    /// Whether [`Message::finish`] has been called on this message.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Whether [`Message::requeue_without_backoff`] has already been called
    /// on this message. Lets [`crate::run_subscription`] tell "the handler
    /// explicitly deferred this" apart from "the handler returned an error
    /// and left the message dangling", so it only applies its own-initiative
    /// requeue policy to the latter.
    pub fn is_requeue_scheduled(&self) -> bool {
        self.inner.requeue_scheduled.load(Ordering::SeqCst)
    }
}

impl Message for InMemoryMessage {
    fn body(&self) -> &[u8] {
        &self.inner.body
    }

    fn disable_auto_response(&self) {
        // This reference broker never auto-acks, so there is nothing to
        // disable; the method exists so callers can treat every broker
        // uniformly.
    }

    fn finish(&self) {
        self.inner.finished.store(true, Ordering::SeqCst);
    }

    fn touch(&self) {
        self.inner.touch_count.fetch_add(1, Ordering::SeqCst);
        trace!(topic = %self.inner.topic, "touched in-flight message");
    }

    fn requeue_without_backoff(&self, delay: Duration) {
        self.inner.requeue_scheduled.store(true, Ordering::SeqCst);
        let topic = self.inner.topic.clone();
        let body = self.inner.body.clone();
        let broker = self.inner.broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = broker.publish(&topic, body).await {
                trace!(topic, %err, "requeue publish failed, message dropped");
            }
        });
    }
}
