use std::time::Duration;

/// The contract a pub/sub broker must satisfy for [`crate::Client`] and
/// [`crate::Server`] to run on top of it.
///
/// Implementations are expected to be cheap to clone (an `Arc`-backed
/// handle to a shared connection) and internally thread-safe; `rpcbus`
/// never attempts to serialize access to a `Broker` itself.
pub trait Broker: Send + Sync + 'static {
    /// Publishes an already-encoded envelope to `topic`.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), BrokerError>> + Send;
}

/// A single in-flight message delivered by a [`Broker`] subscription.
///
/// `rpcbus` takes control of acknowledgement explicitly: every handler
/// calls [`Message::disable_auto_response`] before doing anything else, then
/// drives the message to exactly one of `finish` or
/// `requeue_without_backoff` (never both, never neither).
pub trait Message: Clone + Send + Sync + 'static {
    /// The raw, still-encoded envelope bytes.
    fn body(&self) -> &[u8];

    /// Opts this message out of the broker's default auto-ack-on-return
    /// behaviour, so the handler is responsible for the terminal action.
    fn disable_auto_response(&self);

    /// Acknowledges the message; the broker will not redeliver it.
    fn finish(&self);

    /// Extends the broker's in-flight processing lease for this message,
    /// preventing it from being considered stalled and redelivered early.
    fn touch(&self);

    /// Returns the message to the broker to be redelivered after `delay`,
    /// bypassing the broker's normal exponential backoff.
    fn requeue_without_backoff(&self, delay: Duration);
}

/// Failure publishing to a [`Broker`].
#[derive(Debug, thiserror::Error)]
#[error("broker publish failed: {0}")]
pub struct BrokerError(pub String);

impl BrokerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
