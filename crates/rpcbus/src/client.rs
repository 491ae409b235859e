use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError, Message};
use crate::config::RpcConfig;
use crate::envelope::Envelope;
use crate::registry::{Registry, TakeOutcome};
use crate::topic::Topic;

/// Per-call knobs, bundling what a Go `context.Context` would carry for a
/// single RPC: an optional deadline and an optional cancellation signal.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancellation: None,
        }
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancellation: Some(cancellation),
        }
    }
}

/// The successful outcome of a [`Client::call`].
///
/// A reply can carry both a body and an application error; callers should
/// check `app_error` to tell success from an application-level failure
/// regardless of whether `body` is also populated.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub body: Vec<u8>,
    pub app_error: Option<String>,
}

/// Failure modes of [`Client::call`]/[`Client::call_topic`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("publishing request failed: {0}")]
    Publish(#[from] BrokerError),
    #[error("call deadline exceeded before a reply arrived")]
    DeadlineExceeded,
    #[error("call was cancelled before a reply arrived")]
    Cancelled,
}

/// Failures handling an inbound reply message. Non-fatal: the broker
/// subscription loop logs these and moves on, it does not redeliver.
#[derive(Debug, thiserror::Error)]
pub enum ClientHandleError {
    #[error("malformed reply envelope: {0}")]
    Malformed(#[from] crate::envelope::EnvelopeError),
    #[error("no pending call found for correlation id {0}")]
    SubscriberNotFound(u32),
}

/// The RPC client correlator: mints correlation ids, publishes requests,
/// and routes inbound replies back to the caller awaiting them.
///
/// A single `Client` instance is safe to share (e.g. behind an `Arc`) across
/// any number of concurrent [`Client::call`] invocations, and its
/// [`Client::handle_message`] is safe to invoke concurrently with them.
pub struct Client<B: Broker> {
    broker: B,
    req_topic: Topic,
    rsp_topic: Topic,
    next_id: AtomicU32,
    registry: Registry,
    default_call_timeout: Option<std::time::Duration>,
}

impl<B: Broker> Client<B> {
    /// Builds a client that publishes requests to `req_topic` by default and
    /// expects replies to be published back on `rsp_topic`.
    pub fn new(broker: B, req_topic: Topic, rsp_topic: Topic) -> Self {
        Self::with_config(broker, req_topic, rsp_topic, RpcConfig::default())
    }

    /// Builds a client the way [`Client::new`] does, additionally taking a
    /// [`crate::RpcConfig`] whose `default_call_timeout` is applied to any
    /// [`Client::call`]/[`Client::call_topic`] invocation that does not
    /// supply its own [`CallOptions::timeout`].
    pub fn with_config(
        broker: B,
        req_topic: Topic,
        rsp_topic: Topic,
        config: RpcConfig,
    ) -> Self {
        Self {
            broker,
            req_topic,
            rsp_topic,
            next_id: AtomicU32::new(rand::random()),
            registry: Registry::new(),
            default_call_timeout: config.default_call_timeout,
        }
    }

    /// Issues a call on this client's default request topic.
    pub async fn call(
        &self,
        method: &str,
        body: Vec<u8>,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let req_topic = self.req_topic.clone();
        self.call_topic(&req_topic, method, body, options).await
    }

    /// Issues a call on an explicit request topic, for clients that
    /// multiplex several server pools behind one correlator.
    pub async fn call_topic(
        &self,
        req_topic: &Topic,
        method: &str,
        body: Vec<u8>,
        options: CallOptions,
    ) -> Result<CallResponse, CallError> {
        let id = self.next_correlation_id();
        let timeout = options.timeout.or(self.default_call_timeout);
        let expires_at = timeout.map(deadline_unix_seconds).unwrap_or(0);
        let request = Envelope {
            method: method.to_string(),
            reply_to: self.rsp_topic.as_str().to_string(),
            correlation_id: id,
            expires_at,
            error: String::new(),
            body,
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.registry.add(id, tx);

        if let Err(err) = self.broker.publish(req_topic.as_str(), request.encode()).await {
            self.registry.take(id);
            return Err(CallError::Publish(err));
        }

        let outcome = match (timeout, options.cancellation) {
            (Some(timeout), Some(token)) => {
                tokio::select! {
                    reply = rx => reply.ok().map(Ok),
                    _ = tokio::time::sleep(timeout) => Some(Err(CallError::DeadlineExceeded)),
                    _ = token.cancelled() => Some(Err(CallError::Cancelled)),
                }
            }
            (Some(timeout), None) => {
                tokio::select! {
                    reply = rx => reply.ok().map(Ok),
                    _ = tokio::time::sleep(timeout) => Some(Err(CallError::DeadlineExceeded)),
                }
            }
            (None, Some(token)) => {
                tokio::select! {
                    reply = rx => reply.ok().map(Ok),
                    _ = token.cancelled() => Some(Err(CallError::Cancelled)),
                }
            }
            (None, None) => rx.await.ok().map(Ok),
        };

        match outcome {
            Some(Ok(reply)) => Ok(CallResponse {
                body: reply.body,
                app_error: if reply.error.is_empty() {
                    None
                } else {
                    Some(reply.error)
                },
            }),
            Some(Err(err)) => {
                self.registry.abandon(id);
                Err(err)
            }
            None => {
                // The sender was dropped without sending: treat like the
                // caller gave up, there is nothing useful to return.
                self.registry.abandon(id);
                Err(CallError::DeadlineExceeded)
            }
        }
    }

    /// Handles an inbound reply message delivered by a broker subscription
    /// on this client's response topic.
    pub async fn handle_message(&self, message: &impl Message) -> Result<(), ClientHandleError> {
        message.disable_auto_response();

        let reply = match Envelope::decode(message.body()) {
            Ok(reply) => reply,
            Err(err) => {
                message.finish();
                return Err(err.into());
            }
        };

        match self.registry.take(reply.correlation_id) {
            Some(TakeOutcome::Waiting(tx)) => {
                // If the receiver was already dropped (caller raced us into
                // giving up) sending fails silently; nothing else to do.
                let _ = tx.send(reply);
                message.finish();
                Ok(())
            }
            Some(TakeOutcome::Abandoned) => {
                debug!(correlation_id = reply.correlation_id, "dropping reply for abandoned call");
                message.finish();
                Ok(())
            }
            None => {
                message.finish();
                warn!(correlation_id = reply.correlation_id, "reply for unknown call");
                Err(ClientHandleError::SubscriberNotFound(reply.correlation_id))
            }
        }
    }

    fn next_correlation_id(&self) -> u32 {
        // Atomic unsigned addition always wraps; a fetch_add here gives the
        // same serialization as the original's mutex-guarded counter
        // without taking a lock.
        self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Converts a relative timeout into an absolute Unix-seconds deadline,
/// truncating exactly once: the timeout is added to the current instant
/// first, and only the resulting deadline is rounded (up, so the caller's
/// full budget is honoured) to whole seconds. Adding `now_unix()` to a
/// separately-truncated `d.as_secs()` would truncate twice and could
/// understate a sub-second timeout down to zero.
fn deadline_unix_seconds(d: Duration) -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let deadline = SystemTime::now() + d;
    match deadline.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => {
            let secs = since_epoch.as_secs() as i64;
            if since_epoch.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        }
        Err(_) => 0,
    }
}
