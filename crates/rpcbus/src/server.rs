use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::{Broker, Message};
use crate::config::RpcConfig;
use crate::envelope::Envelope;

/// Context passed to [`AppHandler::serve`] for the duration of one request.
#[derive(Clone)]
pub struct ServeContext {
    cancellation: CancellationToken,
}

impl ServeContext {
    fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Resolves once the server is shutting down or this particular request
    /// has been asked to stand down.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// What an [`AppHandler`] decided to do with a request.
pub enum ServeOutcome {
    /// Succeed with this reply body.
    Reply(Vec<u8>),
    /// Fail with this application-level error message; still acked, still
    /// replied to (with the error populated).
    Error(String),
    /// Put the request back on the broker for someone else, or a later
    /// attempt, to pick up. No reply is published.
    Defer,
}

/// The application contract a [`Server`] dispatches decoded requests to.
pub trait AppHandler: Send + Sync + 'static {
    fn serve(
        &self,
        ctx: ServeContext,
        method: &str,
        body: Vec<u8>,
    ) -> impl Future<Output = ServeOutcome> + Send;
}

/// Failures handling an inbound request message. Non-fatal cases
/// (`Malformed`, `Expired`) mean the message was already finished and
/// dropped; `PublishReply` means it was left unfinished and the broker will
/// redeliver it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed request envelope: {0}")]
    Malformed(#[from] crate::envelope::EnvelopeError),
    #[error("request expired before it was served")]
    Expired,
    #[error("publishing reply failed: {0}")]
    PublishReply(#[from] crate::broker::BrokerError),
}

/// The RPC server dispatcher: decodes requests, runs the application
/// handler while keeping the broker message alive via periodic touches,
/// and publishes the reply (or requeues on cancellation/defer).
pub struct Server<H: AppHandler, B: Broker> {
    handler: H,
    broker: B,
    cancellation: CancellationToken,
    config: RpcConfig,
}

impl<H: AppHandler, B: Broker> Server<H, B> {
    pub fn new(handler: H, broker: B, cancellation: CancellationToken) -> Self {
        Self::with_config(handler, broker, cancellation, RpcConfig::default())
    }

    pub fn with_config(
        handler: H,
        broker: B,
        cancellation: CancellationToken,
        config: RpcConfig,
    ) -> Self {
        Self {
            handler,
            broker,
            cancellation,
            config,
        }
    }

    /// Handles one inbound request message delivered by a broker
    /// subscription on the server's request topic.
    pub async fn handle_message(&self, message: &impl Message) -> Result<(), DispatchError> {
        message.disable_auto_response();

        let request = match Envelope::decode(message.body()) {
            Ok(request) => request,
            Err(err) => {
                message.finish();
                warn!("failed to decode request envelope");
                return Err(err.into());
            }
        };

        if request.is_expired() {
            message.finish();
            debug!(correlation_id = request.correlation_id, "dropping expired request");
            return Err(DispatchError::Expired);
        }

        let touch_handle = self.spawn_touch_task(message);

        let ctx = ServeContext::new(self.cancellation.clone());
        let outcome = self.handler.serve(ctx.clone(), &request.method, request.body.clone()).await;

        touch_handle.abort();

        if ctx.is_cancelled() || matches!(outcome, ServeOutcome::Defer) {
            message.requeue_without_backoff(self.config.requeue_delay);
            debug!(correlation_id = request.correlation_id, "requeued request");
            return Ok(());
        }

        if request.reply_to.is_empty() {
            message.finish();
            return Ok(());
        }

        let (body, app_error) = match outcome {
            ServeOutcome::Reply(body) => (body, None),
            ServeOutcome::Error(msg) => (Vec::new(), Some(msg)),
            ServeOutcome::Defer => unreachable!("handled above"),
        };
        let reply = request.reply(body, app_error);

        match self.broker.publish(&request.reply_to, reply.encode()).await {
            Ok(()) => {
                message.finish();
                Ok(())
            }
            Err(err) => {
                error!(correlation_id = request.correlation_id, "failed to publish reply");
                Err(err.into())
            }
        }
    }

    fn spawn_touch_task(&self, message: &impl Message) -> tokio::task::JoinHandle<()> {
        let interval = self.config.touch_interval;
        let message = message.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                message.touch();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::envelope::Envelope;

    #[derive(Clone, Default)]
    struct FakeMessage {
        body: Vec<u8>,
        finished: Arc<AtomicBool>,
        touches: Arc<AtomicUsize>,
        requeued: Arc<Mutex<Option<Duration>>>,
    }

    impl FakeMessage {
        fn new(body: Vec<u8>) -> Self {
            Self {
                body,
                ..Default::default()
            }
        }
    }

    impl Message for FakeMessage {
        fn body(&self) -> &[u8] {
            &self.body
        }
        fn disable_auto_response(&self) {}
        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
        fn touch(&self) {
            self.touches.fetch_add(1, Ordering::SeqCst);
        }
        fn requeue_without_backoff(&self, delay: Duration) {
            *self.requeued.lock().unwrap() = Some(delay);
        }
    }

    #[derive(Clone)]
    struct FakeBroker {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        fail_publish: Arc<AtomicBool>,
    }

    impl FakeBroker {
        fn new() -> Self {
            Self {
                published: Arc::new(Mutex::new(Vec::new())),
                fail_publish: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Broker for FakeBroker {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), crate::broker::BrokerError> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(crate::broker::BrokerError::new("boom"));
            }
            self.published.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct EchoHandler;

    impl AppHandler for EchoHandler {
        async fn serve(&self, _ctx: ServeContext, _method: &str, body: Vec<u8>) -> ServeOutcome {
            ServeOutcome::Reply(body)
        }
    }

    struct ErrorHandler(String);

    impl AppHandler for ErrorHandler {
        async fn serve(&self, _ctx: ServeContext, _method: &str, _body: Vec<u8>) -> ServeOutcome {
            ServeOutcome::Error(self.0.clone())
        }
    }

    struct DeferHandler;

    impl AppHandler for DeferHandler {
        async fn serve(&self, _ctx: ServeContext, _method: &str, _body: Vec<u8>) -> ServeOutcome {
            ServeOutcome::Defer
        }
    }

    fn request(reply_to: &str, expires_at: i64) -> Envelope {
        Envelope {
            method: "echo".into(),
            reply_to: reply_to.into(),
            correlation_id: 7,
            expires_at,
            error: String::new(),
            body: b"hi".to_vec(),
        }
    }

    #[tokio::test]
    async fn replies_on_success_and_finishes() {
        let broker = FakeBroker::new();
        let server = Server::new(EchoHandler, broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        server.handle_message(&msg).await.unwrap();

        assert!(msg.finished.load(Ordering::SeqCst));
        let published = broker.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "rsp.topic");
        let reply = Envelope::decode(&published[0].1).unwrap();
        assert_eq!(reply.correlation_id, 7);
        assert_eq!(reply.body, b"hi");
        assert!(reply.error.is_empty());
    }

    #[tokio::test]
    async fn app_error_is_carried_in_reply() {
        let broker = FakeBroker::new();
        let server = Server::new(ErrorHandler("nope".into()), broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        server.handle_message(&msg).await.unwrap();

        let published = broker.published.lock().unwrap();
        let reply = Envelope::decode(&published[0].1).unwrap();
        assert_eq!(reply.error, "nope");
        assert!(msg.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_reply_topic_means_no_publish() {
        let broker = FakeBroker::new();
        let server = Server::new(EchoHandler, broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(request("", 0).encode());

        server.handle_message(&msg).await.unwrap();

        assert!(broker.published.lock().unwrap().is_empty());
        assert!(msg.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn malformed_request_is_finished_and_dropped() {
        let broker = FakeBroker::new();
        let server = Server::new(EchoHandler, broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(b"not json".to_vec());

        let err = server.handle_message(&msg).await.unwrap_err();

        assert!(matches!(err, DispatchError::Malformed(_)));
        assert!(msg.finished.load(Ordering::SeqCst));
        assert!(broker.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_request_is_finished_without_reply() {
        let broker = FakeBroker::new();
        let server = Server::new(EchoHandler, broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(request("rsp.topic", 1).encode());

        let err = server.handle_message(&msg).await.unwrap_err();

        assert!(matches!(err, DispatchError::Expired));
        assert!(msg.finished.load(Ordering::SeqCst));
        assert!(broker.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn defer_requeues_without_reply() {
        let broker = FakeBroker::new();
        let server = Server::with_config(
            DeferHandler,
            broker.clone(),
            CancellationToken::new(),
            RpcConfig {
                requeue_delay: Duration::from_millis(250),
                ..RpcConfig::default()
            },
        );
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        server.handle_message(&msg).await.unwrap();

        assert!(!msg.finished.load(Ordering::SeqCst));
        assert_eq!(*msg.requeued.lock().unwrap(), Some(Duration::from_millis(250)));
        assert!(broker.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_requeues_without_reply() {
        let broker = FakeBroker::new();
        let token = CancellationToken::new();
        token.cancel();
        let server = Server::new(EchoHandler, broker.clone(), token);
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        server.handle_message(&msg).await.unwrap();

        assert!(!msg.finished.load(Ordering::SeqCst));
        assert!(msg.requeued.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_failure_leaves_message_unfinished() {
        let broker = FakeBroker::new();
        broker.fail_publish.store(true, Ordering::SeqCst);
        let server = Server::new(EchoHandler, broker.clone(), CancellationToken::new());
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        let err = server.handle_message(&msg).await.unwrap_err();

        assert!(matches!(err, DispatchError::PublishReply(_)));
        assert!(!msg.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn touch_task_is_aborted_after_short_serve() {
        struct SlowHandler(Duration);
        impl AppHandler for SlowHandler {
            async fn serve(&self, _ctx: ServeContext, _method: &str, body: Vec<u8>) -> ServeOutcome {
                tokio::time::sleep(self.0).await;
                ServeOutcome::Reply(body)
            }
        }

        let broker = FakeBroker::new();
        let server = Server::with_config(
            SlowHandler(Duration::from_millis(20)),
            broker.clone(),
            CancellationToken::new(),
            RpcConfig {
                touch_interval: Duration::from_millis(5),
                ..RpcConfig::default()
            },
        );
        let msg = FakeMessage::new(request("rsp.topic", 0).encode());

        server.handle_message(&msg).await.unwrap();

        let after = msg.touches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(msg.touches.load(Ordering::SeqCst), after, "touch task kept running after serve returned");
    }
}
