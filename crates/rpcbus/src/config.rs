use std::time::Duration;

/// Tunables shared by [`crate::Server`] (touch/requeue timing) and callers
/// that want a default deadline baked into a [`crate::Client`] wrapper.
///
/// Mirrors the defaults recommended by the original nsq-rpc design: a touch
/// interval comfortably below common broker in-flight timeouts (60s), and a
/// short fixed requeue delay for deferred/cancelled work.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// How often an in-flight request's lease is extended while the
    /// application handler runs. Must stay below the broker's own in-flight
    /// timeout or messages will be redelivered mid-processing.
    pub touch_interval: Duration,
    /// Delay applied when a request is requeued without backoff (on
    /// dispatcher cancellation or `ServeOutcome::Defer`).
    pub requeue_delay: Duration,
    /// Default timeout applied to [`crate::Client::call`] when the caller
    /// does not supply one via [`crate::CallOptions`].
    pub default_call_timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            touch_interval: Duration::from_secs(45),
            requeue_delay: Duration::from_secs(1),
            default_call_timeout: None,
        }
    }
}

impl RpcConfig {
    /// Starts from [`RpcConfig::default`] and applies overrides from
    /// environment variables, for binaries that want the tunables
    /// configurable without a config file:
    ///
    /// - `RPCBUS_TOUCH_INTERVAL_MS`
    /// - `RPCBUS_REQUEUE_DELAY_MS`
    /// - `RPCBUS_DEFAULT_CALL_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("RPCBUS_TOUCH_INTERVAL_MS") {
            cfg.touch_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("RPCBUS_REQUEUE_DELAY_MS") {
            cfg.requeue_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("RPCBUS_DEFAULT_CALL_TIMEOUT_MS") {
            cfg.default_call_timeout = Some(Duration::from_millis(ms));
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
