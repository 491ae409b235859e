use rpcbus::{AppHandler, ServeContext, ServeOutcome};

/// Demo application handler: echoes the request body back, unless
/// constructed with `fail = true`, in which case it always reports an
/// application-level error.
pub struct DemoHandler {
    fail: bool,
}

impl DemoHandler {
    pub fn new(fail: bool) -> Self {
        Self { fail }
    }
}

impl AppHandler for DemoHandler {
    async fn serve(&self, _ctx: ServeContext, method: &str, body: Vec<u8>) -> ServeOutcome {
        if self.fail {
            return ServeOutcome::Error(format!("demo handler configured to fail for {method:?}"));
        }
        ServeOutcome::Reply(body)
    }
}
