#![forbid(unsafe_code)]
//! CLI demo wiring an [`rpcbus::Client`], an [`rpcbus::Server`] and the
//! in-process [`rpcbus_broker::InMemoryBroker`] together.
//!
//! Runs a server that echoes requests back (or, with `--fail`, always
//! returns an application error) and issues one call against it, printing
//! the outcome.

mod handler;

use std::time::Duration;

use clap::Parser;
use rpcbus::{CallOptions, Client, RpcConfig, Server, Topic};
use rpcbus_broker::{run_subscription, InMemoryBroker};
use tokio_util::sync::CancellationToken;

use handler::DemoHandler;

const REQUEST_TOPIC: &str = "rpcbus.demo.request";
const RESPONSE_TOPIC: &str = "rpcbus.demo.response";

#[derive(Parser, Debug)]
#[command(name = "rpcbus-demo", about = "Demonstrates the rpcbus request/response layer")]
struct Args {
    /// Method name to invoke on the demo server.
    #[arg(long, default_value = "echo")]
    method: String,

    /// Request body, sent and echoed back verbatim (unless --fail).
    #[arg(long, default_value = "hello from rpcbus")]
    body: String,

    /// Make the demo server always return an application error.
    #[arg(long)]
    fail: bool,

    /// Call timeout, in milliseconds. Falls back to
    /// `RpcConfig::default_call_timeout` (itself overridable via
    /// `RPCBUS_DEFAULT_CALL_TIMEOUT_MS`) when not given.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let config = RpcConfig::from_env();

    let broker = InMemoryBroker::new();
    let req_topic = Topic::new(REQUEST_TOPIC).expect("static topic name is valid");
    let rsp_topic = Topic::new(RESPONSE_TOPIC).expect("static topic name is valid");

    let server_cancel = CancellationToken::new();
    let request_sub = broker.subscribe(req_topic.as_str());
    let server = std::sync::Arc::new(Server::with_config(
        DemoHandler::new(args.fail),
        broker.clone(),
        server_cancel.clone(),
        config.clone(),
    ));
    let server_task = {
        let server = server.clone();
        let cancel = server_cancel.clone();
        let requeue_delay = config.requeue_delay;
        tokio::spawn(async move {
            run_subscription(request_sub, cancel, requeue_delay, |message| {
                let server = server.clone();
                async move {
                    if let Err(err) = server.handle_message(&message).await {
                        tracing::debug!(%err, "server dispatch reported a non-fatal error");
                    }
                }
            })
            .await;
        })
    };

    let response_sub = broker.subscribe(rsp_topic.as_str());
    let client = std::sync::Arc::new(Client::with_config(broker.clone(), req_topic, rsp_topic, config.clone()));
    let client_cancel = CancellationToken::new();
    let client_task = {
        let client = client.clone();
        let cancel = client_cancel.clone();
        let requeue_delay = config.requeue_delay;
        tokio::spawn(async move {
            run_subscription(response_sub, cancel, requeue_delay, |message| {
                let client = client.clone();
                async move {
                    if let Err(err) = client.handle_message(&message).await {
                        tracing::debug!(%err, "client inbound handling reported a non-fatal error");
                    }
                }
            })
            .await;
        })
    };

    let options = match args.timeout_ms {
        Some(ms) => CallOptions::with_timeout(Duration::from_millis(ms)),
        // No --timeout-ms given: let the client fall back to
        // `config.default_call_timeout` (None means no deadline at all).
        None => CallOptions::default(),
    };
    let outcome = client.call(&args.method, args.body.into_bytes(), options).await;

    match outcome {
        Ok(response) => match response.app_error {
            Some(app_error) => println!("application error: {app_error}"),
            None => println!("reply: {}", String::from_utf8_lossy(&response.body)),
        },
        Err(err) => println!("call failed: {err}"),
    }

    client_cancel.cancel();
    server_cancel.cancel();
    let _ = client_task.await;
    let _ = server_task.await;
}
