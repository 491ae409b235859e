#![forbid(unsafe_code)]
//! `rpcbus` turns a fire-and-forget pub/sub broker into a request/response
//! RPC facility.
//!
//! The broker itself only understands one-way messages with at-least-once
//! delivery: publish to a topic, subscribe to a topic, ack/finish a
//! delivered message, extend its processing lease ("touch"), or requeue it
//! with a delay. This crate layers synchronous call semantics on top:
//!
//! - [`Client`] mints a correlation id, publishes a request carrying a reply
//!   topic, and blocks the caller until a matching reply arrives or the
//!   call's deadline/cancellation fires.
//! - [`Server`] decodes inbound requests, keeps the underlying broker
//!   message alive while an [`AppHandler`] runs, and publishes the reply (or
//!   requeues the request if the handler asks to defer, or the server is
//!   shutting down).
//! - [`Envelope`] is the wire format both sides speak: a short JSON header
//!   followed by one newline byte followed by an opaque body.
//!
//! Bringing your own broker means implementing [`Broker`] and [`Message`];
//! the `rpcbus-broker` crate provides an in-process reference
//! implementation for tests and demos.
//!
//! ```no_run
//! use rpcbus::{Client, CallOptions, Topic};
//! # use rpcbus::Broker;
//! # async fn run(broker: impl Broker) {
//! let req_topic = Topic::new("rpc.request").unwrap();
//! let rsp_topic = Topic::new("rpc.response.worker-1").unwrap();
//! let client = Client::new(broker, req_topic, rsp_topic);
//! let response = client.call("echo", b"hi".to_vec(), CallOptions::default()).await;
//! # let _ = response;
//! # }
//! ```

mod broker;
mod client;
mod config;
mod envelope;
mod registry;
mod server;
mod topic;

pub use broker::{Broker, BrokerError, Message};
pub use client::{CallError, CallOptions, CallResponse, Client, ClientHandleError};
pub use config::RpcConfig;
pub use envelope::{Envelope, EnvelopeError};
pub use server::{AppHandler, DispatchError, Server, ServeContext, ServeOutcome};
pub use topic::{Topic, TopicError};
