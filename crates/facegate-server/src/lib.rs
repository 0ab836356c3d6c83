//! # facegate-server
//!
//! Real-time coordination gateway between browser clients and the two
//! inference backends.
//!
//! - [`registry`]: live connections, keyed by [`ConnectionId`](facegate_core::ConnectionId)
//! - [`sequencer`]: at most one in-flight request per connection per kind
//! - [`forwarder`]: backend calls raced against a deadline and a cancel token
//! - [`dispatcher`]: delivers a result only while its connection is live
//! - [`websocket`]: per-connection session (read loop, writer, heartbeat)
//! - [`proxy`]: passthrough REST surface onto the recognition service
//! - [`server`]: Axum router and listener composing the above

#![deny(unsafe_code)]

pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod sequencer;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::ServerError;
pub use server::GatewayServer;
