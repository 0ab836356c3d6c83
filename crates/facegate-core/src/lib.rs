//! # facegate-core
//!
//! Shared vocabulary for the facegate gateway:
//!
//! - **IDs**: [`ConnectionId`], unique for the lifetime of the process
//! - **Request kinds**: [`RequestKind`] distinguishes the recognition and chat lanes
//! - **Messages**: [`InboundRequest`] and [`OutboundResult`]
//! - **Codec**: [`codec::decode`] / [`codec::encode`] for the JSON wire schema
//! - **Errors**: [`DecodeError`] and the client-visible [`FailureKind`]
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;

pub use errors::{DecodeError, FailureKind};
pub use ids::ConnectionId;
pub use messages::{Failure, InboundRequest, Outcome, OutboundResult, RequestKind};
