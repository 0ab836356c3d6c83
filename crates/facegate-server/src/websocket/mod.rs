//! WebSocket connection state and the per-connection session loop.
//!
//! `session` owns a connection from upgrade to teardown: it registers it,
//! decodes inbound frames, admits and spawns forward calls, forwards queued
//! outbound messages, pings, and finally cancels pending work and unregisters.

pub mod connection;
pub mod session;
