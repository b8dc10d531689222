//! # RCON connection
//!
//! One long-lived, authenticated remote-console session per game server.
//!
//! - **`packet`**: Source-RCON framing (size, id, type, body).
//! - **`RconClient`**: TCP implementation with bounded connect/command timeouts.
//! - **`Connection`**: the seam the telemetry engine talks to, so tests can
//!   swap in scripted connections.

#[macro_use]
extern crate tracing;

mod client;
mod connection;
mod error;
pub mod packet;

pub use client::{
    RconClient,
    RconEndpoint,
};
pub use connection::Connection;
pub use error::RconError;
