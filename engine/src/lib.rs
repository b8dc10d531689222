//! # Telemetry and alerting
//!
//! Per managed server:
//!
//! - **`TelemetryEngine`**: actor owning the server's RCON connection and the
//!   tick rate smoothing state. Every query goes through it, one at a time.
//! - **`Publisher`**: posts a formatted snapshot on a fixed interval.
//! - **`Monitor`**: samples on its own interval and raises or retracts a
//!   performance alert, with hysteresis and a cooldown.
//!
//! The **`ServerCoordinator`** builds these for every configured server and
//! tears them down again.

#[macro_use]
extern crate tracing;

pub mod alert;
mod coordinator;
mod engine;
mod error;
mod factory;
mod monitor;
pub mod parse;
pub mod publisher;
pub mod sink;
pub mod smoothing;
mod snapshot;

#[cfg(test)]
mod test_support;

pub use alert::{
    AlertEvent,
    AlertKind,
    AlertState,
    AlertTracker,
};
pub use coordinator::{
    ServerCoordinator,
    ServerStatus,
};
pub use engine::{
    EngineState,
    TelemetryEngine,
};
pub use error::{
    CoordinatorError,
    TelemetryError,
};
pub use factory::{
    RconServerFactory,
    ServerFactory,
};
pub use monitor::Monitor;
pub use publisher::Publisher;
pub use sink::{
    NotificationSink,
    SinkError,
    StructuredMessage,
};
pub use smoothing::TelemetrySample;
pub use snapshot::{
    Field,
    GatheredSnapshot,
};
