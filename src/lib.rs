#[macro_use]
extern crate tracing;

mod app;
mod logging;

pub use app::App;
pub use logging::{
    init_errors,
    init_logging,
};
pub use rcon_telemetry_config::Args;
