use rcon_telemetry_rcon::RconError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error(transparent)]
    Rcon(#[from] RconError),
    #[error("Unexpected {what} response: {reason}")]
    Parse { what: &'static str, reason: String },
    #[error("Telemetry engine has stopped")]
    EngineStopped,
}

impl TelemetryError {
    pub(crate) fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            what,
            reason: reason.into(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Server {0:?} is already registered")]
    DuplicateServer(String),
    #[error("Unknown server {0:?}")]
    UnknownServer(String),
    #[error("Invalid configuration for server {id:?}: {reason}")]
    InvalidConfig { id: String, reason: String },
    #[error("The coordinator is shutting down")]
    ShuttingDown,
    #[error("Could not connect server {id:?}: {source}")]
    Connect { id: String, source: RconError },
    #[error("Could not reconnect server {id:?}: {source}")]
    Reconnect { id: String, source: TelemetryError },
}
