use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RconError {
    #[error("Unable to reach {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("The server at {endpoint} rejected the RCON password")]
    Authentication { endpoint: String },
    #[error("Not connected")]
    NotConnected,
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Malformed RCON packet: {0}")]
    Protocol(String),
}
