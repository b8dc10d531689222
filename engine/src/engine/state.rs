use crate::smoothing::TelemetrySample;
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub running: bool,
    pub connected: bool,
    pub samples_taken: u64,
    pub last_sample: Option<TelemetrySample>,
    pub last_error: Option<String>,
}
