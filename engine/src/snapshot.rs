use crate::{
    smoothing::TelemetrySample,
    TelemetryError,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// A value that was either gathered or explicitly could not be.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Available(value) => Some(value),
            Field::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Field::Available(_))
    }
}

impl<T> From<Result<T, TelemetryError>> for Field<T> {
    fn from(result: Result<T, TelemetryError>) -> Self {
        match result {
            Ok(value) => Field::Available(value),
            Err(err) => Field::Unavailable(err.to_string()),
        }
    }
}

/// Everything `gather_all` could collect in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatheredSnapshot {
    pub server_id: String,
    pub gathered_at: DateTime<Utc>,
    pub rate: Field<TelemetrySample>,
    pub evolution: Field<BTreeMap<String, f64>>,
    pub players: Field<Vec<String>>,
}

impl GatheredSnapshot {
    pub fn is_empty(&self) -> bool {
        !self.rate.is_available() && !self.evolution.is_available() && !self.players.is_available()
    }
}
