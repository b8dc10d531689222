use crate::{
    smoothing::TelemetrySample,
    GatheredSnapshot,
    TelemetryError,
};
use derive_more::Display;
use std::collections::BTreeMap;
use tokio::sync::oneshot;

pub(super) type Reply<T> = oneshot::Sender<Result<T, TelemetryError>>;

#[derive(Display)]
pub(super) enum EngineMessage {
    #[display("SampleRate")]
    SampleRate(Reply<TelemetrySample>),
    #[display("EvolutionBySurface")]
    EvolutionBySurface(Reply<BTreeMap<String, f64>>),
    #[display("PlayerList")]
    PlayerList(Reply<Vec<String>>),
    #[display("GatherAll")]
    GatherAll(Reply<GatheredSnapshot>),
    #[display("Reconnect")]
    Reconnect(Reply<()>),
    #[display("Close")]
    Close(oneshot::Sender<()>),
}
