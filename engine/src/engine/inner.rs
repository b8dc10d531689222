use super::{
    messages::EngineMessage,
    EngineState,
};
use crate::{
    parse::{
        parse_evolution,
        parse_players,
        parse_tick,
        EVOLUTION_COMMAND,
        PLAYERS_COMMAND,
        TICK_COMMAND,
    },
    smoothing::{
        RateSmoother,
        TelemetrySample,
    },
    GatheredSnapshot,
    TelemetryError,
};
use chrono::Utc;
use rcon_telemetry_config::TelemetryConfig;
use rcon_telemetry_rcon::{
    Connection,
    RconError,
};
use std::collections::BTreeMap;
use tokio::{
    sync::{
        mpsc::UnboundedReceiver,
        watch,
    },
    time::Instant,
};

/// Owns the connection and the smoothing state. Requests are handled one at
/// a time in arrival order, so there is never more than one command in flight.
pub(super) struct EngineInner {
    server_id: String,
    connection: Box<dyn Connection>,
    smoother: RateSmoother,
    state: watch::Sender<EngineState>,
}

impl EngineInner {
    pub(super) fn new(
        server_id: String,
        connection: Box<dyn Connection>,
        telemetry: TelemetryConfig,
        state: watch::Sender<EngineState>,
    ) -> Self {
        Self {
            server_id,
            connection,
            smoother: RateSmoother::new(telemetry),
            state,
        }
    }

    #[instrument(level = "debug", skip_all, fields(server = %self.server_id))]
    pub(super) async fn run(mut self, mut receiver: UnboundedReceiver<EngineMessage>) {
        while let Some(message) = receiver.recv().await {
            trace!("Handling {message}");
            match message {
                EngineMessage::SampleRate(reply) => {
                    let _ = reply.send(self.sample_rate().await);
                }
                EngineMessage::EvolutionBySurface(reply) => {
                    let _ = reply.send(self.evolution_by_surface().await);
                }
                EngineMessage::PlayerList(reply) => {
                    let _ = reply.send(self.player_list().await);
                }
                EngineMessage::GatherAll(reply) => {
                    let _ = reply.send(self.gather_all().await);
                }
                EngineMessage::Reconnect(reply) => {
                    let _ = reply.send(self.reconnect().await);
                }
                EngineMessage::Close(reply) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        self.connection.close().await;
        self.state.send_modify(|state| {
            state.running = false;
            state.connected = false;
        });
        debug!(server = %self.server_id, "Telemetry engine closed");
    }

    async fn execute(&mut self, command: &str) -> Result<String, TelemetryError> {
        let result = self.connection.execute(command).await;
        let connected = self.connection.is_connected();
        self.state.send_if_modified(|state| {
            let error = result.as_ref().err().map(ToString::to_string);
            let changed = state.connected != connected || state.last_error != error;
            state.connected = connected;
            state.last_error = error;
            changed
        });
        Ok(result?)
    }

    async fn sample_rate(&mut self) -> Result<TelemetrySample, TelemetryError> {
        let response = self.execute(TICK_COMMAND).await?;
        let tick = parse_tick(&response)?;
        let sample = self.smoother.observe(tick, Instant::now());
        self.state.send_modify(|state| {
            state.samples_taken += 1;
            state.last_sample = Some(sample.clone());
        });
        Ok(sample)
    }

    async fn evolution_by_surface(&mut self) -> Result<BTreeMap<String, f64>, TelemetryError> {
        let response = self.execute(EVOLUTION_COMMAND).await?;
        parse_evolution(&response)
    }

    async fn player_list(&mut self) -> Result<Vec<String>, TelemetryError> {
        let response = self.execute(PLAYERS_COMMAND).await?;
        parse_players(&response)
    }

    async fn gather_all(&mut self) -> Result<GatheredSnapshot, TelemetryError> {
        if !self.connection.is_connected() {
            return Err(RconError::NotConnected.into());
        }

        let rate = self.sample_rate().await.into();
        let evolution = self.evolution_by_surface().await.into();
        let players = self.player_list().await.into();

        Ok(GatheredSnapshot {
            server_id: self.server_id.clone(),
            gathered_at: Utc::now(),
            rate,
            evolution,
            players,
        })
    }

    async fn reconnect(&mut self) -> Result<(), TelemetryError> {
        info!(server = %self.server_id, endpoint = %self.connection.endpoint(), "Reconnecting");
        self.connection.close().await;
        let result = self.connection.connect().await;
        let connected = self.connection.is_connected();
        self.state.send_modify(|state| {
            state.connected = connected;
            state.last_error = result.as_ref().err().map(ToString::to_string);
        });
        Ok(result?)
    }
}
