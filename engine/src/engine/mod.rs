use crate::{
    smoothing::TelemetrySample,
    GatheredSnapshot,
    TelemetryError,
};
use messages::{
    EngineMessage,
    Reply,
};
use rcon_telemetry_config::TelemetryConfig;
use rcon_telemetry_rcon::Connection;
use std::{
    collections::BTreeMap,
    sync::Arc,
};
use tokio::sync::{
    mpsc::{
        unbounded_channel,
        UnboundedSender,
    },
    oneshot,
    watch,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

mod inner;
mod messages;
mod state;

use inner::EngineInner;
pub use state::EngineState;

/// Handle to the telemetry engine of one server.
///
/// The engine task exclusively owns the server's [`Connection`]. Clones of the
/// handle queue their requests to that task, which runs them one after the
/// other. When the last clone is dropped the task is cancelled.
#[derive(Debug, Clone)]
pub struct TelemetryEngine {
    pub server_id: String,
    pub endpoint: String,
    pub state: watch::Receiver<EngineState>,
    _engine_task_guard: Arc<DropGuard>,
    sender: UnboundedSender<EngineMessage>,
}

impl TelemetryEngine {
    /// Spawns the engine task. The connection is expected to be connected
    /// already; the engine never connects on its own except through
    /// [`TelemetryEngine::reconnect`].
    pub fn spawn(server_id: impl Into<String>, connection: Box<dyn Connection>, telemetry: TelemetryConfig) -> Self {
        let server_id = server_id.into();
        let endpoint = connection.endpoint();
        let (sender, receiver) = unbounded_channel::<EngineMessage>();
        let task_cancellation_token = CancellationToken::new();
        let task_cancellation_guard = task_cancellation_token.clone().drop_guard();
        let (state_sender, state_receiver) = watch::channel(EngineState {
            running: true,
            connected: connection.is_connected(),
            ..Default::default()
        });

        let inner = EngineInner::new(server_id.clone(), connection, telemetry, state_sender);

        tokio::task::spawn({
            let server_id = server_id.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = task_cancellation_token.cancelled() => {},
                    _ = inner.run(receiver) => {},
                };
                debug!(server = %server_id, "Telemetry engine task finished");
            }
        });

        Self {
            server_id,
            endpoint,
            state: state_receiver,
            _engine_task_guard: Arc::new(task_cancellation_guard),
            sender,
        }
    }

    async fn request<T>(&self, message: impl FnOnce(Reply<T>) -> EngineMessage) -> Result<T, TelemetryError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(message(reply))
            .map_err(|_| TelemetryError::EngineStopped)?;
        response.await.map_err(|_| TelemetryError::EngineStopped)?
    }

    /// Reads the tick counter and advances the smoothing state.
    pub async fn sample_rate(&self) -> Result<TelemetrySample, TelemetryError> {
        self.request(EngineMessage::SampleRate).await
    }

    pub async fn evolution_by_surface(&self) -> Result<BTreeMap<String, f64>, TelemetryError> {
        self.request(EngineMessage::EvolutionBySurface).await
    }

    pub async fn player_list(&self) -> Result<Vec<String>, TelemetryError> {
        self.request(EngineMessage::PlayerList).await
    }

    pub async fn player_count(&self) -> Result<usize, TelemetryError> {
        Ok(self.player_list().await?.len())
    }

    /// Rate, evolution and players in one pass. Fails only if the connection
    /// is down before the first command; later failures mark single fields
    /// unavailable.
    pub async fn gather_all(&self) -> Result<GatheredSnapshot, TelemetryError> {
        self.request(EngineMessage::GatherAll).await
    }

    pub async fn reconnect(&self) -> Result<(), TelemetryError> {
        self.request(EngineMessage::Reconnect).await
    }

    pub fn is_connected(&self) -> bool {
        let state = self.state.borrow();
        state.running && state.connected
    }

    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Closes the connection and stops the engine task. Requests queued
    /// before the call are still answered.
    pub async fn close(&self) {
        if !self.is_running() {
            debug!(server = %self.server_id, "Engine already closed");
            return;
        }
        let (reply, done) = oneshot::channel();
        if self.sender.send(EngineMessage::Close(reply)).is_ok() {
            let _ = done.await;
        } else {
            debug!(server = %self.server_id, "Engine task already gone");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        test_support::{
            FakeGame,
            ScriptedConnection,
        },
        Field,
    };
    use pretty_assertions::assert_eq;
    use rcon_telemetry_rcon::RconError;
    use std::time::Duration;

    fn telemetry() -> TelemetryConfig {
        TelemetryConfig {
            ema_alpha: 0.5,
            sma_window: 4,
            nominal_rate: 60.0,
        }
    }

    fn engine(game: &FakeGame) -> TelemetryEngine {
        TelemetryEngine::spawn("nauvis", Box::new(ScriptedConnection::connected(game)), telemetry())
    }

    #[tokio::test(start_paused = true)]
    async fn samples_rate_through_the_connection() {
        let game = FakeGame::new(30);
        let engine = engine(&game);

        let first = engine.sample_rate().await.unwrap();
        assert!(first.provisional);
        assert_eq!(first.ema_rate, 60.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = engine.sample_rate().await.unwrap();
        assert_eq!(second.raw_rate, Some(30.0));
        assert_eq!(second.ema_rate, 30.0);

        assert_eq!(engine.state.borrow().samples_taken, 2);
        assert_eq!(game.commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_game_is_detected() {
        let game = FakeGame::new(60);
        let engine = engine(&game);
        engine.sample_rate().await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let running = engine.sample_rate().await.unwrap();

        game.set_tick_step(0);
        tokio::time::advance(Duration::from_secs(1)).await;
        let paused = engine.sample_rate().await.unwrap();

        assert!(paused.paused);
        assert_eq!(paused.last_known_rate, running.ema_rate);
        assert_eq!(paused.ema_rate, running.ema_rate);
    }

    #[tokio::test(start_paused = true)]
    async fn gather_all_degrades_per_field() {
        let game = FakeGame::new(60);
        game.set_evolution(Ok("garbage".to_string()));
        let engine = engine(&game);

        let snapshot = engine.gather_all().await.unwrap();

        assert!(snapshot.rate.is_available());
        assert!(matches!(snapshot.evolution, Field::Unavailable(_)));
        assert_eq!(snapshot.players, Field::Available(vec!["alice".to_string()]));
        assert_eq!(engine.player_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_is_reported_and_not_retried() {
        let game = FakeGame::new(60);
        let engine = engine(&game);
        assert!(engine.is_connected());

        game.fail_next_tick(RconError::Timeout(Duration::from_secs(10)));
        let err = engine.sample_rate().await.unwrap_err();
        assert_eq!(err, TelemetryError::Rcon(RconError::Timeout(Duration::from_secs(10))));
        assert!(!engine.is_connected());

        assert_eq!(engine.gather_all().await.unwrap_err(), TelemetryError::Rcon(RconError::NotConnected));
        assert_eq!(game.connects(), 0);

        engine.reconnect().await.unwrap();
        assert!(engine.is_connected());
        assert_eq!(game.connects(), 1);
        assert!(engine.sample_rate().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialized() {
        let game = FakeGame::new(60);
        let engine = engine(&game);

        let (a, b, c) = tokio::join!(engine.gather_all(), engine.sample_rate(), engine.evolution_by_surface());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(game.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_closes_the_connection() {
        let game = FakeGame::new(60);
        let engine = engine(&game);
        let other = engine.clone();

        engine.close().await;

        assert!(game.closed());
        assert!(!other.is_running());
        assert_eq!(other.sample_rate().await.unwrap_err(), TelemetryError::EngineStopped);
        // idempotent
        other.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn engines_do_not_share_state() {
        let fast = FakeGame::new(60);
        let slow = FakeGame::new(10);
        let fast_engine = engine(&fast);
        let slow_engine = TelemetryEngine::spawn("gleba", Box::new(ScriptedConnection::connected(&slow)), telemetry());

        for _ in 0..3 {
            fast_engine.sample_rate().await.unwrap();
            slow_engine.sample_rate().await.unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let fast_sample = fast_engine.sample_rate().await.unwrap();
        let slow_sample = slow_engine.sample_rate().await.unwrap();
        assert_eq!(fast_sample.ema_rate, 60.0);
        assert_eq!(slow_sample.ema_rate, 10.0);
    }
}
