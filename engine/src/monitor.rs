use crate::{
    alert::{
        AlertState,
        AlertTracker,
    },
    sink::{
        deliver,
        NotificationSink,
    },
    TelemetryEngine,
};
use rcon_telemetry_config::AlertConfig;
use std::sync::Arc;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Samples the engine on its own interval and turns threshold crossings into
/// notifications.
#[derive(Debug)]
pub struct Monitor {
    engine: TelemetryEngine,
    sink: Arc<dyn NotificationSink>,
    config: AlertConfig,
    tracker: AlertTracker,
    state: watch::Sender<AlertState>,
}

impl Monitor {
    pub fn new(
        engine: TelemetryEngine,
        sink: Arc<dyn NotificationSink>,
        config: AlertConfig,
    ) -> (Self, watch::Receiver<AlertState>) {
        let (state, receiver) = watch::channel(AlertState::default());
        let monitor = Self {
            engine,
            sink,
            config,
            tracker: AlertTracker::new(config),
            state,
        };
        (monitor, receiver)
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::task::spawn(self.run(token))
    }

    #[instrument(level = "debug", skip_all, fields(server = %self.engine.server_id))]
    async fn run(mut self, token: CancellationToken) {
        debug!(
            interval = %humantime::format_duration(self.config.check_interval),
            "Alert monitor started"
        );
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.check() => {},
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {},
            }
        }
        debug!("Alert monitor stopped");
    }

    async fn check(&mut self) {
        let server_id = self.engine.server_id.clone();
        let sample = match self.engine.sample_rate().await {
            Ok(sample) => sample,
            Err(err) => {
                warn!(server = %server_id, "Skipping alert check: {err}");
                return;
            }
        };

        let event = self.tracker.observe(&sample, Instant::now());
        self.state.send_replace(self.tracker.state().clone());

        let Some(event) = event else {
            trace!(server = %server_id, ema = sample.ema_rate, paused = sample.paused, "No alert transition");
            return;
        };

        info!(server = %server_id, kind = %event.kind, rate = event.rate, "Alert transition");
        if let Err(err) = deliver(self.sink.as_ref(), &event.to_message(&server_id), &event.to_text(&server_id)).await {
            error!(server = %server_id, "Failed to deliver {} notification: {err}", event.kind);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        alert::AlertKind,
        test_support::{
            FakeGame,
            MemorySink,
            ScriptedConnection,
        },
    };
    use pretty_assertions::assert_eq;
    use rcon_telemetry_config::TelemetryConfig;
    use rcon_telemetry_rcon::RconError;
    use std::time::Duration;

    fn alert_config() -> AlertConfig {
        AlertConfig {
            enabled: true,
            check_interval: Duration::from_secs(1),
            warning_threshold: 30.0,
            recovery_threshold: 45.0,
            samples_required: 3,
            cooldown: Duration::from_secs(300),
        }
    }

    fn spawn(
        game: &FakeGame,
        sink: Arc<MemorySink>,
    ) -> (CancellationToken, JoinHandle<()>, watch::Receiver<AlertState>) {
        let telemetry = TelemetryConfig {
            ema_alpha: 1.0,
            ..Default::default()
        };
        let engine = TelemetryEngine::spawn("nauvis", Box::new(ScriptedConnection::connected(game)), telemetry);
        let (monitor, state) = Monitor::new(engine, sink, alert_config());
        let token = CancellationToken::new();
        let handle = monitor.spawn(token.clone());
        (token, handle, state)
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_once_and_recovers_after_cooldown() {
        let game = FakeGame::new(20);
        let sink = Arc::new(MemorySink::default());
        let (token, handle, state) = spawn(&game, sink.clone());

        // baseline at 0s, bad samples at 1s, 2s and 3s
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(state.borrow().active);
        assert_eq!(sink.structured().len(), 1);
        assert_eq!(sink.structured()[0].title, "Performance alert: nauvis");

        game.set_tick_step(60);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(state.borrow().active, "recovery must wait for the cooldown");
        assert_eq!(sink.structured().len(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!state.borrow().active);
        let messages = sink.structured();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].title, "Performance recovered: nauvis");

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_samples_keep_the_loop_alive() {
        let game = FakeGame::new(60);
        let sink = Arc::new(MemorySink::default());
        game.fail_next_tick(RconError::Timeout(Duration::from_secs(10)));
        let (token, handle, state) = spawn(&game, sink.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());
        assert_eq!(state.borrow().clone(), AlertState::default());
        assert!(sink.structured().is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn text_only_sink_gets_alerts_as_text() {
        let game = FakeGame::new(10);
        let sink = Arc::new(MemorySink::text_only());
        let (token, handle, _state) = spawn(&game, sink.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("[nauvis] Performance alert"), "{}", texts[0]);
        assert_eq!(AlertKind::Degraded.to_string(), "degraded");

        token.cancel();
        handle.await.unwrap();
    }
}
