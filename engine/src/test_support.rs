//! Fakes shared by the unit tests of this crate.

use crate::{
    parse::{
        EVOLUTION_COMMAND,
        PLAYERS_COMMAND,
        TICK_COMMAND,
    },
    sink::{
        NotificationSink,
        SinkError,
        StructuredMessage,
    },
};
use futures::future::BoxFuture;
use rcon_telemetry_rcon::{
    Connection,
    RconError,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

#[derive(Debug)]
struct GameInner {
    tick: u64,
    tick_step: u64,
    tick_error: Option<RconError>,
    evolution: Result<String, RconError>,
    players: Result<String, RconError>,
    refuse_connect: bool,
    connect_delay: Duration,
    commands: Vec<String>,
    connects: usize,
    closed: bool,
    in_flight: usize,
    max_in_flight: usize,
}

/// Game state behind one or more [`ScriptedConnection`]s.
#[derive(Debug, Clone)]
pub(crate) struct FakeGame {
    inner: Arc<Mutex<GameInner>>,
}

impl FakeGame {
    /// A running game advancing `tick_step` ticks between two tick reads.
    pub(crate) fn new(tick_step: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GameInner {
                tick: 0,
                tick_step,
                tick_error: None,
                evolution: Ok("nauvis=0.5;platform-7=0.9;gleba=0.25".to_string()),
                players: Ok("Online players (1):\n  alice (online)\n".to_string()),
                refuse_connect: false,
                connect_delay: Duration::ZERO,
                commands: Vec::new(),
                connects: 0,
                closed: false,
                in_flight: 0,
                max_in_flight: 0,
            })),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut GameInner) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }

    pub(crate) fn set_tick_step(&self, step: u64) {
        self.with(|game| game.tick_step = step);
    }

    pub(crate) fn fail_next_tick(&self, err: RconError) {
        self.with(|game| game.tick_error = Some(err));
    }

    pub(crate) fn set_evolution(&self, response: Result<String, RconError>) {
        self.with(|game| game.evolution = response);
    }

    pub(crate) fn set_players(&self, response: Result<String, RconError>) {
        self.with(|game| game.players = response);
    }

    pub(crate) fn refuse_connect(&self, refuse: bool) {
        self.with(|game| game.refuse_connect = refuse);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        self.with(|game| game.connect_delay = delay);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.with(|game| game.commands.clone())
    }

    pub(crate) fn connects(&self) -> usize {
        self.with(|game| game.connects)
    }

    pub(crate) fn closed(&self) -> bool {
        self.with(|game| game.closed)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.with(|game| game.max_in_flight)
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedConnection {
    game: FakeGame,
    connected: bool,
}

impl ScriptedConnection {
    pub(crate) fn new(game: &FakeGame) -> Self {
        Self {
            game: game.clone(),
            connected: false,
        }
    }

    pub(crate) fn connected(game: &FakeGame) -> Self {
        Self {
            game: game.clone(),
            connected: true,
        }
    }
}

impl Connection for ScriptedConnection {
    fn connect(&mut self) -> BoxFuture<'_, Result<(), RconError>> {
        Box::pin(async move {
            let delay = self.game.with(|game| game.connect_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.game.with(|game| {
                game.connects += 1;
                if game.refuse_connect {
                    return Err(RconError::Connection {
                        endpoint: "fake:27015".to_string(),
                        reason: "connection refused".to_string(),
                    });
                }
                game.closed = false;
                Ok(())
            })?;
            self.connected = true;
            Ok(())
        })
    }

    fn execute<'a>(&'a mut self, command: &'a str) -> BoxFuture<'a, Result<String, RconError>> {
        Box::pin(async move {
            if !self.connected {
                return Err(RconError::NotConnected);
            }
            self.game.with(|game| {
                game.in_flight += 1;
                game.max_in_flight = game.max_in_flight.max(game.in_flight);
            });
            tokio::task::yield_now().await;

            let result = self.game.with(|game| {
                game.in_flight -= 1;
                game.commands.push(command.to_string());
                match command {
                    TICK_COMMAND => match game.tick_error.take() {
                        Some(err) => Err(err),
                        None => {
                            game.tick += game.tick_step;
                            Ok(game.tick.to_string())
                        }
                    },
                    EVOLUTION_COMMAND => game.evolution.clone(),
                    PLAYERS_COMMAND => game.players.clone(),
                    _ => Ok(format!("Unknown command: {command}")),
                }
            });

            if matches!(result, Err(RconError::Timeout(_) | RconError::Connection { .. })) {
                self.connected = false;
            }
            result
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.connected = false;
            self.game.with(|game| game.closed = true);
        })
    }

    fn endpoint(&self) -> String {
        "fake:27015".to_string()
    }
}

/// Records everything it is asked to deliver.
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    pub(crate) text_only: bool,
    pub(crate) failing: bool,
    structured: Mutex<Vec<StructuredMessage>>,
    texts: Mutex<Vec<String>>,
}

impl MemorySink {
    pub(crate) fn text_only() -> Self {
        Self {
            text_only: true,
            ..Default::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub(crate) fn structured(&self) -> Vec<StructuredMessage> {
        self.structured.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl NotificationSink for MemorySink {
    fn send_structured<'a>(&'a self, message: &'a StructuredMessage) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            if self.failing {
                return Err(SinkError::Delivery("sink is down".to_string()));
            }
            if self.text_only {
                return Err(SinkError::Unsupported);
            }
            self.structured.lock().unwrap().push(message.clone());
            Ok(())
        })
    }

    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            if self.failing {
                return Err(SinkError::Delivery("sink is down".to_string()));
            }
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        })
    }
}
