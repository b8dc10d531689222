//! Lifecycle of every managed server.
//!
//! For each server the coordinator connects first and only then starts the
//! engine, the snapshot publisher and the alert monitor. A server whose
//! connection cannot be established stays registered as unavailable and is
//! only retried through [`ServerCoordinator::reconnect`].

use crate::{
    alert::AlertState,
    factory::ServerFactory,
    monitor::Monitor,
    publisher::Publisher,
    sink::NotificationSink,
    CoordinatorError,
    TelemetryEngine,
};
use futures::future::join_all;
use rcon_telemetry_config::ServerConfig;
use rcon_telemetry_rcon::Connection;
use serde::Serialize;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const CONNECTING: &str = "connecting";
const STOPPED: &str = "stopped";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub endpoint: String,
    /// Engine, publisher and monitor are running.
    pub available: bool,
    pub connected: bool,
    pub unavailable_reason: Option<String>,
}

/// Tasks and engine of a server that connected successfully.
#[derive(Debug)]
struct ServerRuntime {
    engine: TelemetryEngine,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    alert_state: Option<watch::Receiver<AlertState>>,
}

impl ServerRuntime {
    /// Stops the loops, waits for them, then closes the connection.
    async fn shutdown(self) {
        self.token.cancel();
        for result in join_all(self.tasks).await {
            if let Err(err) = result {
                error!(server = %self.engine.server_id, "Task ended abnormally: {err}");
            }
        }
        self.engine.close().await;
    }
}

#[derive(Debug)]
struct ServerEntry {
    config: ServerConfig,
    sink: Arc<dyn NotificationSink>,
    runtime: Option<ServerRuntime>,
    unavailable_reason: Option<String>,
}

impl ServerEntry {
    fn status(&self) -> ServerStatus {
        let (available, connected, reason) = match &self.runtime {
            Some(runtime) if runtime.engine.is_connected() => (true, true, None),
            Some(runtime) => {
                let reason = runtime
                    .engine
                    .state
                    .borrow()
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connection lost".to_string());
                (true, false, Some(reason))
            }
            None => (false, false, self.unavailable_reason.clone()),
        };
        ServerStatus {
            id: self.config.id.clone(),
            endpoint: self.config.endpoint(),
            available,
            connected,
            unavailable_reason: reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerCoordinator {
    factory: Arc<dyn ServerFactory>,
    entries: Arc<Mutex<HashMap<String, ServerEntry>>>,
    shutdown: CancellationToken,
}

impl ServerCoordinator {
    pub fn new(factory: impl ServerFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            entries: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ServerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_unavailable(&self, id: &str, reason: impl Into<String>) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.unavailable_reason = Some(reason.into());
        }
    }

    fn status(&self, id: &str) -> Result<ServerStatus, CoordinatorError> {
        self.entries()
            .get(id)
            .map(ServerEntry::status)
            .ok_or_else(|| CoordinatorError::UnknownServer(id.to_string()))
    }

    /// Registers a server and connects it. A refused connection is not an
    /// error: the server stays registered as unavailable.
    #[instrument(level = "debug", skip_all, fields(server = %config.id))]
    pub async fn add_server(&self, config: ServerConfig) -> Result<ServerStatus, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        config.validate().map_err(|err| CoordinatorError::InvalidConfig {
            id: config.id.clone(),
            reason: format!("{err:#}"),
        })?;

        let id = config.id.clone();
        let sink = self.factory.sink(&config);
        {
            let mut entries = self.entries();
            if entries.contains_key(&id) {
                return Err(CoordinatorError::DuplicateServer(id));
            }
            entries.insert(
                id.clone(),
                ServerEntry {
                    config: config.clone(),
                    sink: sink.clone(),
                    runtime: None,
                    unavailable_reason: Some(CONNECTING.to_string()),
                },
            );
        }

        match self.connect(&config).await {
            Ok(connection) => self.activate(&config, sink, connection).await?,
            Err(CoordinatorError::Connect { source, .. }) => {
                warn!(server = %id, endpoint = %config.endpoint(), "Running log-only, could not connect: {source}");
                self.set_unavailable(&id, source.to_string());
            }
            Err(err) => {
                self.set_unavailable(&id, STOPPED);
                return Err(err);
            }
        }

        self.status(&id)
    }

    /// Adds every server concurrently. Servers do not wait for each other.
    pub async fn add_servers(
        &self,
        configs: impl IntoIterator<Item = ServerConfig>,
    ) -> Vec<(String, Result<ServerStatus, CoordinatorError>)> {
        join_all(configs.into_iter().map(|config| async move {
            let id = config.id.clone();
            (id, self.add_server(config).await)
        }))
        .await
    }

    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Connection>, CoordinatorError> {
        let mut connection = self.factory.connection(config);
        debug!(server = %config.id, endpoint = %connection.endpoint(), "Connecting");
        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(CoordinatorError::ShuttingDown),
            result = connection.connect() => result,
        };
        match result {
            Ok(()) => Ok(connection),
            Err(source) => Err(CoordinatorError::Connect {
                id: config.id.clone(),
                source,
            }),
        }
    }

    fn start_runtime(
        &self,
        config: &ServerConfig,
        sink: Arc<dyn NotificationSink>,
        connection: Box<dyn Connection>,
    ) -> ServerRuntime {
        let engine = TelemetryEngine::spawn(config.id.clone(), connection, config.telemetry);
        let token = self.shutdown.child_token();

        let publisher = Publisher::new(
            engine.clone(),
            sink.clone(),
            config.publish_interval,
            config.excluded_surface_prefixes.clone(),
        );
        let mut tasks = vec![publisher.spawn(token.clone())];

        let alert_state = if config.alert.enabled {
            let (monitor, state) = Monitor::new(engine.clone(), sink, config.alert);
            tasks.push(monitor.spawn(token.clone()));
            Some(state)
        } else {
            debug!(server = %config.id, "Alerting disabled");
            None
        };

        info!(
            server = %config.id,
            endpoint = %engine.endpoint,
            publish_interval = %humantime::format_duration(config.publish_interval),
            "Server connected, telemetry started"
        );

        ServerRuntime {
            engine,
            token,
            tasks,
            alert_state,
        }
    }

    /// Starts the server's tasks and registers them, unless the server was
    /// removed or shutdown began while connecting.
    async fn activate(
        &self,
        config: &ServerConfig,
        sink: Arc<dyn NotificationSink>,
        connection: Box<dyn Connection>,
    ) -> Result<(), CoordinatorError> {
        let runtime = self.start_runtime(config, sink, connection);

        let (rejected, replaced) = {
            let mut entries = self.entries();
            match entries.get_mut(&config.id) {
                Some(entry) if !self.shutdown.is_cancelled() => {
                    entry.unavailable_reason = None;
                    (None, entry.runtime.replace(runtime))
                }
                _ => (Some(runtime), None),
            }
        };

        if let Some(previous) = replaced {
            previous.shutdown().await;
        }
        if let Some(runtime) = rejected {
            debug!(server = %config.id, "Discarding server started during shutdown or removal");
            runtime.shutdown().await;
            return Err(if self.shutdown.is_cancelled() {
                CoordinatorError::ShuttingDown
            } else {
                CoordinatorError::UnknownServer(config.id.clone())
            });
        }
        Ok(())
    }

    /// Whether each server's connection is live, sorted by id.
    pub fn status_summary(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<_> = self.entries().values().map(ServerEntry::status).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Current alert state per server. `None` for servers without a running
    /// monitor.
    pub fn alert_states(&self) -> BTreeMap<String, Option<AlertState>> {
        self.entries()
            .iter()
            .map(|(id, entry)| {
                let state = entry
                    .runtime
                    .as_ref()
                    .and_then(|runtime| runtime.alert_state.as_ref())
                    .map(|state| state.borrow().clone());
                (id.clone(), state)
            })
            .collect()
    }

    pub fn engine(&self, id: &str) -> Option<TelemetryEngine> {
        self.entries()
            .get(id)
            .and_then(|entry| entry.runtime.as_ref())
            .map(|runtime| runtime.engine.clone())
    }

    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Retries the connection of one server. Never called automatically.
    #[instrument(level = "debug", skip(self))]
    pub async fn reconnect(&self, id: &str) -> Result<ServerStatus, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShuttingDown);
        }
        let (config, sink, engine) = {
            let entries = self.entries();
            let entry = entries
                .get(id)
                .ok_or_else(|| CoordinatorError::UnknownServer(id.to_string()))?;
            let engine = entry.runtime.as_ref().map(|runtime| runtime.engine.clone());
            (entry.config.clone(), entry.sink.clone(), engine)
        };

        match engine {
            Some(engine) => {
                engine
                    .reconnect()
                    .await
                    .map_err(|source| CoordinatorError::Reconnect {
                        id: id.to_string(),
                        source,
                    })?;
            }
            None => match self.connect(&config).await {
                Ok(connection) => self.activate(&config, sink, connection).await?,
                Err(err) => {
                    if let CoordinatorError::Connect { source, .. } = &err {
                        self.set_unavailable(id, source.to_string());
                    }
                    return Err(err);
                }
            },
        }

        info!(server = %id, "Reconnected");
        self.status(id)
    }

    /// Stops and forgets one server.
    pub async fn remove_server(&self, id: &str) -> Result<(), CoordinatorError> {
        let entry = self
            .entries()
            .remove(id)
            .ok_or_else(|| CoordinatorError::UnknownServer(id.to_string()))?;
        if let Some(runtime) = entry.runtime {
            runtime.shutdown().await;
        }
        info!(server = %id, "Server removed");
        Ok(())
    }

    /// Cancels every publisher and monitor, waits for them and then closes
    /// the connections. Safe to call repeatedly and while servers are still
    /// being added.
    pub async fn stop_all(&self) {
        self.shutdown.cancel();

        let runtimes: Vec<ServerRuntime> = self
            .entries()
            .values_mut()
            .filter_map(|entry| {
                let runtime = entry.runtime.take()?;
                entry.unavailable_reason = Some(STOPPED.to_string());
                Some(runtime)
            })
            .collect();

        if runtimes.is_empty() {
            debug!("No running servers to stop");
            return;
        }

        info!(count = runtimes.len(), "Stopping servers");
        join_all(runtimes.into_iter().map(ServerRuntime::shutdown)).await;
        info!("All servers stopped");
    }
}
