use crate::Args;
use color_eyre::Result;
use comfy_table::{
    presets,
    Table,
};
use eyre::Context as _;
use rcon_telemetry_config::{
    Config,
    ServerConfig,
};
use rcon_telemetry_engine::{
    RconServerFactory,
    ServerCoordinator,
};
use tokio::time::{
    interval_at,
    Instant,
    MissedTickBehavior,
};

pub struct App {
    args: Args,
    config: Config,
    servers: Vec<ServerConfig>,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let config = Config::new(&args).wrap_err("Failed to load configuration")?;
        let servers = config.validate()?;
        Ok(Self { args, config, servers })
    }

    pub async fn run(self) -> Result<()> {
        if self.args.check {
            println!("{}", servers_table(&self.servers));
            return Ok(());
        }

        let notifications = &self.config.notifications;
        let factory = RconServerFactory::new(
            notifications.webhook_url.clone(),
            notifications.username.clone(),
            notifications.timeout,
        )
        .wrap_err("Failed to build the webhook client")?;
        let coordinator = ServerCoordinator::new(factory);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        info!(servers = self.servers.len(), "Starting telemetry");
        tokio::select! {
            results = coordinator.add_servers(self.servers.clone()) => {
                for (id, result) in results {
                    if let Err(err) = result {
                        error!(server = %id, "Failed to add server: {err}");
                    }
                }
            }
            result = &mut shutdown => {
                coordinator.stop_all().await;
                return result;
            }
        }

        log_status(&coordinator);

        let period = self.config.status_interval;
        let mut status = interval_at(Instant::now() + period, period);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let result = loop {
            tokio::select! {
                result = &mut shutdown => break result,
                _ = status.tick() => log_status(&coordinator),
            }
        };

        info!("Shutting down");
        coordinator.stop_all().await;
        result
    }
}

fn log_status(coordinator: &ServerCoordinator) {
    let alerts = coordinator.alert_states();
    let line = coordinator
        .status_summary()
        .into_iter()
        .map(|status| {
            let mut text = match (status.available, status.connected) {
                (true, true) => format!("{} connected", status.id),
                _ => format!(
                    "{} unavailable ({})",
                    status.id,
                    status.unavailable_reason.as_deref().unwrap_or("unknown")
                ),
            };
            if let Some(Some(alert)) = alerts.get(&status.id) {
                if alert.active {
                    text.push_str(", alert active");
                }
            }
            text
        })
        .collect::<Vec<_>>()
        .join("; ");
    info!("Status: {line}");
}

fn servers_table(servers: &[ServerConfig]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).set_header(vec![
        "Server",
        "Endpoint",
        "Publish",
        "Alert",
        "Webhook",
    ]);
    for server in servers {
        let alert = if server.alert.enabled {
            format!(
                "< {} / >= {}, {} samples, every {}, cooldown {}",
                server.alert.warning_threshold,
                server.alert.recovery_threshold,
                server.alert.samples_required,
                humantime::format_duration(server.alert.check_interval),
                humantime::format_duration(server.alert.cooldown),
            )
        } else {
            "disabled".to_string()
        };
        table.add_row(vec![
            server.id.clone(),
            server.endpoint(),
            humantime::format_duration(server.publish_interval).to_string(),
            alert,
            server
                .webhook_url
                .as_ref()
                .map(|url| url.host_str().unwrap_or("custom").to_string())
                .unwrap_or_else(|| "default".to_string()),
        ]);
    }
    table
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{
            signal,
            SignalKind,
        };
        let mut terminate = signal(SignalKind::terminate()).wrap_err("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.wrap_err("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.wrap_err("Failed to listen for Ctrl-C")?;

    info!("Shutdown signal received");
    Ok(())
}
