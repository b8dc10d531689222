//! # Configuration
//!
//! Layers, lowest priority first:
//!
//! 1. the embedded `default-config.yaml`
//! 2. the servers file (`--config`, or `servers.yaml` in the config directory)
//! 3. `RCON_TELEMETRY__*` environment variables (`__` separates nesting levels)
//! 4. command line arguments
//!
//! [`Config::server_configs`] turns the `servers` list into one fully resolved
//! [`ServerConfig`] per managed server.

#[macro_use]
extern crate tracing;

mod app_config;
mod args;
pub mod duration;
mod server_config;

use app_config::AppConfig;
pub use app_config::get_config_dir;
pub use args::Args;
use eyre::{
    bail,
    Context as _,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
pub use server_config::{
    AlertConfig,
    AlertOverrides,
    Password,
    ServerConfig,
    ServerDefaults,
    ServerSpec,
    TelemetryConfig,
    TelemetryOverrides,
    DEFAULT_RCON_PORT,
};
use std::{
    collections::HashSet,
    time::Duration,
};
use url::Url;

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");
const SERVERS_FILE: &str = "servers.yaml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook used by every server that does not bring its own.
    #[serde(default)]
    pub webhook_url: Option<Url>,
    /// Display name for webhook posts.
    #[serde(default)]
    pub username: Option<String>,
    /// Upper bound on a single webhook request, connecting included.
    #[serde(with = "crate::duration", default = "default_notification_timeout")]
    pub timeout: Duration,
}

fn default_notification_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: None,
            timeout: default_notification_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten, skip_serializing)]
    pub app_config: AppConfig,
    /// How often the binary logs a one-line status of every server.
    #[serde(with = "crate::duration")]
    pub status_interval: Duration,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub defaults: ServerDefaults,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
}

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    pub fn new(args: &Args) -> Result<Self, config::ConfigError> {
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        builder = match &args.config {
            Some(path) => {
                debug!(?path, "Loading servers file from args");
                builder.add_source(
                    config::File::from(path.as_path())
                        .format(config::FileFormat::Yaml)
                        .required(true),
                )
            }
            None => builder.add_source(
                config::File::from(config_dir.join(SERVERS_FILE))
                    .format(config::FileFormat::Yaml)
                    .required(false),
            ),
        };

        builder = builder
            .add_source(
                config::Environment::with_prefix(app_config::PROJECT_NAME)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .add_source(args.clone());

        builder.build()?.try_deserialize()
    }

    /// Resolves every configured server against the defaults.
    pub fn server_configs(&self) -> Result<Vec<ServerConfig>> {
        self.servers
            .iter()
            .map(|spec| {
                spec.effective(&self.defaults)
                    .wrap_err_with(|| format!("Invalid configuration for server {:?}", spec.id))
            })
            .collect()
    }

    /// Checks the whole configuration and returns the resolved servers.
    pub fn validate(&self) -> Result<Vec<ServerConfig>> {
        if self.servers.is_empty() {
            bail!(
                "No servers configured. Add a `servers` list to {} or pass --config",
                self.app_config.config_dir.join(SERVERS_FILE).display()
            );
        }
        if self.status_interval.is_zero() {
            bail!("status_interval must be greater than zero");
        }
        if self.notifications.timeout.is_zero() {
            bail!("notifications.timeout must be greater than zero");
        }

        let mut seen = HashSet::new();
        for spec in &self.servers {
            if !seen.insert(spec.id.as_str()) {
                bail!("Server id {:?} is configured more than once", spec.id);
            }
        }

        let servers = self.server_configs()?;
        for server in &servers {
            server.validate()?;
        }
        Ok(servers)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const SERVERS: &str = r#"
notifications:
  webhook_url: https://hooks.example.org/abc
defaults:
  publish_interval: 10m
  command_timeout: 5s
  connect_timeout: 5s
  alert:
    enabled: true
    check_interval: 15s
    warning_threshold: 30.0
    recovery_threshold: 45.0
    samples_required: 3
    cooldown: 300
servers:
  - id: nauvis
    host: 127.0.0.1
    password: one
  - id: gleba
    host: 127.0.0.2
    port: 34198
    password: two
    publish_interval: 1m
    alert:
      samples_required: 5
"#;

    fn parse(yaml: &str) -> Config {
        serde_yml::from_str(yaml).unwrap()
    }

    #[test]
    fn default_config_parses() {
        let config = Config::default();
        assert_eq!(config.defaults, ServerDefaults::default());
        assert_eq!(config.status_interval, Duration::from_secs(60));
        assert!(config.servers.is_empty());
        assert_eq!(config.notifications.username.as_deref(), Some("RCON Telemetry"));
        assert_eq!(config.notifications.timeout, Duration::from_secs(10));
    }

    #[test]
    fn resolves_servers_from_yaml() {
        let config = parse(&format!("status_interval: 1m\n{SERVERS}"));
        let servers = config.validate().unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, "nauvis");
        assert_eq!(servers[0].endpoint(), "127.0.0.1:27015");
        assert_eq!(servers[0].publish_interval, Duration::from_secs(600));
        assert_eq!(servers[0].alert.cooldown, Duration::from_secs(300));
        assert_eq!(servers[1].endpoint(), "127.0.0.2:34198");
        assert_eq!(servers[1].publish_interval, Duration::from_secs(60));
        assert_eq!(servers[1].alert.samples_required, 5);
        assert_eq!(servers[1].alert.warning_threshold, 30.0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut config = parse(&format!("status_interval: 1m\n{SERVERS}"));
        config.servers[1].id = "nauvis".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let mut config = Config::default();
        config.app_config.config_dir = "/etc/rcon-telemetry".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("/etc/rcon-telemetry/servers.yaml"), "{err}");
    }
}
