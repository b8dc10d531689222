use eyre::{
    bail,
    eyre,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    time::Duration,
};
use url::Url;

pub const DEFAULT_RCON_PORT: u16 = 27015;

/// Smoothing parameters of the telemetry engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Weight of the newest sample in the exponential moving average.
    pub ema_alpha: f64,
    /// Number of raw samples kept for the simple moving average.
    pub sma_window: usize,
    /// Rate reported before there is anything to measure (ticks per second).
    pub nominal_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            sma_window: 10,
            nominal_rate: 60.0,
        }
    }
}

/// Threshold alerting with hysteresis and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    #[serde(with = "crate::duration")]
    pub check_interval: Duration,
    pub warning_threshold: f64,
    pub recovery_threshold: f64,
    pub samples_required: u32,
    #[serde(with = "crate::duration")]
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(30),
            warning_threshold: 55.0,
            recovery_threshold: 58.0,
            samples_required: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Values every server inherits unless it overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefaults {
    #[serde(with = "crate::duration")]
    pub publish_interval: Duration,
    #[serde(with = "crate::duration")]
    pub command_timeout: Duration,
    #[serde(with = "crate::duration")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub excluded_surface_prefixes: Vec<String>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_secs(300),
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            excluded_surface_prefixes: vec!["platform-".to_string()],
            telemetry: TelemetryConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryOverrides {
    #[serde(default)]
    pub ema_alpha: Option<f64>,
    #[serde(default)]
    pub sma_window: Option<usize>,
    #[serde(default)]
    pub nominal_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertOverrides {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, with = "crate::duration::option")]
    pub check_interval: Option<Duration>,
    #[serde(default)]
    pub warning_threshold: Option<f64>,
    #[serde(default)]
    pub recovery_threshold: Option<f64>,
    #[serde(default)]
    pub samples_required: Option<u32>,
    #[serde(default, with = "crate::duration::option")]
    pub cooldown: Option<Duration>,
}

/// One entry of the `servers` list as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, skip_serializing)]
    pub password: Option<Password>,
    /// Name of an environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default, with = "crate::duration::option")]
    pub publish_interval: Option<Duration>,
    #[serde(default, with = "crate::duration::option")]
    pub command_timeout: Option<Duration>,
    #[serde(default, with = "crate::duration::option")]
    pub connect_timeout: Option<Duration>,
    #[serde(default)]
    pub excluded_surface_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub telemetry: Option<TelemetryOverrides>,
    #[serde(default)]
    pub alert: Option<AlertOverrides>,
    #[serde(default)]
    pub webhook_url: Option<Url>,
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Fully resolved settings for one managed server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub password: Password,
    pub publish_interval: Duration,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub excluded_surface_prefixes: Vec<String>,
    pub telemetry: TelemetryConfig,
    pub alert: AlertConfig,
    pub webhook_url: Option<Url>,
}

impl ServerConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        let id = &self.id;
        if id.trim().is_empty() {
            bail!("server id must not be empty");
        }
        if self.host.trim().is_empty() {
            bail!("server {id}: host must not be empty");
        }
        if self.port == 0 {
            bail!("server {id}: port must not be 0");
        }
        if self.password.expose().is_empty() {
            bail!("server {id}: an RCON password is required (password or password_env)");
        }
        for (name, value) in [
            ("publish_interval", self.publish_interval),
            ("command_timeout", self.command_timeout),
            ("connect_timeout", self.connect_timeout),
            ("alert.check_interval", self.alert.check_interval),
        ] {
            if value.is_zero() {
                bail!("server {id}: {name} must be greater than zero");
            }
        }

        let telemetry = &self.telemetry;
        if !(telemetry.ema_alpha > 0.0 && telemetry.ema_alpha <= 1.0) {
            bail!("server {id}: telemetry.ema_alpha must be in (0, 1], got {}", telemetry.ema_alpha);
        }
        if telemetry.sma_window == 0 {
            bail!("server {id}: telemetry.sma_window must be at least 1");
        }
        if !(telemetry.nominal_rate.is_finite() && telemetry.nominal_rate > 0.0) {
            bail!("server {id}: telemetry.nominal_rate must be positive");
        }

        let alert = &self.alert;
        if alert.samples_required == 0 {
            bail!("server {id}: alert.samples_required must be at least 1");
        }
        if alert.recovery_threshold <= alert.warning_threshold {
            bail!(
                "server {id}: alert.recovery_threshold ({}) must be strictly greater than alert.warning_threshold ({})",
                alert.recovery_threshold,
                alert.warning_threshold
            );
        }
        Ok(())
    }
}

impl ServerSpec {
    /// Merges this entry with the shared defaults. The password is resolved
    /// here, reading `password_env` from the process environment.
    pub fn effective(&self, defaults: &ServerDefaults) -> Result<ServerConfig> {
        let password = match (&self.password, &self.password_env) {
            (Some(password), _) => password.clone(),
            (None, Some(var)) => std::env::var(var)
                .map(Password::new)
                .map_err(|err| eyre!("server {}: cannot read password from ${var}: {err}", self.id))?,
            (None, None) => Password::default(),
        };

        let mut telemetry = defaults.telemetry;
        if let Some(o) = &self.telemetry {
            if let Some(v) = o.ema_alpha {
                telemetry.ema_alpha = v;
            }
            if let Some(v) = o.sma_window {
                telemetry.sma_window = v;
            }
            if let Some(v) = o.nominal_rate {
                telemetry.nominal_rate = v;
            }
        }

        let mut alert = defaults.alert;
        if let Some(o) = &self.alert {
            if let Some(v) = o.enabled {
                alert.enabled = v;
            }
            if let Some(v) = o.check_interval {
                alert.check_interval = v;
            }
            if let Some(v) = o.warning_threshold {
                alert.warning_threshold = v;
            }
            if let Some(v) = o.recovery_threshold {
                alert.recovery_threshold = v;
            }
            if let Some(v) = o.samples_required {
                alert.samples_required = v;
            }
            if let Some(v) = o.cooldown {
                alert.cooldown = v;
            }
        }

        Ok(ServerConfig {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_RCON_PORT),
            password,
            publish_interval: self.publish_interval.unwrap_or(defaults.publish_interval),
            command_timeout: self.command_timeout.unwrap_or(defaults.command_timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            excluded_surface_prefixes: self
                .excluded_surface_prefixes
                .clone()
                .unwrap_or_else(|| defaults.excluded_surface_prefixes.clone()),
            telemetry,
            alert,
            webhook_url: self.webhook_url.clone(),
        })
    }
}
