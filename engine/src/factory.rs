use crate::sink::{
    LogSink,
    NotificationSink,
    WebhookSink,
};
use rcon_telemetry_config::ServerConfig;
use rcon_telemetry_rcon::{
    Connection,
    RconClient,
    RconEndpoint,
};
use reqwest::Client as HttpClient;
use std::{
    fmt,
    sync::Arc,
    time::Duration,
};
use url::Url;

/// Builds the per-server collaborators the coordinator does not own a
/// recipe for.
pub trait ServerFactory: fmt::Debug + Send + Sync + 'static {
    /// A fresh, not yet connected connection.
    fn connection(&self, server: &ServerConfig) -> Box<dyn Connection>;

    fn sink(&self, server: &ServerConfig) -> Arc<dyn NotificationSink>;
}

/// RCON over TCP, notifications to the server's webhook, the global webhook
/// or the log, in that order.
#[derive(Debug, Clone)]
pub struct RconServerFactory {
    http: HttpClient,
    webhook_url: Option<Url>,
    username: Option<String>,
}

impl RconServerFactory {
    /// `timeout` bounds every webhook request so a stalled endpoint cannot
    /// hold up the monitor or publisher waiting on it.
    pub fn new(webhook_url: Option<Url>, username: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder().connect_timeout(timeout).timeout(timeout).build()?;
        Ok(Self {
            http,
            webhook_url,
            username,
        })
    }
}

impl ServerFactory for RconServerFactory {
    fn connection(&self, server: &ServerConfig) -> Box<dyn Connection> {
        let endpoint = RconEndpoint::new(server.host.clone(), server.port, server.password.expose());
        Box::new(RconClient::new(endpoint, server.connect_timeout, server.command_timeout))
    }

    fn sink(&self, server: &ServerConfig) -> Arc<dyn NotificationSink> {
        match server.webhook_url.as_ref().or(self.webhook_url.as_ref()) {
            Some(url) => Arc::new(WebhookSink::new(self.http.clone(), url.clone(), self.username.clone())),
            None => {
                debug!(server = %server.id, "No webhook configured, notifications go to the log");
                Arc::new(LogSink::new(server.id.clone()))
            }
        }
    }
}
