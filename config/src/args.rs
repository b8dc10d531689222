use clap::Parser;
use std::path::PathBuf;

/// Watches game servers over RCON and reports their performance.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Server definitions (YAML). Defaults to `servers.yaml` in the config directory.
    #[clap(long, short, value_name = "FILE", env = "RCON_TELEMETRY_FILE")]
    pub config: Option<PathBuf>,

    /// Webhook receiving snapshots and alerts, overrides `notifications.webhook_url`.
    #[clap(long, value_name = "URL", env = "RCON_TELEMETRY_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Log at debug level unless `RUST_LOG` is set.
    #[clap(long, action)]
    pub debug: bool,

    /// Validate the configuration, print the effective servers and exit.
    #[clap(long, action)]
    pub check: bool,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(url) = &self.webhook_url {
                cache.insert("notifications.webhook_url".to_string(), url.clone().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let version = clap::crate_version!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "\
{version}
Authors: {author}

Config directory: {config_dir_path}"
    )
}
