//! Periodic snapshot publishing.

use crate::{
    sink::{
        deliver,
        MessageField,
        NotificationSink,
        StructuredMessage,
        COLOR_INFO,
    },
    Field,
    GatheredSnapshot,
    TelemetryEngine,
};
use comfy_table::{
    presets,
    Cell,
    ContentArrangement,
    Table,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Highest evolution across surfaces whose name does not start with one of
/// `excluded_prefixes`.
pub fn aggregate_evolution<'a>(
    surfaces: &'a BTreeMap<String, f64>,
    excluded_prefixes: &[String],
) -> Option<(&'a str, f64)> {
    surfaces
        .iter()
        .filter(|(name, _)| !excluded_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())))
        .map(|(name, factor)| (name.as_str(), *factor))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

fn percent(factor: f64) -> String {
    format!("{:.2}%", factor * 100.0)
}

fn rate_lines(snapshot: &GatheredSnapshot) -> Vec<(&'static str, String)> {
    match &snapshot.rate {
        Field::Available(sample) if sample.provisional => {
            vec![("UPS", format!("{:.1} (warming up)", sample.ema_rate))]
        }
        Field::Available(sample) if sample.paused => {
            vec![("UPS", format!("paused (last {:.1})", sample.last_known_rate))]
        }
        Field::Available(sample) => vec![
            ("UPS", format!("{:.1}", sample.ema_rate)),
            ("UPS (average)", format!("{:.1}", sample.sma_rate)),
        ],
        Field::Unavailable(reason) => vec![("UPS", format!("unavailable ({reason})"))],
    }
}

fn evolution_lines(snapshot: &GatheredSnapshot, excluded_prefixes: &[String]) -> Vec<(String, String)> {
    match &snapshot.evolution {
        Field::Available(surfaces) => {
            let mut lines = Vec::with_capacity(surfaces.len() + 1);
            if let Some((name, factor)) = aggregate_evolution(surfaces, excluded_prefixes) {
                lines.push(("Evolution".to_string(), format!("{} ({name})", percent(factor))));
            }
            lines.extend(
                surfaces
                    .iter()
                    .map(|(name, factor)| (format!("Evolution: {name}"), percent(*factor))),
            );
            lines
        }
        Field::Unavailable(reason) => vec![("Evolution".to_string(), format!("unavailable ({reason})"))],
    }
}

fn player_lines(snapshot: &GatheredSnapshot) -> Vec<(&'static str, String)> {
    match &snapshot.players {
        Field::Available(players) if players.is_empty() => vec![("Players", "0".to_string())],
        Field::Available(players) => vec![
            ("Players", players.len().to_string()),
            ("Online", players.join(", ")),
        ],
        Field::Unavailable(reason) => vec![("Players", format!("unavailable ({reason})"))],
    }
}

pub fn format_structured(snapshot: &GatheredSnapshot, excluded_prefixes: &[String]) -> StructuredMessage {
    let mut fields = Vec::new();
    fields.extend(rate_lines(snapshot).into_iter().map(|(name, value)| MessageField::new(name, value, true)));
    fields.extend(player_lines(snapshot).into_iter().map(|(name, value)| {
        let inline = name != "Online";
        MessageField::new(name, value, inline)
    }));
    fields.extend(
        evolution_lines(snapshot, excluded_prefixes)
            .into_iter()
            .map(|(name, value)| MessageField::new(name, value, true)),
    );

    StructuredMessage {
        title: format!("Server status: {}", snapshot.server_id),
        description: None,
        color: COLOR_INFO,
        fields,
        footer: Some(snapshot.server_id.clone()),
        timestamp: Some(snapshot.gathered_at),
    }
}

pub fn format_text(snapshot: &GatheredSnapshot, excluded_prefixes: &[String]) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(80)
        .set_header(vec![
            Cell::new(format!("Server status: {}", snapshot.server_id)),
            Cell::new(snapshot.gathered_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]);

    for (name, value) in rate_lines(snapshot) {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    for (name, value) in player_lines(snapshot) {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    for (name, value) in evolution_lines(snapshot, excluded_prefixes) {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }

    table.to_string()
}

/// Gathers a snapshot every `interval` and hands it to the sink.
#[derive(Debug, Clone)]
pub struct Publisher {
    engine: TelemetryEngine,
    sink: Arc<dyn NotificationSink>,
    interval: Duration,
    excluded_prefixes: Vec<String>,
}

impl Publisher {
    pub fn new(
        engine: TelemetryEngine,
        sink: Arc<dyn NotificationSink>,
        interval: Duration,
        excluded_prefixes: Vec<String>,
    ) -> Self {
        Self {
            engine,
            sink,
            interval,
            excluded_prefixes,
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::task::spawn(self.run(token))
    }

    #[instrument(level = "debug", skip_all, fields(server = %self.engine.server_id))]
    async fn run(self, token: CancellationToken) {
        debug!(interval = %humantime::format_duration(self.interval), "Snapshot publisher started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {},
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                published = self.publish_once() => {
                    if published {
                        debug!("Snapshot published");
                    }
                },
            }
        }
        debug!("Snapshot publisher stopped");
    }

    /// One gather, format and deliver cycle. Returns whether something was
    /// delivered; failures are logged.
    pub async fn publish_once(&self) -> bool {
        let server_id = &self.engine.server_id;
        let snapshot = match self.engine.gather_all().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(server = %server_id, "Skipping snapshot, gather failed: {err}");
                return false;
            }
        };
        if snapshot.is_empty() {
            warn!(server = %server_id, "Skipping snapshot, no field could be gathered");
            return false;
        }

        let message = format_structured(&snapshot, &self.excluded_prefixes);
        let text = format_text(&snapshot, &self.excluded_prefixes);
        match deliver(self.sink.as_ref(), &message, &text).await {
            Ok(()) => true,
            Err(err) => {
                error!(server = %server_id, "Failed to deliver snapshot: {err}");
                false
            }
        }
    }
}
