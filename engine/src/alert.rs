//! Threshold alerting with hysteresis and a cooldown between transitions.
//!
//! ```text
//! Inactive --[bad samples >= N, cooldown expired]--> Active
//! Active   --[ema >= recovery, cooldown expired]---> Inactive
//! ```

use crate::{
    sink::{
        MessageField,
        StructuredMessage,
        COLOR_OK,
        COLOR_WARNING,
    },
    smoothing::TelemetrySample,
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use rcon_telemetry_config::AlertConfig;
use serde::Serialize;
use std::time::Duration;
use strum::{
    AsRefStr,
    Display,
};
use tokio::time::Instant;

/// What external status commands see of a server's alerting.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct AlertState {
    pub active: bool,
    pub consecutive_bad: u32,
    /// Samples in a row at or above the recovery threshold.
    pub consecutive_good: u32,
    pub active_since: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    Degraded,
    Recovered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub rate: f64,
    pub threshold: f64,
    /// Bad samples that led to the alert.
    pub samples: u32,
    /// Time spent degraded, set on recovery.
    pub downtime: Option<Duration>,
    pub at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn to_message(&self, server_id: &str) -> StructuredMessage {
        match self.kind {
            AlertKind::Degraded => StructuredMessage {
                title: format!("Performance alert: {server_id}"),
                description: Some(format!(
                    "UPS dropped below {:.1} for {} samples in a row",
                    self.threshold, self.samples
                )),
                color: COLOR_WARNING,
                fields: vec![
                    MessageField::new("UPS", format!("{:.1}", self.rate), true),
                    MessageField::new("Threshold", format!("{:.1}", self.threshold), true),
                ],
                footer: Some(server_id.to_string()),
                timestamp: Some(self.at),
            },
            AlertKind::Recovered => StructuredMessage {
                title: format!("Performance recovered: {server_id}"),
                description: Some(format!("UPS is back above {:.1}", self.threshold)),
                color: COLOR_OK,
                fields: vec![
                    MessageField::new("UPS", format!("{:.1}", self.rate), true),
                    MessageField::new("Downtime", self.downtime_text(), true),
                ],
                footer: Some(server_id.to_string()),
                timestamp: Some(self.at),
            },
        }
    }

    pub fn to_text(&self, server_id: &str) -> String {
        match self.kind {
            AlertKind::Degraded => format!(
                "[{server_id}] Performance alert: UPS {:.1} below {:.1} for {} samples",
                self.rate, self.threshold, self.samples
            ),
            AlertKind::Recovered => format!(
                "[{server_id}] Performance recovered: UPS {:.1}, degraded for {}",
                self.rate,
                self.downtime_text()
            ),
        }
    }

    fn downtime_text(&self) -> String {
        self.downtime
            .map(|downtime| humantime::format_duration(Duration::from_secs(downtime.as_secs())).to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Decision state of one server's alert monitor.
#[derive(Debug, Clone)]
pub struct AlertTracker {
    config: AlertConfig,
    state: AlertState,
    active_since: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl AlertTracker {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: AlertState::default(),
            active_since: None,
            cooldown_until: None,
        }
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    fn transition(&mut self, now: Instant, at: DateTime<Utc>) {
        self.cooldown_until = Some(now + self.config.cooldown);
        self.state.last_transition = Some(at);
        self.state.cooldown_until = TimeDelta::from_std(self.config.cooldown)
            .ok()
            .and_then(|cooldown| at.checked_add_signed(cooldown));
    }

    /// Feeds one sample, returning the notification to send if the alert
    /// changed state.
    pub fn observe(&mut self, sample: &TelemetrySample, now: Instant) -> Option<AlertEvent> {
        if sample.provisional {
            return None;
        }
        if sample.paused {
            self.state.consecutive_bad = 0;
            return None;
        }

        let rate = sample.ema_rate;
        let at = sample.sampled_at;

        if rate < self.config.warning_threshold {
            self.state.consecutive_bad = self.state.consecutive_bad.saturating_add(1);
            self.state.consecutive_good = 0;

            if self.state.active || self.state.consecutive_bad < self.config.samples_required {
                return None;
            }
            if self.cooling_down(now) {
                debug!(rate, "Alert condition met during cooldown");
                return None;
            }

            self.state.active = true;
            self.state.active_since = Some(at);
            self.active_since = Some(now);
            self.transition(now, at);
            return Some(AlertEvent {
                kind: AlertKind::Degraded,
                rate,
                threshold: self.config.warning_threshold,
                samples: self.state.consecutive_bad,
                downtime: None,
                at,
            });
        }

        self.state.consecutive_bad = 0;
        if rate < self.config.recovery_threshold {
            self.state.consecutive_good = 0;
            return None;
        }

        self.state.consecutive_good = self.state.consecutive_good.saturating_add(1);
        if !self.state.active || self.cooling_down(now) {
            return None;
        }

        let downtime = self.active_since.map(|since| now.saturating_duration_since(since));
        self.state.active = false;
        self.state.active_since = None;
        self.state.consecutive_good = 0;
        self.active_since = None;
        self.transition(now, at);
        Some(AlertEvent {
            kind: AlertKind::Recovered,
            rate,
            threshold: self.config.recovery_threshold,
            samples: 0,
            downtime,
            at,
        })
    }
}
