//! Tick rate smoothing with pause detection.
//!
//! The smoother turns successive readings of a monotonically increasing tick
//! counter into a rate. A reading that did not advance is a pause, which
//! never touches the averages.

use chrono::{
    DateTime,
    Utc,
};
use rcon_telemetry_config::TelemetryConfig;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::time::Instant;

/// One derived reading, produced by every call to the engine's `sample_rate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Ticks per second since the previous reading, absent when there was no
    /// measurable delta.
    pub raw_rate: Option<f64>,
    pub ema_rate: f64,
    pub sma_rate: f64,
    pub paused: bool,
    /// Most recent EMA taken while the source was advancing.
    pub last_known_rate: f64,
    /// Set when there is no baseline to measure against yet (first reading or
    /// the counter went backwards). Carries the nominal rate and must not be
    /// used for alerting.
    pub provisional: bool,
    pub tick: u64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RateSmoother {
    config: TelemetryConfig,
    previous: Option<(u64, Instant)>,
    ema: Option<f64>,
    window: VecDeque<f64>,
}

impl RateSmoother {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            previous: None,
            ema: None,
            window: VecDeque::with_capacity(config.sma_window.max(1)),
        }
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    pub fn sma(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    pub fn window(&self) -> &VecDeque<f64> {
        &self.window
    }

    pub fn observe(&mut self, tick: u64, now: Instant) -> TelemetrySample {
        let Some((previous_tick, previous_at)) = self.previous else {
            self.previous = Some((tick, now));
            return self.provisional(tick);
        };

        if tick < previous_tick {
            debug!(previous_tick, tick, "Tick counter went backwards, taking a new baseline");
            self.previous = Some((tick, now));
            return self.provisional(tick);
        }

        let delta = tick - previous_tick;
        if delta == 0 {
            self.previous = Some((tick, now));
            let last_known = self.last_known();
            return TelemetrySample {
                raw_rate: None,
                ema_rate: last_known,
                sma_rate: self.sma().unwrap_or(last_known),
                paused: true,
                last_known_rate: last_known,
                provisional: false,
                tick,
                sampled_at: Utc::now(),
            };
        }

        let elapsed = now.saturating_duration_since(previous_at).as_secs_f64();
        if elapsed <= 0.0 {
            // keep the old baseline, the next reading spans both deltas
            return self.provisional(tick);
        }

        let raw = delta as f64 / elapsed;
        let alpha = self.config.ema_alpha;
        let ema = match self.ema {
            Some(ema) => alpha * raw + (1.0 - alpha) * ema,
            None => raw,
        };
        self.ema = Some(ema);

        if self.window.len() >= self.config.sma_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(raw);
        self.previous = Some((tick, now));

        TelemetrySample {
            raw_rate: Some(raw),
            ema_rate: ema,
            sma_rate: self.sma().unwrap_or(raw),
            paused: false,
            last_known_rate: ema,
            provisional: false,
            tick,
            sampled_at: Utc::now(),
        }
    }

    fn last_known(&self) -> f64 {
        self.ema.unwrap_or(self.config.nominal_rate)
    }

    fn provisional(&self, tick: u64) -> TelemetrySample {
        let rate = self.last_known();
        TelemetrySample {
            raw_rate: None,
            ema_rate: rate,
            sma_rate: self.sma().unwrap_or(rate),
            paused: false,
            last_known_rate: rate,
            provisional: true,
            tick,
            sampled_at: Utc::now(),
        }
    }
}
