//! Texture memory budget
//!
//! One ledger per manager. It is rebuilt from the records every tick and
//! adjusted by deltas when records are evicted in between.

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const MIN_VIDEO_RAM_MB: u32 = 32;
pub const MAX_VIDEO_RAM_MB: u32 = 512;
pub const MAX_TOTAL_TEXTURE_MEM_MB: u32 = 2048;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Below this share of both caps the discard bias is relaxed
const RELIEF_RATIO: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct BudgetLedger {
    bound_bytes: u64,
    total_bytes: u64,
    max_bound_bytes: u64,
    max_total_bytes: u64,
    desired_discard_bias: f32,
    bias_step: f32,
    max_bias: f32,
    bias_adjust_interval: Duration,
    last_bias_adjust: Option<Instant>,
    under_pressure: bool,
    pressure_ticks: u64,
    corrections: u64,
}

impl BudgetLedger {
    pub fn new(max_bound_mb: u32, max_total_mb: u32) -> Self {
        let (bound_mb, total_mb) = Self::clamp_caps(max_bound_mb, max_total_mb);
        info!("💾 Texture budget: {} MB bound, {} MB total", bound_mb, total_mb);
        Self {
            bound_bytes: 0,
            total_bytes: 0,
            max_bound_bytes: bound_mb as u64 * BYTES_PER_MB,
            max_total_bytes: total_mb as u64 * BYTES_PER_MB,
            desired_discard_bias: 0.0,
            bias_step: 0.5,
            max_bias: 4.0,
            bias_adjust_interval: Duration::from_millis(500),
            last_bias_adjust: None,
            under_pressure: false,
            pressure_ticks: 0,
            corrections: 0,
        }
    }

    /// Bias tuning: step per adjustment, ceiling, minimum time between changes
    pub fn with_bias_tuning(mut self, step: f32, max_bias: f32, interval: Duration) -> Self {
        self.bias_step = step.max(0.0);
        self.max_bias = max_bias.max(0.0);
        self.bias_adjust_interval = interval;
        self
    }

    /// Bound within `[32, 512]` MB, total within `[bound, 2048]` MB
    pub fn clamp_caps(max_bound_mb: u32, max_total_mb: u32) -> (u32, u32) {
        let bound = max_bound_mb.clamp(MIN_VIDEO_RAM_MB, MAX_VIDEO_RAM_MB);
        let total = max_total_mb.clamp(bound, MAX_TOTAL_TEXTURE_MEM_MB);
        (bound, total)
    }

    pub fn set_caps(&mut self, max_bound_mb: u32, max_total_mb: u32) {
        let (bound_mb, total_mb) = Self::clamp_caps(max_bound_mb, max_total_mb);
        info!("💾 Texture budget changed: {} MB bound, {} MB total", bound_mb, total_mb);
        self.max_bound_bytes = bound_mb as u64 * BYTES_PER_MB;
        self.max_total_bytes = total_mb as u64 * BYTES_PER_MB;
    }

    /// Rebuild the aggregates from `(bytes, bound this window)` samples
    pub fn aggregate(&mut self, samples: impl IntoIterator<Item = (u64, bool)>) {
        let mut total = 0u64;
        let mut bound = 0u64;
        for (bytes, is_bound) in samples {
            total += bytes;
            if is_bound {
                bound += bytes;
            }
        }
        self.total_bytes = total;
        self.bound_bytes = bound;
    }

    /// Memory handed back by an evicted record
    pub fn release(&mut self, bytes: u64, was_bound: bool) {
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
        if was_bound {
            self.bound_bytes = self.bound_bytes.saturating_sub(bytes);
        }
    }

    pub fn invariant_holds(&self) -> bool {
        self.total_bytes >= self.bound_bytes
    }

    pub(crate) fn note_correction(&mut self) {
        self.corrections += 1;
    }

    pub fn bound_bytes(&self) -> u64 {
        self.bound_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_bound_bytes(&self) -> u64 {
        self.max_bound_bytes
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }

    pub fn over_total_cap(&self) -> bool {
        self.total_bytes > self.max_total_bytes
    }

    pub fn over_bound_cap(&self) -> bool {
        self.bound_bytes > self.max_bound_bytes
    }

    pub fn comfortably_under(&self) -> bool {
        (self.total_bytes as f64) < self.max_total_bytes as f64 * RELIEF_RATIO
            && (self.bound_bytes as f64) < self.max_bound_bytes as f64 * RELIEF_RATIO
    }

    pub fn desired_discard_bias(&self) -> f32 {
        self.desired_discard_bias
    }

    pub fn is_under_pressure(&self) -> bool {
        self.under_pressure
    }

    pub fn pressure_ticks(&self) -> u64 {
        self.pressure_ticks
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    fn may_adjust(&self, now: Instant) -> bool {
        self.last_bias_adjust
            .map_or(true, |last| now.saturating_duration_since(last) >= self.bias_adjust_interval)
    }

    /// Re-evaluate pressure after eviction. Returns true when pressure started
    /// this tick.
    pub fn update_pressure(&mut self, now: Instant) -> bool {
        let pressured = self.over_total_cap() || self.over_bound_cap();
        let started = pressured && !self.under_pressure;

        if pressured {
            self.pressure_ticks += 1;
            if started {
                warn!(
                    "⚠️ Texture memory over budget: {} / {} MB total, {} / {} MB bound",
                    self.total_bytes / BYTES_PER_MB,
                    self.max_total_bytes / BYTES_PER_MB,
                    self.bound_bytes / BYTES_PER_MB,
                    self.max_bound_bytes / BYTES_PER_MB
                );
            }
            if self.desired_discard_bias < self.max_bias && self.may_adjust(now) {
                self.desired_discard_bias = (self.desired_discard_bias + self.bias_step).min(self.max_bias);
                self.last_bias_adjust = Some(now);
                debug!("Discard bias raised to {:.1}", self.desired_discard_bias);
            }
        } else if self.comfortably_under() && self.desired_discard_bias > 0.0 && self.may_adjust(now) {
            self.desired_discard_bias = (self.desired_discard_bias - self.bias_step).max(0.0);
            self.last_bias_adjust = Some(now);
            debug!("Discard bias lowered to {:.1}", self.desired_discard_bias);
        }

        if self.under_pressure && !pressured {
            info!("💾 Texture memory back under budget");
        }
        self.under_pressure = pressured;
        started
    }
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new(MAX_VIDEO_RAM_MB, MAX_TOTAL_TEXTURE_MEM_MB)
    }
}
