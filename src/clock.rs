//! Simulation clock: elapsed simulated time, pause flag, time scale.
//!
//! All component timeouts (debounce windows, soft-start ramps, stall
//! timers, periodic CAN cadence) compare against this clock's simulated
//! milliseconds, never against wall time, so runs are reproducible under
//! time scaling and in scenario replay.

use crate::error::SimError;
use serde::{Deserialize, Serialize};

pub const MIN_TIME_SCALE: f32 = 0.001;
pub const MAX_TIME_SCALE: f32 = 1000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    now_ms: u64,
    uptime_s: u64,
    subsecond_ms: u16,
    paused: bool,
    time_scale: f32,
    // Fractional milliseconds carried between ticks so sub-unity scales
    // (e.g. 0.5) still advance time, one whole millisecond at a time.
    scale_carry: f32,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            uptime_s: 0,
            subsecond_ms: 0,
            paused: false,
            time_scale: 1.0,
            scale_carry: 0.0,
        }
    }

    /// Advance simulated time by `delta_ms` wall milliseconds and return
    /// the whole simulated milliseconds to apply this tick.
    ///
    /// Returns 0 while paused; the caller still performs its own tick
    /// bookkeeping but skips component updates.
    pub fn advance(&mut self, delta_ms: u32) -> u64 {
        if self.paused {
            return 0;
        }

        let scaled = (delta_ms as f32) * self.time_scale + self.scale_carry;
        let whole = scaled.floor().max(0.0);
        self.scale_carry = scaled - whole;
        let step = whole as u64;

        self.now_ms += step;

        let total = self.subsecond_ms as u64 + step;
        self.uptime_s += total / 1000;
        self.subsecond_ms = (total % 1000) as u16;

        step
    }

    pub const fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub const fn uptime_s(&self) -> u64 {
        self.uptime_s
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub const fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Rejects non-finite or non-positive factors, clamps the rest to
    /// `[MIN_TIME_SCALE, MAX_TIME_SCALE]`.
    pub fn set_time_scale(&mut self, scale: f32) -> Result<(), SimError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(SimError::InvalidTimeScale(scale));
        }
        self.time_scale = scale.clamp(MIN_TIME_SCALE, MAX_TIME_SCALE);
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}
