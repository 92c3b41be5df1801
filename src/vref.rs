//! Supply-reference tracking.
//!
//! All rail samples are ratiometric against the supply actually powering the
//! ADC, and that supply drifts with load and temperature. The tracker infers
//! it by converting the internal fixed bandgap reference against the supply
//! and inverting the ratio.

use fugit::MillisDurationU32;

use crate::hal::AdcSampler;

/// The bandgap reference voltage, calibrated per device against a bench meter.
pub const BANDGAP_VOLTS: f32 = 1.0745;

/// Code range of the 10-bit ADC.
pub const ADC_FULL_SCALE: f32 = 1024.0;

/// How long a supply measurement stays valid before it must be retaken.
///
/// Switching the ADC to the bandgap reference costs hundreds of microseconds
/// of settling, so the measured value is reused inside this window rather than
/// paying that cost on every rail read.
pub const VREF_CACHE_LIFETIME: MillisDurationU32 = MillisDurationU32::from_ticks(300);

/// Tracks the supply voltage powering the ADC, in millivolts, with a
/// time-bounded cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct VrefTracker {
    cached_mv: u32,
    measured_at_ms: u32,
    valid: bool,
}

impl VrefTracker {
    pub const fn new() -> Self {
        Self {
            cached_mv: 0,
            measured_at_ms: 0,
            valid: false,
        }
    }

    /// Current supply estimate in millivolts.
    ///
    /// Reuses the cached measurement while it is younger than
    /// [`VREF_CACHE_LIFETIME`]; otherwise takes one fresh bandgap conversion.
    /// The expiry check is `now.wrapping_sub(measured_at)`, so a wrapped
    /// millisecond counter forces a remeasure instead of pinning the cache.
    pub fn millivolts<A: AdcSampler>(&mut self, adc: &mut A, now_ms: u32) -> u32 {
        if self.valid && now_ms.wrapping_sub(self.measured_at_ms) < VREF_CACHE_LIFETIME.ticks() {
            return self.cached_mv;
        }

        let raw = adc.sample_bandgap().max(1);
        self.cached_mv = Self::supply_mv_from_raw(raw);
        self.measured_at_ms = now_ms;
        self.valid = true;
        self.cached_mv
    }

    /// Drop the cached measurement; the next call remeasures unconditionally.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Invert a raw bandgap code into the supply voltage in millivolts,
    /// rounded to the nearest integer.
    pub fn supply_mv_from_raw(raw: u16) -> u32 {
        let raw = raw.max(1);
        (BANDGAP_VOLTS * ADC_FULL_SCALE * 1000.0 / raw as f32 + 0.5) as u32
    }
}
