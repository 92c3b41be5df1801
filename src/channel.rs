//! Rail identifiers and per-rail calibration configuration.

use strum_macros::{EnumCount, EnumIter};

use crate::curve::CalibrationCurve;
use crate::vref::ADC_FULL_SCALE;

/// The four monitored supply rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
#[repr(usize)]
pub enum Rail {
    /// The +12V rail.
    V12 = 0,
    /// The +5V rail.
    V5 = 1,
    /// The +5V standby rail, live whenever mains is connected.
    V5Standby = 2,
    /// The +3.3V rail, wired straight into the microcontroller.
    V3_3 = 3,
}

impl Rail {
    /// Short label used in the diagnostic status blocks.
    pub const fn label(&self) -> &'static str {
        match self {
            Rail::V12 => "V12",
            Rail::V5 => "V5",
            Rail::V5Standby => "V5SB",
            Rail::V3_3 => "V3.3",
        }
    }
}

/// Which value a fitted curve is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveSource {
    /// The averaged raw ADC code.
    #[default]
    RawCode,
    /// The supply-compensated voltage at the ADC input, `raw * vcc / 1024`.
    SupplyVolts,
}

/// How a rail's averaged raw code becomes a calibrated voltage.
///
/// The two strategies coexist because boards in the field were calibrated both
/// ways; the variant is picked per rail at configuration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    /// Resistor-divider model with supply-reference compensation: the voltage
    /// at the ADC input is recovered ratiometrically against the measured
    /// supply, then scaled by `(r1 + r2) / r2` to undo the divider.
    Divider { r1: f32, r2: f32 },
    /// Fitted polynomial model.
    Curve {
        curve: CalibrationCurve,
        source: CurveSource,
    },
}

impl Calibration {
    /// A rail wired straight into the ADC, no divider network. Ratio 1.
    pub const fn direct() -> Self {
        Calibration::Divider { r1: 0.0, r2: 1.0 }
    }

    /// Convert an averaged raw code into volts, given the current supply
    /// estimate in millivolts. Negative results are clamped to 0: a rail
    /// physically cannot be negative, so anything below zero is a
    /// calibration or noise artifact.
    pub fn apply(&self, raw_mean: f32, vcc_mv: u32) -> f32 {
        let volts = match *self {
            Calibration::Divider { r1, r2 } => {
                let input = raw_mean * (vcc_mv as f32 / 1000.0) / ADC_FULL_SCALE;
                input * (r1 + r2) / r2
            }
            Calibration::Curve { curve, source } => {
                let x = match source {
                    CurveSource::RawCode => raw_mean,
                    CurveSource::SupplyVolts => {
                        raw_mean * (vcc_mv as f32 / 1000.0) / ADC_FULL_SCALE
                    }
                };
                curve.evaluate(x)
            }
        };

        if volts < 0.0 { 0.0 } else { volts }
    }
}

/// Per-rail configuration: analog input pin plus calibration strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Analog input pin identifier, as understood by the platform's
    /// [`AdcSampler`](crate::hal::AdcSampler).
    pub pin: u8,
    pub calibration: Calibration,
}

impl ChannelConfig {
    pub const fn divider(pin: u8, r1: f32, r2: f32) -> Self {
        Self {
            pin,
            calibration: Calibration::Divider { r1, r2 },
        }
    }

    pub const fn direct(pin: u8) -> Self {
        Self {
            pin,
            calibration: Calibration::direct(),
        }
    }

    pub const fn curve(pin: u8, curve: CalibrationCurve, source: CurveSource) -> Self {
        Self {
            pin,
            calibration: Calibration::Curve { curve, source },
        }
    }
}
