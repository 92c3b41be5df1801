//! The voltage-sensing engine for ATX compatible PC power supplies.
//!
//! [`AtxVoltmeter`] owns the ADC, the supply-reference tracker, the two status
//! inputs (PS_ON, PWR_GOOD) and the PS_ON trigger output. [`AtxVoltmeter::update`]
//! takes one consistent sampling pass over all four rails; the getters only ever
//! return the values cached by the last pass, so a caller can read every rail
//! from a single snapshot.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use strum::{EnumCount, IntoEnumIterator};

use crate::channel::{Calibration, ChannelConfig, CurveSource, Rail};
use crate::curve::CalibrationCurve;
use crate::error::SenseError;
use crate::hal::{AdcSampler, Monotonic};
use crate::vref::VrefTracker;

/// Default number of retained conversions per rail read.
pub const DEFAULT_SAMPLE_AVG_COUNT: u8 = 3;

/// A rail above this level on +5VSB counts as "standby power present".
pub const V5SB_PRESENT_THRESHOLD_VOLTS: f32 = 1.0;

/// Conversions discarded per rail read when noise mitigation is on.
///
/// Multiplexing the ADC between channels injects settling noise into the first
/// conversion(s) after a switch; throwing them away trades throughput for
/// accuracy.
const NOISE_DISCARD_COUNT: u8 = 2;

/// Settle time between discarded conversions.
const MUX_SETTLE_US: u32 = 250;

/// One sampling pass over a single rail.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RailSample {
    /// Averaged raw ADC code, `0..=1023`.
    pub raw: u16,
    /// Supply estimate the conversion was scaled against, in millivolts.
    pub supply_mv: u32,
    /// Supply-compensated voltage at the ADC input, in millivolts.
    pub compensated_mv: u32,
    /// Fully calibrated rail voltage, >= 0.
    pub volts: f32,
}

/// Sensing and control engine for one ATX supply.
pub struct AtxVoltmeter<A, PsOn, PgGood, Trigger, D, C>
where
    A: AdcSampler,
    PsOn: InputPin,
    PgGood: InputPin,
    Trigger: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    adc: A,
    ps_on_pin: PsOn,
    pg_good_pin: PgGood,
    ps_on_trigger_pin: Trigger,
    delay: D,
    clock: C,
    channels: [ChannelConfig; Rail::COUNT],
    sample_avg_count: u8,
    noise_mitigation: bool,
    vref: VrefTracker,
    // Cached state, written only by update().
    volts: [f32; Rail::COUNT],
    raw: [u16; Rail::COUNT],
    vcc_mv: u32,
    ps_on: bool,
    pg_good: bool,
    ps_on_trigger: bool,
}

/// Divider values measured on the reference board, ohms.
pub const V12_DIVIDER: (f32, f32) = (9945.0, 4640.0);
pub const V5_DIVIDER: (f32, f32) = (3292.0, 9968.0);
pub const V5SB_DIVIDER: (f32, f32) = (3278.0, 9953.0);

/// Channel table for the reference board wiring: +12V, +5V and +5VSB through
/// their measured dividers, +3.3V straight in.
pub const fn default_channels(
    v12_pin: u8,
    v5_pin: u8,
    v5sb_pin: u8,
    v3_3_pin: u8,
) -> [ChannelConfig; Rail::COUNT] {
    [
        ChannelConfig::divider(v12_pin, V12_DIVIDER.0, V12_DIVIDER.1),
        ChannelConfig::divider(v5_pin, V5_DIVIDER.0, V5_DIVIDER.1),
        ChannelConfig::divider(v5sb_pin, V5SB_DIVIDER.0, V5SB_DIVIDER.1),
        ChannelConfig::direct(v3_3_pin),
    ]
}

impl<A, PsOn, PgGood, Trigger, D, C> AtxVoltmeter<A, PsOn, PgGood, Trigger, D, C>
where
    A: AdcSampler,
    PsOn: InputPin,
    PgGood: InputPin,
    Trigger: OutputPin,
    D: DelayNs,
    C: Monotonic,
{
    /// Create a new engine over the given hardware and channel table.
    ///
    /// See [`default_channels`] for the reference board wiring.
    pub fn new(
        adc: A,
        ps_on_pin: PsOn,
        pg_good_pin: PgGood,
        ps_on_trigger_pin: Trigger,
        delay: D,
        clock: C,
        channels: [ChannelConfig; Rail::COUNT],
    ) -> Self {
        Self {
            adc,
            ps_on_pin,
            pg_good_pin,
            ps_on_trigger_pin,
            delay,
            clock,
            channels,
            sample_avg_count: DEFAULT_SAMPLE_AVG_COUNT,
            noise_mitigation: true,
            vref: VrefTracker::new(),
            volts: [0.0; Rail::COUNT],
            raw: [0; Rail::COUNT],
            vcc_mv: 0,
            ps_on: false,
            pg_good: false,
            ps_on_trigger: false,
        }
    }

    /// Take one full sampling pass: refresh the supply reference, resample and
    /// convert every rail against that single snapshot, then re-read the two
    /// status inputs. This is the only method that mutates the cached readings.
    pub fn update(&mut self) -> Result<(), SenseError> {
        let now = self.clock.now_ms();
        let vcc_mv = self.vref.millivolts(&mut self.adc, now);
        self.vcc_mv = vcc_mv;

        for rail in Rail::iter() {
            let sample = self.sample_with_supply(rail, vcc_mv);
            self.volts[rail as usize] = sample.volts;
            self.raw[rail as usize] = sample.raw;
        }

        self.ps_on = self
            .ps_on_pin
            .is_high()
            .map_err(|_| SenseError::DigitalRead)?;
        self.pg_good = self
            .pg_good_pin
            .is_high()
            .map_err(|_| SenseError::DigitalRead)?;
        Ok(())
    }

    /// Sample one rail immediately, outside the `update()` cache.
    ///
    /// Used by the diagnostic streaming views. The supply reference still goes
    /// through the tracker, so its cache lifetime applies.
    pub fn sample(&mut self, rail: Rail) -> RailSample {
        let now = self.clock.now_ms();
        let vcc_mv = self.vref.millivolts(&mut self.adc, now);
        self.sample_with_supply(rail, vcc_mv)
    }

    /// One raw bandgap conversion, bypassing the tracker cache.
    pub fn bandgap_raw(&mut self) -> u16 {
        self.adc.sample_bandgap()
    }

    /// Current supply estimate in millivolts, through the tracker cache.
    pub fn reference_millivolts(&mut self) -> u32 {
        let now = self.clock.now_ms();
        self.vref.millivolts(&mut self.adc, now)
    }

    fn sample_with_supply(&mut self, rail: Rail, vcc_mv: u32) -> RailSample {
        let config = self.channels[rail as usize];
        let raw = self.averaged_raw(config.pin);
        let raw_mean = raw as f32;
        let compensated_mv =
            (raw_mean * vcc_mv as f32 / crate::vref::ADC_FULL_SCALE + 0.5) as u32;
        let volts = config.calibration.apply(raw_mean, vcc_mv);
        RailSample {
            raw,
            supply_mv: vcc_mv,
            compensated_mv,
            volts,
        }
    }

    /// N retained conversions, integer mean. With a count of 1 the single
    /// conversion is returned unchanged.
    fn averaged_raw(&mut self, pin: u8) -> u16 {
        if self.noise_mitigation {
            for _ in 0..NOISE_DISCARD_COUNT {
                let _ = self.adc.sample_channel(pin);
                self.delay.delay_us(MUX_SETTLE_US);
            }
        }

        let count = self.sample_avg_count.max(1);
        let mut sum: u32 = 0;
        for _ in 0..count {
            sum += self.adc.sample_channel(pin) as u32;
        }

        if count <= 1 {
            sum as u16
        } else {
            (sum / count as u32) as u16
        }
    }

    // Cached readings from the last update() pass. None of these sample.

    /// Last calibrated +12V rail voltage.
    pub fn v12(&self) -> f32 {
        self.volts[Rail::V12 as usize]
    }

    /// Last calibrated +5V rail voltage.
    pub fn v5(&self) -> f32 {
        self.volts[Rail::V5 as usize]
    }

    /// Last calibrated +5V standby rail voltage.
    pub fn v5sb(&self) -> f32 {
        self.volts[Rail::V5Standby as usize]
    }

    /// Last calibrated +3.3V rail voltage.
    pub fn v3_3(&self) -> f32 {
        self.volts[Rail::V3_3 as usize]
    }

    pub fn voltage(&self, rail: Rail) -> f32 {
        self.volts[rail as usize]
    }

    pub fn raw(&self, rail: Rail) -> u16 {
        self.raw[rail as usize]
    }

    /// Supply snapshot the last pass was scaled against, millivolts.
    pub fn vcc_mv(&self) -> u32 {
        self.vcc_mv
    }

    // Status predicates, pure functions of the cached state.

    /// Standby power is present: +5VSB is above the presence threshold.
    pub fn is_v5sb_present(&self) -> bool {
        self.v5sb() > V5SB_PRESENT_THRESHOLD_VOLTS
    }

    /// The PS_ON line from the supply reads high.
    pub fn is_ps_on_present(&self) -> bool {
        self.ps_on
    }

    /// The PWR_GOOD line from the supply reads high.
    pub fn is_pg_good_present(&self) -> bool {
        self.pg_good
    }

    /// A supply is connected: standby power or a high PS_ON line.
    pub fn is_psu_present(&self) -> bool {
        self.is_v5sb_present() || self.is_ps_on_present()
    }

    /// The supply is running: PS_ON pulled low while standby power is present.
    pub fn is_on(&self) -> bool {
        !self.is_ps_on_present() && self.is_v5sb_present()
    }

    /// Level this engine last drove onto the PS_ON trigger line.
    pub fn is_triggered(&self) -> bool {
        self.ps_on_trigger
    }

    /// Assert the PS_ON trigger line.
    pub fn turn_on(&mut self) -> Result<(), SenseError> {
        self.ps_on_trigger_pin
            .set_high()
            .map_err(|_| SenseError::DigitalWrite)?;
        self.ps_on_trigger = true;
        Ok(())
    }

    /// Release the PS_ON trigger line.
    pub fn turn_off(&mut self) -> Result<(), SenseError> {
        self.ps_on_trigger_pin
            .set_low()
            .map_err(|_| SenseError::DigitalWrite)?;
        self.ps_on_trigger = false;
        Ok(())
    }

    pub fn sampling_avg_count(&self) -> u8 {
        self.sample_avg_count
    }

    pub fn set_sampling_avg_count(&mut self, count: u8) {
        self.sample_avg_count = count.max(1);
    }

    pub fn noise_mitigation(&self) -> bool {
        self.noise_mitigation
    }

    pub fn set_noise_mitigation(&mut self, enabled: bool) {
        self.noise_mitigation = enabled;
    }

    pub fn channel(&self, rail: Rail) -> &ChannelConfig {
        &self.channels[rail as usize]
    }

    /// Replace a rail's calibration strategy at runtime.
    pub fn set_calibration(&mut self, rail: Rail, calibration: Calibration) {
        self.channels[rail as usize].calibration = calibration;
    }

    /// Install a fitted curve on a rail, the shape the calibration tooling
    /// produces: five coefficients plus the input the fit was taken against.
    pub fn set_curve_coefficients(
        &mut self,
        rail: Rail,
        x4: f32,
        x3: f32,
        x2: f32,
        x1: f32,
        offset: f32,
        source: CurveSource,
    ) {
        self.channels[rail as usize].calibration = Calibration::Curve {
            curve: CalibrationCurve::new(x4, x3, x2, x1, offset),
            source,
        };
    }
}
