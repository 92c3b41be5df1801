//! This crate provides the voltage-sensing, calibration and diagnostic core of an
//! ATX power-supply test/monitoring harness.
//!
//! It supports `no-std` environments by use of the `no_std` feature flag.
//!
//! The four fixed supply rails (+12V, +5V, +5VSB and +3.3V) are sampled through a
//! resistor-divider + 10-bit ADC front end. Raw codes are converted to calibrated
//! voltages either by divider ratio with supply-reference compensation, or by a
//! fitted polynomial curve, selectable per rail. A bandgap-referenced tracker
//! estimates the actual supply voltage powering the ADC, since that supply drifts
//! and all ratiometric samples must be scaled against it.
//!
//! The crate also implements the device side of the DFU diagnostic protocol: a
//! byte-oriented serial protocol used by the field calibration tooling to stream
//! live and averaged readings from the board.
//!
//! Hardware access goes through narrow seams so everything is testable off-target:
//! * ADC conversions through [`hal::AdcSampler`].
//! * Millisecond timing through [`hal::Monotonic`].
//! * Digital pins and settle delays through the `embedded-hal` traits.
//! * The serial channel through [`embedded_io::Read`] and [`embedded_io::Write`].
//!
//! The serial port used for DFU comms should be configured like so:
//! * Baud rate: 2000000
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

#![cfg_attr(feature = "no_std", no_std)]

pub mod channel;
pub mod curve;
pub mod dfu;
pub mod error;
pub mod hal;
pub mod vref;
pub mod voltmeter;

#[cfg(test)]
mod mock_hal;
