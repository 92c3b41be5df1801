//! Our error types for the sensing engine and the DFU protocol.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Errors raised by the sensing engine.
///
/// Only digital pin access can fail; out-of-range analog readings are clamped,
/// never surfaced as errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseError {
    #[error("digital input read failed")]
    DigitalRead,
    #[error("digital output write failed")]
    DigitalWrite,
}

/// Custom error type for DFU protocol sessions.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    Serial(I),
    #[error("Sensing failure: {0}")]
    Sense(#[from] SenseError),
    #[error("Line buffer overflow")]
    BufferError,
}
