//! Platform seams the core needs from the embedding environment.
//!
//! Digital pins use [`embedded_hal::digital`] and settle delays use
//! [`embedded_hal::delay::DelayNs`]; the two traits here cover the pieces
//! `embedded-hal` has no contract for: single-shot ADC conversions (including
//! the bandgap-referenced one) and the millisecond counter.

/// Single-shot 10-bit ADC access.
///
/// Implementations must treat each conversion as one uninterruptible sequence
/// (reference/channel select, settle, start, poll, read): the hardware has a
/// single conversion register shared by all channels and the reference source,
/// so no other ADC access may be interleaved.
pub trait AdcSampler {
    /// Blocking conversion on the given analog input. Result is in `0..=1023`.
    fn sample_channel(&mut self, pin: u8) -> u16;

    /// Blocking conversion of the internal bandgap reference against the
    /// supply rail. Result is in `0..=1023`.
    ///
    /// Switching the reference multiplexer requires a settling delay of a few
    /// hundred microseconds before the conversion is started; that delay is a
    /// physical constraint and belongs to the implementation, not the caller.
    fn sample_bandgap(&mut self) -> u16;
}

/// A monotonically increasing millisecond counter.
///
/// The counter wraps around once its range is exhausted. All elapsed-time
/// comparisons in this crate use `now.wrapping_sub(last)`, which stays correct
/// across the wrap.
pub trait Monotonic {
    fn now_ms(&mut self) -> u32;
}
