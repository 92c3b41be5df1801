//! We use this mocking module in unit tests to emulate the board: serial port,
//! ADC, digital pins, settle delays and the millisecond counter.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::hal::{AdcSampler, Monotonic};

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port.
    write_buffer: heapless::Vec<u8, 512>,
    /// Buffer containing pre-configured response data to be read.
    read_buffer: heapless::Vec<u8, 512>,
    /// Current position in the read buffer.
    read_position: usize,
    /// Flag to simulate write errors.
    should_error_on_write: bool,
    /// Flag to simulate read errors.
    should_error_on_read: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Simulated buffer overflow.
    BufferOverflow,
    /// Generic simulated error for testing.
    SimulatedError,
    /// Would block - no data available.
    WouldBlock,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Interrupted,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        for &byte in buf {
            self.write_buffer
                .push(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::WouldBlock);
        }

        let available = self.read_buffer.len() - self.read_position;
        let count = core::cmp::min(buf.len(), available);
        buf[..count]
            .copy_from_slice(&self.read_buffer[self.read_position..self.read_position + count]);
        self.read_position += count;
        Ok(count)
    }
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Set the data that will be returned when read() is called.
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        self.read_buffer.clear();
        self.read_position = 0;
        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Get a reference to the data that was written to this mock serial port.
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Configure whether write operations should fail with an error.
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error.
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

/// Our mock 10-bit ADC.
///
/// Each pin has a steady-state value, and specific conversions can be queued
/// per pin to emulate settling transients; queued readings are consumed first.
pub struct MockAdc {
    /// Steady-state reading per analog input pin.
    pub channel_values: [u16; 8],
    /// Raw bandgap conversion result. Defaults to 220, a supply right
    /// around 5.0V.
    pub bandgap_value: u16,
    /// Number of rail conversions performed.
    pub channel_conversions: usize,
    /// Number of bandgap conversions performed.
    pub bandgap_conversions: usize,
    queued: heapless::Deque<(u8, u16), 32>,
}

impl MockAdc {
    pub fn new() -> Self {
        Self {
            channel_values: [0; 8],
            bandgap_value: 220,
            channel_conversions: 0,
            bandgap_conversions: 0,
            queued: heapless::Deque::new(),
        }
    }

    /// Queue one conversion result for the given pin, ahead of the
    /// steady-state value.
    pub fn queue_reading(&mut self, pin: u8, value: u16) {
        self.queued
            .push_back((pin, value))
            .expect("mock ADC queue full");
    }
}

impl AdcSampler for MockAdc {
    fn sample_channel(&mut self, pin: u8) -> u16 {
        self.channel_conversions += 1;
        if let Some(&(queued_pin, value)) = self.queued.front() {
            if queued_pin == pin {
                self.queued.pop_front();
                return value;
            }
        }
        self.channel_values[pin as usize]
    }

    fn sample_bandgap(&mut self) -> u16 {
        self.bandgap_conversions += 1;
        self.bandgap_value
    }
}

/// Millisecond counter under test control. With a nonzero step it
/// auto-advances on every read, so busy-wait loops make progress.
pub struct MockClock {
    now: u32,
    step: u32,
}

impl MockClock {
    pub fn new() -> Self {
        Self { now: 0, step: 0 }
    }

    pub fn stepping(step: u32) -> Self {
        Self { now: 0, step }
    }

    pub fn advance(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }
}

impl Monotonic for MockClock {
    fn now_ms(&mut self) -> u32 {
        let now = self.now;
        self.now = self.now.wrapping_add(self.step);
        now
    }
}

/// Delay provider that only records how long it was asked to wait.
pub struct MockDelay {
    total_ns: u64,
}

impl MockDelay {
    pub fn new() -> Self {
        Self { total_ns: 0 }
    }

    pub fn total_us(&self) -> u64 {
        self.total_ns / 1000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// A digital pin usable as both input and output.
pub struct MockPin {
    pub high: bool,
    /// Flag to simulate pin access errors.
    pub fail: bool,
}

impl MockPin {
    pub fn low() -> Self {
        Self {
            high: false,
            fail: false,
        }
    }
}

#[derive(Debug)]
pub struct MockPinError;

impl embedded_hal::digital::Error for MockPinError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = MockPinError;
}

impl InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        if self.fail {
            return Err(MockPinError);
        }
        Ok(self.high)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.fail {
            return Err(MockPinError);
        }
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.fail {
            return Err(MockPinError);
        }
        self.high = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn serial_write_then_read_back() {
        let mut mock = MockSerial::new();
        mock.write(b"DFU").unwrap();
        assert_eq!(mock.written_data(), b"DFU");

        mock.set_read_data(b"\xEA\x01").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\xEA\x01");
    }

    #[test]
    fn serial_would_block_when_drained() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"x").unwrap();
        let mut buf = [0u8; 1];
        mock.read(&mut buf).unwrap();
        assert!(matches!(
            mock.read(&mut buf),
            Err(MockSerialError::WouldBlock)
        ));
    }

    #[test]
    fn serial_error_flags() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(mock.write(b"x").is_err());
        mock.set_write_error(false);
        assert!(mock.write(b"x").is_ok());

        mock.set_read_data(b"x").unwrap();
        mock.set_read_error(true);
        let mut buf = [0u8; 1];
        assert!(mock.read(&mut buf).is_err());
    }

    #[test]
    fn adc_queued_readings_come_first() {
        let mut adc = MockAdc::new();
        adc.channel_values[2] = 100;
        adc.queue_reading(2, 900);

        assert_eq!(adc.sample_channel(2), 900);
        assert_eq!(adc.sample_channel(2), 100);
        assert_eq!(adc.channel_conversions, 2);
    }

    #[test]
    fn adc_counts_bandgap_conversions() {
        let mut adc = MockAdc::new();
        adc.bandgap_value = 256;
        assert_eq!(adc.sample_bandgap(), 256);
        assert_eq!(adc.bandgap_conversions, 1);
    }

    #[test]
    fn stepping_clock_advances_on_read() {
        let mut clock = MockClock::stepping(10);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 10);

        let mut fixed = MockClock::new();
        fixed.advance(500);
        assert_eq!(fixed.now_ms(), 500);
        assert_eq!(fixed.now_ms(), 500);
    }

    #[test]
    fn delay_accumulates() {
        let mut delay = MockDelay::new();
        delay.delay_us(250);
        delay.delay_us(250);
        assert_eq!(delay.total_us(), 500);
    }

    #[test]
    fn pin_levels_and_failure() {
        let mut pin = MockPin::low();
        assert!(pin.is_low().unwrap());
        pin.set_high().unwrap();
        assert!(pin.is_high().unwrap());

        pin.fail = true;
        assert!(pin.is_high().is_err());
        assert!(pin.set_low().is_err());
    }
}
