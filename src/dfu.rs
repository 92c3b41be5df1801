//! Device side of the DFU diagnostic protocol.
//!
//! DFU mode is an exclusive diagnostic session used by the field calibration
//! tooling. The normal run loop calls [`DfuSession::check_entry`] with a short
//! listening window; when the host sends the magic byte the device answers
//! with the `"DFU"` tag, its protocol version and a busy status, then hands
//! control to [`DfuSession::run`], which dispatches a single command byte to
//! one of the interactive streaming views.
//!
//! Wire format, as consumed by the host tool:
//! * Bytes `>= 0xF9` are status codes ([`StatusCode`]).
//! * Bytes `< 0x20` are control bytes: `0x0D` flushes the host's line buffer,
//!   [`CLEAR_CONSOLE`] redraws the terminal in place.
//! * Everything else is printable ASCII belonging to the current line.

use core::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_io::Error as _;
use embedded_io::{ErrorKind, Read, Write};
use fugit::MillisDurationU32;
use heapless::String;
use strum_macros::EnumIter;

use crate::channel::Rail;
use crate::error::{Error, Result};
use crate::hal::{AdcSampler, Monotonic};
use crate::voltmeter::{AtxVoltmeter, RailSample};
use crate::vref::VrefTracker;

/// Entry magic the host sends to request DFU mode.
pub const DFU_MAGIC: u8 = 0xEA;

/// Version byte sent in the entry handshake.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// ASCII tag opening the entry handshake response.
pub const HANDSHAKE_TAG: &[u8] = b"DFU";

/// Non-magic bytes tolerated inside the listening window before the entry
/// attempt is written off as line noise.
pub const GARBAGE_LIMIT: usize = 128;

/// Input discarded after the handshake, settling noise from the host side.
pub const POST_HANDSHAKE_FLUSH: MillisDurationU32 = MillisDurationU32::from_ticks(1000);

/// How often the streaming views redraw the status block.
pub const REFRESH_INTERVAL: MillisDurationU32 = MillisDurationU32::from_ticks(500);

/// Control byte telling the host terminal to clear and redraw in place.
pub const CLEAR_CONSOLE: u8 = 0x11;

/// CR; the host flushes its line buffer on this byte.
pub const LINE_END: u8 = 0x0D;

/// Samples retained for the rolling mean in the streaming views.
const MEAN_WINDOW: usize = 4;

/// Single-byte device status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum StatusCode {
    None = 0xF9,
    Ready = 0xFA,
    Busy = 0xFB,
    WaitingCommand = 0xFC,
    NotImplemented = 0xFD,
    Executing = 0xFE,
    Terminated = 0xFF,
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0xF9 => Ok(StatusCode::None),
            0xFA => Ok(StatusCode::Ready),
            0xFB => Ok(StatusCode::Busy),
            0xFC => Ok(StatusCode::WaitingCommand),
            0xFD => Ok(StatusCode::NotImplemented),
            0xFE => Ok(StatusCode::Executing),
            0xFF => Ok(StatusCode::Terminated),
            other => Err(other),
        }
    }
}

/// Command codes accepted after the entry handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum Command {
    /// Leave DFU mode. Also honored inside the streaming views.
    Exit = 0,
    /// Reserved debug hook; terminates the session without streaming.
    Debug = 1,
    /// Live view of the raw bandgap conversion and derived supply voltage.
    BandgapView = 5,
    /// Live calibration view of the +12V rail.
    V12Calibration = 6,
    /// Live calibration view of the +5V rail.
    V5Calibration = 7,
    /// Live calibration view of the +5V standby rail.
    V5StandbyCalibration = 8,
    /// Live calibration view of the +3.3V rail.
    V3_3Calibration = 9,
    /// Live view of the supply-reference estimate.
    ReferenceView = 10,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0 => Ok(Command::Exit),
            1 => Ok(Command::Debug),
            5 => Ok(Command::BandgapView),
            6 => Ok(Command::V12Calibration),
            7 => Ok(Command::V5Calibration),
            8 => Ok(Command::V5StandbyCalibration),
            9 => Ok(Command::V3_3Calibration),
            10 => Ok(Command::ReferenceView),
            other => Err(other),
        }
    }
}

/// Fixed-size rotating sample window; the write index wraps at `N`.
struct Window<T, const N: usize> {
    entries: [T; N],
    index: usize,
    filled: usize,
}

impl<T: Copy + Default, const N: usize> Window<T, N> {
    fn new() -> Self {
        Self {
            entries: [T::default(); N],
            index: 0,
            filled: 0,
        }
    }

    fn push(&mut self, value: T) {
        self.entries[self.index] = value;
        self.index = (self.index + 1) % N;
        if self.filled < N {
            self.filled += 1;
        }
    }

    fn len(&self) -> usize {
        self.filled
    }

    fn iter(&self) -> core::slice::Iter<'_, T> {
        self.entries[..self.filled].iter()
    }
}

/// A DFU protocol endpoint over a byte-oriented duplex serial channel.
///
/// Single execution context, cooperative: all waiting is busy-polling against
/// the millisecond counter, nothing blocks the caller's thread of control
/// except the streaming views themselves.
pub struct DfuSession<S, C>
where
    S: Read + Write,
    C: Monotonic,
{
    serial: S,
    clock: C,
}

impl<S, C> DfuSession<S, C>
where
    S: Read + Write,
    C: Monotonic,
{
    pub fn new(serial: S, clock: C) -> Self {
        Self { serial, clock }
    }

    /// Listen for the entry magic inside `timeout`.
    ///
    /// Returns `Ok(false)` on timeout, or as soon as [`GARBAGE_LIMIT`]
    /// non-magic bytes have arrived (too much noise to be a real entry
    /// attempt); the caller stays in normal operation. On the magic byte the
    /// handshake response is sent, a [`POST_HANDSHAKE_FLUSH`] window of input
    /// is discarded, and `Ok(true)` tells the caller to enter
    /// [`DfuSession::run`].
    pub fn check_entry(&mut self, timeout: MillisDurationU32) -> Result<bool, S::Error> {
        let start = self.clock.now_ms();
        let mut garbage: usize = 0;

        while self.clock.now_ms().wrapping_sub(start) < timeout.ticks() {
            while let Some(byte) = self.try_read_byte()? {
                if byte == DFU_MAGIC {
                    self.serial.write_all(HANDSHAKE_TAG).map_err(Error::Serial)?;
                    self.serial
                        .write_all(&[PROTOCOL_VERSION, StatusCode::Busy as u8])
                        .map_err(Error::Serial)?;
                    self.discard_input(POST_HANDSHAKE_FLUSH)?;
                    return Ok(true);
                }

                garbage += 1;
                if garbage >= GARBAGE_LIMIT {
                    return Ok(false);
                }
            }
        }

        Ok(false)
    }

    /// Run one diagnostic session: announce ready, wait for a command byte,
    /// dispatch.
    ///
    /// Unknown bytes are answered with [`StatusCode::NotImplemented`] and the
    /// session keeps waiting. The streaming views run until the host sends
    /// [`Command::Exit`]; the session then writes [`StatusCode::Terminated`]
    /// and returns, leaving the reset decision to the embedder.
    pub fn run<A, PsOn, PgGood, Trigger, D, MC>(
        &mut self,
        meter: &mut AtxVoltmeter<A, PsOn, PgGood, Trigger, D, MC>,
    ) -> Result<(), S::Error>
    where
        A: AdcSampler,
        PsOn: InputPin,
        PgGood: InputPin,
        Trigger: OutputPin,
        D: DelayNs,
        MC: Monotonic,
    {
        self.write_status(StatusCode::Ready)?;

        loop {
            self.write_status(StatusCode::WaitingCommand)?;
            let code = self.read_byte_blocking()?;

            match Command::try_from(code) {
                Ok(Command::Exit) | Ok(Command::Debug) => break,
                Ok(Command::BandgapView) => {
                    self.stream_bandgap(meter)?;
                    break;
                }
                Ok(Command::ReferenceView) => {
                    self.stream_reference(meter)?;
                    break;
                }
                Ok(Command::V12Calibration) => {
                    self.stream_rail(meter, Rail::V12)?;
                    break;
                }
                Ok(Command::V5Calibration) => {
                    self.stream_rail(meter, Rail::V5)?;
                    break;
                }
                Ok(Command::V5StandbyCalibration) => {
                    self.stream_rail(meter, Rail::V5Standby)?;
                    break;
                }
                Ok(Command::V3_3Calibration) => {
                    self.stream_rail(meter, Rail::V3_3)?;
                    break;
                }
                Err(_) => self.write_status(StatusCode::NotImplemented)?,
            }
        }

        self.write_status(StatusCode::Terminated)?;
        Ok(())
    }

    fn stream_rail<A, PsOn, PgGood, Trigger, D, MC>(
        &mut self,
        meter: &mut AtxVoltmeter<A, PsOn, PgGood, Trigger, D, MC>,
        rail: Rail,
    ) -> Result<(), S::Error>
    where
        A: AdcSampler,
        PsOn: InputPin,
        PgGood: InputPin,
        Trigger: OutputPin,
        D: DelayNs,
        MC: Monotonic,
    {
        self.write_status(StatusCode::Executing)?;

        let mut window: Window<RailSample, MEAN_WINDOW> = Window::new();
        let mut last_emit = self
            .clock
            .now_ms()
            .wrapping_sub(REFRESH_INTERVAL.ticks());

        loop {
            let sample = meter.sample(rail);
            window.push(sample);

            let now = self.clock.now_ms();
            if now.wrapping_sub(last_emit) >= REFRESH_INTERVAL.ticks() {
                last_emit = now;
                self.emit_rail_block(rail, &sample, &window)?;
            }

            if self.exit_requested()? {
                return Ok(());
            }
        }
    }

    fn stream_bandgap<A, PsOn, PgGood, Trigger, D, MC>(
        &mut self,
        meter: &mut AtxVoltmeter<A, PsOn, PgGood, Trigger, D, MC>,
    ) -> Result<(), S::Error>
    where
        A: AdcSampler,
        PsOn: InputPin,
        PgGood: InputPin,
        Trigger: OutputPin,
        D: DelayNs,
        MC: Monotonic,
    {
        self.write_status(StatusCode::Executing)?;

        let mut window: Window<u16, MEAN_WINDOW> = Window::new();
        let mut last_emit = self
            .clock
            .now_ms()
            .wrapping_sub(REFRESH_INTERVAL.ticks());

        loop {
            let raw = meter.bandgap_raw();
            window.push(raw);

            let now = self.clock.now_ms();
            if now.wrapping_sub(last_emit) >= REFRESH_INTERVAL.ticks() {
                last_emit = now;

                let count = window.len() as f32;
                let mean_raw = window.iter().map(|&r| r as f32).sum::<f32>() / count;
                let supply_mv = VrefTracker::supply_mv_from_raw(raw);
                let mean_supply_mv = window
                    .iter()
                    .map(|&r| VrefTracker::supply_mv_from_raw(r) as f32)
                    .sum::<f32>()
                    / count;

                self.serial
                    .write_all(&[CLEAR_CONSOLE])
                    .map_err(Error::Serial)?;
                self.write_line("BANDGAP VIEW")?;

                let mut line: String<64> = String::new();
                write!(line, "RAW: {raw}  MEAN: {mean_raw:.1}")
                    .map_err(|_| Error::BufferError)?;
                self.write_line(&line)?;

                line.clear();
                write!(line, "VCC: {supply_mv}mV  MEAN: {mean_supply_mv:.1}mV")
                    .map_err(|_| Error::BufferError)?;
                self.write_line(&line)?;
            }

            if self.exit_requested()? {
                return Ok(());
            }
        }
    }

    fn stream_reference<A, PsOn, PgGood, Trigger, D, MC>(
        &mut self,
        meter: &mut AtxVoltmeter<A, PsOn, PgGood, Trigger, D, MC>,
    ) -> Result<(), S::Error>
    where
        A: AdcSampler,
        PsOn: InputPin,
        PgGood: InputPin,
        Trigger: OutputPin,
        D: DelayNs,
        MC: Monotonic,
    {
        self.write_status(StatusCode::Executing)?;

        let mut window: Window<u32, MEAN_WINDOW> = Window::new();
        let mut last_emit = self
            .clock
            .now_ms()
            .wrapping_sub(REFRESH_INTERVAL.ticks());

        loop {
            let supply_mv = meter.reference_millivolts();
            window.push(supply_mv);

            let now = self.clock.now_ms();
            if now.wrapping_sub(last_emit) >= REFRESH_INTERVAL.ticks() {
                last_emit = now;

                let count = window.len() as f32;
                let mean_mv = window.iter().map(|&mv| mv as f32).sum::<f32>() / count;

                self.serial
                    .write_all(&[CLEAR_CONSOLE])
                    .map_err(Error::Serial)?;
                self.write_line("AREF VIEW")?;

                let mut line: String<64> = String::new();
                write!(line, "VCC: {supply_mv}mV  MEAN: {mean_mv:.1}mV")
                    .map_err(|_| Error::BufferError)?;
                self.write_line(&line)?;
            }

            if self.exit_requested()? {
                return Ok(());
            }
        }
    }

    fn emit_rail_block(
        &mut self,
        rail: Rail,
        sample: &RailSample,
        window: &Window<RailSample, MEAN_WINDOW>,
    ) -> Result<(), S::Error> {
        let count = window.len() as f32;
        let mean_raw = window.iter().map(|s| s.raw as f32).sum::<f32>() / count;
        let mean_comp = window.iter().map(|s| s.compensated_mv as f32).sum::<f32>() / count;
        let mean_volts = window.iter().map(|s| s.volts).sum::<f32>() / count;

        self.serial
            .write_all(&[CLEAR_CONSOLE])
            .map_err(Error::Serial)?;

        let mut line: String<64> = String::new();
        write!(line, "{} CALIBRATION VIEW", rail.label()).map_err(|_| Error::BufferError)?;
        self.write_line(&line)?;

        line.clear();
        write!(line, "VCC: {}mV", sample.supply_mv).map_err(|_| Error::BufferError)?;
        self.write_line(&line)?;

        line.clear();
        write!(line, "RAW: {}  MEAN: {mean_raw:.1}", sample.raw)
            .map_err(|_| Error::BufferError)?;
        self.write_line(&line)?;

        line.clear();
        write!(line, "COMP: {}mV  MEAN: {mean_comp:.1}mV", sample.compensated_mv)
            .map_err(|_| Error::BufferError)?;
        self.write_line(&line)?;

        line.clear();
        write!(line, "CAL: {:.3}V  MEAN: {mean_volts:.3}V", sample.volts)
            .map_err(|_| Error::BufferError)?;
        self.write_line(&line)?;

        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), S::Error> {
        self.serial
            .write_all(line.as_bytes())
            .map_err(Error::Serial)?;
        self.serial.write_all(&[LINE_END]).map_err(Error::Serial)
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), S::Error> {
        self.serial
            .write_all(&[status as u8])
            .map_err(Error::Serial)
    }

    /// Drain and ignore whatever arrives inside `window`.
    fn discard_input(&mut self, window: MillisDurationU32) -> Result<(), S::Error> {
        let start = self.clock.now_ms();
        while self.clock.now_ms().wrapping_sub(start) < window.ticks() {
            while self.try_read_byte()?.is_some() {}
        }
        Ok(())
    }

    fn exit_requested(&mut self) -> Result<bool, S::Error> {
        while let Some(byte) = self.try_read_byte()? {
            if byte == Command::Exit as u8 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_byte_blocking(&mut self) -> Result<u8, S::Error> {
        loop {
            if let Some(byte) = self.try_read_byte()? {
                return Ok(byte);
            }
        }
    }

    /// One byte if available. A read error of kind `TimedOut`/`Other` means
    /// "no data right now", not failure.
    fn try_read_byte(&mut self) -> Result<Option<u8>, S::Error> {
        let mut buf = [0u8; 1];
        match self.serial.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Other) => Ok(None),
            Err(e) => Err(Error::Serial(e)),
        }
    }
}
