//! Host-side DFU console.
//!
//! Connects to a board over a real serial port, performs the DFU entry
//! handshake and renders the streamed status blocks in the terminal.
//!
//! Usage: `cargo run --example dfu_console [PORT] [COMMAND_CODE]`
//! With no port argument, available ports are offered interactively.
//! Press Ctrl+C when done to quit.

use std::env;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use inquire::Select;

use atx_voltmeter::dfu::{Command, StatusCode, CLEAR_CONSOLE, DFU_MAGIC, LINE_END, PROTOCOL_VERSION};

// The board runs the DFU link at this fixed rate.
const BAUD_RATE: u32 = 2_000_000;
const SERIAL_TIMEOUT_MS: u64 = 50;
const HANDSHAKE_TIMEOUT_S: u64 = 10;

fn main() {
    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    let command: u8 = env::args()
        .nth(2)
        .map(|arg| arg.parse().expect("Command code must be a byte value"))
        .unwrap_or(Command::V12Calibration as u8);

    println!("Using port: {} at {} baud", port_name, BAUD_RATE);

    let mut port = serialport::new(&port_name, BAUD_RATE)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    // Keep sending the magic until the board answers with the "DFU" tag.
    let started = Instant::now();
    let mut tag_window = [0u8; 3];
    'sync: loop {
        if started.elapsed().as_secs() > HANDSHAKE_TIMEOUT_S {
            eprintln!("No response from the board. Operation timed out.");
            std::process::exit(1);
        }

        port.write_all(&[DFU_MAGIC]).expect("Serial write failed");
        std::thread::sleep(Duration::from_millis(25));

        let mut byte = [0u8; 1];
        while let Ok(1) = port.read(&mut byte) {
            tag_window.rotate_left(1);
            tag_window[2] = byte[0];
            if &tag_window == b"DFU" {
                break 'sync;
            }
        }
    }

    let version = read_byte_blocking(&mut *port);
    if version != PROTOCOL_VERSION {
        eprintln!("Unsupported protocol version received: 0x{:02X}", version);
        std::process::exit(1);
    }
    println!("Successfully entered DFU mode.");
    println!("Remote protocol version: 0x{:02X}", version);

    // Wait for device ready, then send the command code.
    let mut status = StatusCode::try_from(read_byte_blocking(&mut *port)).unwrap_or(StatusCode::None);
    println!("Waiting for device ready status...");
    while status != StatusCode::Ready {
        let byte = read_byte_blocking(&mut *port);
        if let Ok(code) = StatusCode::try_from(byte) {
            report_status_change(&mut status, code);
            if status == StatusCode::Terminated {
                println!("Remote device has terminated the DFU session.");
                return;
            }
        }
    }

    println!("Sending command code {}", command);
    port.write_all(&[command]).expect("Serial write failed");

    // Console loop: status bytes, control bytes, printable text.
    let mut line = String::new();
    loop {
        let mut byte = [0u8; 1];
        let Ok(1) = port.read(&mut byte) else { continue };
        let value = byte[0];

        if let Ok(code) = StatusCode::try_from(value) {
            report_status_change(&mut status, code);
            if status == StatusCode::Terminated {
                println!("Remote device has terminated the DFU session.");
                return;
            }
            continue;
        }

        if value < 0x20 {
            match value {
                LINE_END => {
                    println!("{}", line);
                    line.clear();
                }
                CLEAR_CONSOLE => print!("\x1B[2J\x1B[H"),
                _ => {}
            }
        } else if value < 0x7F {
            line.push(value as char);
        }
    }
}

fn read_byte_blocking(port: &mut dyn serialport::SerialPort) -> u8 {
    let mut byte = [0u8; 1];
    loop {
        if let Ok(1) = port.read(&mut byte) {
            return byte[0];
        }
    }
}

fn report_status_change(current: &mut StatusCode, observed: StatusCode) {
    if observed != *current {
        println!("Device status changed from {:?} --to--> {:?}", current, observed);
        *current = observed;
    }
}
