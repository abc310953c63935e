//! Real hardware GPS timer backend, communicating over a serial link.
//!
//! Serial I/O is blocking, so every read/write happens inside
//! `tokio::task::spawn_blocking`, the same pattern the rest of this
//! workspace uses for instrument adapters built on the `serialport` crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

use crate::error::DaqError;

use super::protocol::{encode_packet, Protocol};
use super::{Packet, TimerBackend};

const RESET: u8 = b'G';
const START_EXPOSURE: u8 = b'E';
const STOP_EXPOSURE: u8 = b'F';
const SIMULATE_CAMERA: u8 = b'I';

/// Internal read chunk size per poll; matches the 256-byte window the
/// protocol parser itself is bounded to.
const READ_CHUNK: usize = 256;

/// The firmware's bootloader escape sequence: a single (not doubled) sync
/// byte, the bootloader packet type, a two-byte zero length field, and the
/// usual CRLF terminator. It intentionally does not follow the `$$`-framed
/// wire protocol `encode_packet` produces — the bootloader is a distinct
/// listener on the same UART that only recognizes this exact byte string.
const BOOTLOADER_ESCAPE_SEQUENCE: &[u8] = b"$S\x00\x00\r\n";

/// How long to hold DTR low during the alternate hardware-reset sequence.
const DTR_RESET_PULSE: Duration = Duration::from_millis(250);

pub struct SerialTimerBackend {
    port_name: String,
    baud_rate: u32,
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
    protocol: Protocol,
    send_buffer: Vec<u8>,
}

impl SerialTimerBackend {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            #[cfg(feature = "instrument_serial")]
            port: None,
            protocol: Protocol::new(),
            send_buffer: Vec::new(),
        }
    }

    fn queue(&mut self, packet_type: u8, data: &[u8]) {
        self.send_buffer.extend(encode_packet(packet_type, data));
    }

    /// Escapes into the board's bootloader, bypassing the usual `$$`-framed
    /// protocol entirely. Used only for firmware updates, never during
    /// normal acquisition.
    #[cfg(feature = "instrument_serial")]
    pub async fn enter_bootloader(&mut self) -> Result<(), DaqError> {
        let port = self.port.clone().ok_or(DaqError::SerialPortNotConnected)?;
        tokio::task::spawn_blocking(move || -> Result<(), DaqError> {
            use std::io::Write;
            let mut guard = port.lock().expect("timer serial port mutex poisoned");
            guard
                .write_all(BOOTLOADER_ESCAPE_SEQUENCE)
                .map_err(|e| DaqError::Io(format!("bootloader escape write failed: {e}")))
        })
        .await
        .map_err(|e| DaqError::Io(format!("timer serial task panicked: {e}")))?
    }

    /// Alternate hardware-reset path: pulses DTR low and back high rather
    /// than sending a `$$G` reset packet, for boards wedged badly enough
    /// that the packet-level reset is not being processed.
    #[cfg(feature = "instrument_serial")]
    pub async fn reset_via_dtr(&mut self) -> Result<(), DaqError> {
        let port = self.port.clone().ok_or(DaqError::SerialPortNotConnected)?;
        tokio::task::spawn_blocking(move || -> Result<(), DaqError> {
            let mut guard = port.lock().expect("timer serial port mutex poisoned");
            guard
                .write_data_terminal_ready(false)
                .map_err(|e| DaqError::Io(format!("DTR low failed: {e}")))?;
            std::thread::sleep(DTR_RESET_PULSE);
            guard
                .write_data_terminal_ready(true)
                .map_err(|e| DaqError::Io(format!("DTR high failed: {e}")))
        })
        .await
        .map_err(|e| DaqError::Io(format!("timer serial task panicked: {e}")))?
    }
}

#[async_trait]
impl TimerBackend for SerialTimerBackend {
    #[cfg(feature = "instrument_serial")]
    async fn initialize(&mut self) -> Result<(), DaqError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| DaqError::Io(format!("failed to open timer port '{}': {e}", self.port_name)))?;
        self.port = Some(Arc::new(Mutex::new(port)));
        info!(port = %self.port_name, baud = self.baud_rate, "timer serial port opened");
        self.queue(RESET, &[]);
        Ok(())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn initialize(&mut self) -> Result<(), DaqError> {
        Err(DaqError::SerialFeatureDisabled)
    }

    #[cfg(feature = "instrument_serial")]
    async fn poll(&mut self) -> Result<Vec<Packet>, DaqError> {
        let port = self.port.clone().ok_or(DaqError::SerialPortNotConnected)?;
        let pending = std::mem::take(&mut self.send_buffer);

        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, DaqError> {
            use std::io::{Read, Write};
            let mut guard = port.lock().expect("timer serial port mutex poisoned");

            if !pending.is_empty() {
                guard
                    .write_all(&pending)
                    .map_err(|e| DaqError::Io(format!("timer write failed: {e}")))?;
            }

            let mut buf = [0u8; READ_CHUNK];
            match guard.read(&mut buf) {
                Ok(0) => Err(DaqError::SerialUnexpectedEof),
                Ok(n) => Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(DaqError::Io(format!("timer read failed: {e}"))),
            }
        })
        .await
        .map_err(|e| DaqError::Io(format!("timer serial task panicked: {e}")))??;

        if !bytes.is_empty() {
            debug!(count = bytes.len(), "timer serial bytes received");
        }
        Ok(self.protocol.feed(&bytes))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn poll(&mut self) -> Result<Vec<Packet>, DaqError> {
        Err(DaqError::SerialFeatureDisabled)
    }

    async fn start_exposure(&mut self, exposure_time: u32, _milliseconds_mode: bool) -> Result<(), DaqError> {
        if self.port_name.is_empty() {
            warn!("starting exposure with no configured timer port");
        }
        self.queue(SIMULATE_CAMERA, &[0]);
        // DATA is always exposure_units as a 2-byte LE field per spec.md §6,
        // regardless of whether the unit is seconds or milliseconds.
        let data = (exposure_time as u16).to_le_bytes();
        self.queue(START_EXPOSURE, &data);
        Ok(())
    }

    async fn stop_exposure(&mut self) -> Result<(), DaqError> {
        self.queue(STOP_EXPOSURE, &[]);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DaqError> {
        self.queue(RESET, &[]);
        #[cfg(feature = "instrument_serial")]
        {
            if let Some(port) = self.port.take() {
                let pending = std::mem::take(&mut self.send_buffer);
                let _ = tokio::task::spawn_blocking(move || {
                    use std::io::Write;
                    if let Ok(mut guard) = port.lock() {
                        let _ = guard.write_all(&pending);
                    }
                })
                .await;
            }
        }
        Ok(())
    }
}
