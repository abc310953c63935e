//! The GPS timer subsystem: wire protocol, backend polymorphism, and the
//! worker driving trigger generation.

pub mod protocol;
pub mod serial_backend;
pub mod simulated;
pub mod worker;

use async_trait::async_trait;

use crate::error::DaqError;
use crate::timestamp::TriggerTimestamp;

/// Observed timer state, read from `STATUSMODE` packets (or driven directly
/// by the simulated backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Idle,
    Exposing,
    Readout,
    /// Timer is aligning to the next exposure-unit boundary before exposing.
    Align,
}

/// A fully parsed, checksum-verified packet from the timer wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    CurrentTime(TriggerTimestamp),
    DownloadTime(TriggerTimestamp),
    StatusMode(TimerMode),
    DebugString(String),
    DebugRaw(Vec<u8>),
    StopExposure,
}

/// Polymorphism boundary the `TimerWorker` is generic over: real hardware
/// over a serial link, or a simulated timer driven by the host clock.
#[async_trait]
pub trait TimerBackend: Send {
    async fn initialize(&mut self) -> Result<(), DaqError>;

    /// Sends any pending writes and returns freshly parsed packets, if any
    /// arrived since the last poll. Called on a fixed poll interval by
    /// `TimerWorker`.
    async fn poll(&mut self) -> Result<Vec<Packet>, DaqError>;

    async fn start_exposure(&mut self, exposure_time: u32, milliseconds_mode: bool) -> Result<(), DaqError>;

    async fn stop_exposure(&mut self) -> Result<(), DaqError>;

    async fn shutdown(&mut self) -> Result<(), DaqError>;
}
