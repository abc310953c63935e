//! Centralized error type for the acquisition core.
//!
//! `DaqError` consolidates the error taxonomy described in the design: fatal
//! errors that end the process, run-fatal errors that end only the current
//! acquisition, recoverable per-frame errors, timer protocol errors, and
//! configuration/user errors. Each worker maps its failures onto one of
//! these variants so the supervisor can route them uniformly.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug, Clone)]
pub enum DaqError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("rejected configuration change: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("camera backend error: {0}")]
    Camera(String),

    #[error("camera backend initialization failed: {0}")]
    CameraInitFailed(String),

    #[error("timer serial port not connected")]
    SerialPortNotConnected,

    #[error("unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("serial support not enabled; rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("timer protocol error: {0}")]
    Protocol(String),

    #[error("FITS encoder error: {0}")]
    Encoder(String),

    #[error("script runner error: {0}")]
    Script(String),

    #[error("feature '{0}' is not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<std::io::Error> for DaqError {
    fn from(err: std::io::Error) -> Self {
        DaqError::Io(err.to_string())
    }
}
