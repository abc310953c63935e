//! The camera subsystem: a backend-polymorphic worker driving a CCD through
//! its acquisition lifecycle.

pub mod picam;
pub mod pvcam;
pub mod simulated;
pub mod worker;

use async_trait::async_trait;

use crate::config::AcquisitionConfig;
use crate::error::DaqError;
use crate::frame::{CameraFrame, Rect};
use crate::queue::FifoSender;
use crate::timestamp::TriggerTimestamp;

/// Observed/desired camera lifecycle state. Both halves are visible to the
/// supervisor; the worker drives observed towards desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Uninitialized,
    Initializing,
    Idle,
    AcquireStart,
    Acquiring,
    AcquireWait,
    AcquireStop,
    Shutdown,
}

/// Capability predicates a backend may or may not support.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraCapabilities {
    pub supports_readout_display: bool,
    pub supports_shutter_disabling: bool,
    pub supports_bias_acquisition: bool,
}

/// Polymorphism boundary the `CameraWorker` is generic over. The three
/// concrete variants (PVCAM, PICAM, Simulated) are chosen once at startup
/// from configuration and otherwise indistinguishable to the worker.
#[async_trait]
pub trait CameraBackend: Send {
    fn capabilities(&self) -> CameraCapabilities;

    async fn initialize(&mut self) -> Result<(), DaqError>;

    async fn update_settings(&mut self, config: &AcquisitionConfig) -> Result<(), DaqError>;

    async fn start_acquiring(&mut self, shutter_open: bool) -> Result<(), DaqError>;

    async fn stop_acquiring(&mut self) -> Result<(), DaqError>;

    /// The hot path: polls for a new frame and, if one is ready, pushes it
    /// to `sink`. The backend owns the pixel buffer until `sink.push`
    /// returns; `sink` always copies, so the backend is free to reuse its
    /// buffer immediately afterward.
    async fn tick(
        &mut self,
        current_mode: CameraMode,
        sink: &FifoSender<CameraFrame>,
    ) -> Result<(), DaqError>;

    async fn read_temperature(&mut self) -> Result<f64, DaqError>;

    fn query_ccd_region(&self) -> (Rect, Option<Rect>);

    /// Shifts a timer timestamp (which some cameras report at end-of-exposure)
    /// to canonical start-of-exposure. The shift is a backend-specific
    /// calibration constant — see DESIGN.md for the PVCAM/PICAM values.
    fn normalize_trigger(&self, ts: TriggerTimestamp) -> TriggerTimestamp;

    /// Returns `normalize_trigger` as a free function pointer, independent of
    /// `self`. Every concrete backend's normalization is a pure function of
    /// a fixed per-backend calibration constant, so this can be read out and
    /// handed to the frame manager before the backend itself moves into its
    /// worker task.
    fn normalize_fn(&self) -> fn(TriggerTimestamp) -> TriggerTimestamp;

    async fn uninitialize(&mut self) -> Result<(), DaqError>;

    fn port_table(&self) -> Vec<String>;
}
