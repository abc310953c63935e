//! Princeton Instruments PICAM camera backend.
//!
//! PICAM reports the GPS trigger at the start of the readout rather than
//! start-of-exposure, the opposite convention from PVCAM; the normalization
//! offset differs accordingly. No `picam-sys` binding crate exists in this
//! workspace (the PICAM SDK is Windows-only and was out of scope for the
//! FFI crate carried over), so this backend is software-only.

use async_trait::async_trait;
use tracing::warn;

use crate::config::AcquisitionConfig;
use crate::error::DaqError;
use crate::frame::{CameraFrame, Rect};
use crate::queue::FifoSender;
use crate::timestamp::TriggerTimestamp;

use super::simulated::SimulatedBackend;
use super::{CameraBackend, CameraCapabilities, CameraMode};

/// Calibration offset applied by `normalize_trigger`, distinct from PVCAM's.
/// See DESIGN.md for why both constants are preserved rather than unified.
const PICAM_TRIGGER_OFFSET_MS: i64 = -50;

pub fn normalize_trigger(ts: TriggerTimestamp) -> TriggerTimestamp {
    ts.shifted_by_millis(PICAM_TRIGGER_OFFSET_MS)
}

pub struct PicamBackend {
    camera_name: String,
    fallback: SimulatedBackend,
}

impl PicamBackend {
    pub fn new(camera_name: impl Into<String>) -> Self {
        Self {
            camera_name: camera_name.into(),
            fallback: SimulatedBackend::new(1024, 1024),
        }
    }
}

#[async_trait]
impl CameraBackend for PicamBackend {
    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities {
            supports_readout_display: true,
            supports_shutter_disabling: false,
            supports_bias_acquisition: true,
        }
    }

    async fn initialize(&mut self) -> Result<(), DaqError> {
        warn!(camera = %self.camera_name, "PICAM SDK integration not compiled in, using simulated frames");
        self.fallback.initialize().await
    }

    async fn update_settings(&mut self, config: &AcquisitionConfig) -> Result<(), DaqError> {
        self.fallback.update_settings(config).await
    }

    async fn start_acquiring(&mut self, shutter_open: bool) -> Result<(), DaqError> {
        self.fallback.start_acquiring(shutter_open).await
    }

    async fn stop_acquiring(&mut self) -> Result<(), DaqError> {
        self.fallback.stop_acquiring().await
    }

    async fn tick(
        &mut self,
        current_mode: CameraMode,
        sink: &FifoSender<CameraFrame>,
    ) -> Result<(), DaqError> {
        self.fallback.tick(current_mode, sink).await
    }

    async fn read_temperature(&mut self) -> Result<f64, DaqError> {
        self.fallback.read_temperature().await
    }

    fn query_ccd_region(&self) -> (Rect, Option<Rect>) {
        self.fallback.query_ccd_region()
    }

    fn normalize_trigger(&self, ts: TriggerTimestamp) -> TriggerTimestamp {
        normalize_trigger(ts)
    }

    fn normalize_fn(&self) -> fn(TriggerTimestamp) -> TriggerTimestamp {
        normalize_trigger
    }

    async fn uninitialize(&mut self) -> Result<(), DaqError> {
        self.fallback.uninitialize().await
    }

    fn port_table(&self) -> Vec<String> {
        self.fallback.port_table()
    }
}
