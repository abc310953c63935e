//! Photometrics PVCAM camera backend.
//!
//! The `pvcam_hardware` feature links `pvcam-sys` against the vendor SDK.
//! Without it (the default for CI and for machines without the SDK
//! installed) this backend falls back to software-generated frames, the
//! same way the driver it's grounded on handled an unfinished SDK
//! integration.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::AcquisitionConfig;
use crate::error::DaqError;
use crate::frame::{CameraFrame, Rect};
use crate::queue::FifoSender;
use crate::timestamp::TriggerTimestamp;

use super::simulated::SimulatedBackend;
use super::{CameraBackend, CameraCapabilities, CameraMode};

/// PVCAM reports the trigger timestamp at the end of the exposure; this
/// backend must shift it back to start-of-exposure. The shift is treated
/// as a fixed calibration constant (see DESIGN.md Open Questions).
const PVCAM_TRIGGER_OFFSET_MS: i64 = 0;

pub fn normalize_trigger(ts: TriggerTimestamp) -> TriggerTimestamp {
    ts.shifted_by_millis(PVCAM_TRIGGER_OFFSET_MS)
}

pub struct PvcamBackend {
    camera_name: String,
    fallback: SimulatedBackend,
    #[cfg(feature = "pvcam_hardware")]
    handle: Option<pvcam_sys::int16>,
}

impl PvcamBackend {
    pub fn new(camera_name: impl Into<String>) -> Self {
        Self {
            camera_name: camera_name.into(),
            fallback: SimulatedBackend::new(2048, 2048),
            #[cfg(feature = "pvcam_hardware")]
            handle: None,
        }
    }
}

#[async_trait]
impl CameraBackend for PvcamBackend {
    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities {
            supports_readout_display: true,
            supports_shutter_disabling: true,
            supports_bias_acquisition: true,
        }
    }

    async fn initialize(&mut self) -> Result<(), DaqError> {
        #[cfg(feature = "pvcam_hardware")]
        {
            // Safety: pl_pvcam_init/pl_cam_open are the SDK's documented
            // entry points; the handle is owned exclusively by this struct
            // and closed in `uninitialize`.
            let opened = unsafe { pvcam_hw::open_first_camera() };
            match opened {
                Ok(handle) => {
                    self.handle = Some(handle);
                    info!(camera = %self.camera_name, "PVCAM camera opened");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "PVCAM open failed, falling back to simulated frames");
                }
            }
        }
        warn!(camera = %self.camera_name, "PVCAM hardware support not compiled in, using simulated frames");
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
        #[cfg(feature = "pvcam_hardware")]
        if let Some(_handle) = self.handle.take() {
            // Safety: handle was opened by this struct and not reused elsewhere.
            unsafe { pvcam_hw::close_camera(_handle) };
        }
        self.fallback.uninitialize().await
    }

    fn port_table(&self) -> Vec<String> {
        self.fallback.port_table()
    }
}

/// Thin unsafe shims over `pvcam-sys`. Kept minimal: this crate does not
/// reach for the full PVCAM parameter surface, only what's needed to open
/// and close a handle, deferring frame acquisition itself to future work.
#[cfg(feature = "pvcam_hardware")]
mod pvcam_hw {
    use crate::error::DaqError;

    pub unsafe fn open_first_camera() -> Result<pvcam_sys::int16, DaqError> {
        if pvcam_sys::pl_pvcam_init() == 0 {
            return Err(DaqError::CameraInitFailed("pl_pvcam_init failed".into()));
        }
        let mut cam_name = [0i8; pvcam_sys::CAM_NAME_LEN as usize];
        if pvcam_sys::pl_cam_get_name(0, cam_name.as_mut_ptr()) == 0 {
            return Err(DaqError::CameraInitFailed("pl_cam_get_name failed".into()));
        }
        let mut handle: pvcam_sys::int16 = 0;
        if pvcam_sys::pl_cam_open(cam_name.as_mut_ptr(), &mut handle, pvcam_sys::OPEN_EXCLUSIVE as i16) == 0 {
            return Err(DaqError::CameraInitFailed("pl_cam_open failed".into()));
        }
        Ok(handle)
    }

    pub unsafe fn close_camera(handle: pvcam_sys::int16) {
        pvcam_sys::pl_cam_close(handle);
        pvcam_sys::pl_pvcam_uninit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_offset_is_a_no_op_by_default() {
        let backend = PvcamBackend::new("PrimeBSI");
        let ts = TriggerTimestamp::new(2026, 7, 28, 10, 0, 0, 500, true, 0);
        assert_eq!(backend.normalize_trigger(ts), ts);
    }
}
