//! Simulated camera backend — anchors testability.
//!
//! Emits frames in lockstep with timer triggers, or at a fixed internal
//! cadence in BIAS mode. Fills pixels with pseudo-random values plus three
//! orientation markers so transform tests can verify the transform
//! semantics end to end.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::debug;

use crate::config::{AcquisitionConfig, TriggerMode};
use crate::error::DaqError;
use crate::frame::{stamp_orientation_markers, CameraFrame, Rect};
use crate::queue::FifoSender;
use crate::timestamp::TriggerTimestamp;

use super::{CameraBackend, CameraCapabilities, CameraMode};

/// Hard-coded internal cadence for BIAS-mode simulated frames. Whether this
/// should be configurable is an open question (spec.md §9) left unresolved
/// upstream; this crate keeps it fixed, as the source does.
const BIAS_CADENCE: Duration = Duration::from_millis(100);

/// The simulated backend reports triggers already at start-of-exposure.
pub fn normalize_trigger(ts: TriggerTimestamp) -> TriggerTimestamp {
    ts
}

/// Readout port/speed/gain names indexed by the corresponding
/// `camera_*_mode` config field, mirroring the fixed tables a real PVCAM or
/// PICAM backend would read out of its driver at startup.
const PORT_NAMES: &[&str] = &["Normal", "Fast"];
const SPEED_NAMES: &[&str] = &["1MHz", "5MHz", "10MHz"];
const GAIN_NAMES: &[&str] = &["1x", "2x", "3x"];

/// Degrees per tick the simulated sensor cools towards its setpoint.
const COOLING_STEP_C: f64 = 0.5;

fn mode_name(table: &[&str], mode: u32) -> String {
    table.get(mode as usize).copied().unwrap_or("Unknown").to_string()
}

pub struct SimulatedBackend {
    width: u32,
    height: u32,
    window_x: u32,
    window_y: u32,
    temperature: f64,
    target_temperature: f64,
    port: String,
    speed: String,
    gain: String,
    trigger_mode: TriggerMode,
    exposure_time: u32,
    last_emit: Option<Instant>,
    rng: StdRng,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(512, 512)
    }
}

impl SimulatedBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            window_x: 0,
            window_y: 0,
            temperature: -20.0,
            target_temperature: -20.0,
            port: PORT_NAMES[0].to_string(),
            speed: SPEED_NAMES[0].to_string(),
            gain: GAIN_NAMES[0].to_string(),
            trigger_mode: TriggerMode::Seconds,
            exposure_time: 5,
            last_emit: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Steps the simulated sensor temperature one tick closer to its
    /// setpoint, the way a real TEC controller approaches target gradually
    /// rather than jumping instantly.
    fn step_temperature(&mut self) {
        let delta = self.target_temperature - self.temperature;
        if delta.abs() <= COOLING_STEP_C {
            self.temperature = self.target_temperature;
        } else {
            self.temperature += delta.signum() * COOLING_STEP_C;
        }
    }

    fn generate_frame(&mut self) -> CameraFrame {
        let mut pixels = vec![0u16; (self.width * self.height) as usize];
        for p in pixels.iter_mut() {
            *p = self.rng.gen_range(0..=u16::MAX / 4);
        }
        stamp_orientation_markers(&mut pixels, self.width, self.height);
        self.step_temperature();

        CameraFrame {
            pixels,
            width: self.width,
            height: self.height,
            temperature: self.temperature,
            readout_time: Duration::from_millis(20),
            vertical_shift_time: Duration::from_micros(400),
            image_region: Some(Rect::new(self.window_x, self.window_y, self.width, self.height)),
            bias_region: Some(Rect::new(self.window_x, self.window_y, self.width.min(16), self.height)),
            em_gain: None,
            exposure_shortcut_ms: None,
            port: self.port.clone(),
            speed: self.speed.clone(),
            gain: self.gain.clone(),
            downloaded_time: Utc::now(),
            has_timestamp: self.trigger_mode == TriggerMode::Bias,
            relative_timestamp_secs: 0.0,
        }
    }

    fn cadence(&self) -> Duration {
        match self.trigger_mode {
            TriggerMode::Bias => BIAS_CADENCE,
            TriggerMode::Seconds => Duration::from_secs(self.exposure_time as u64),
            TriggerMode::Milliseconds => Duration::from_millis(self.exposure_time as u64),
        }
    }
}

#[async_trait]
impl CameraBackend for SimulatedBackend {
    fn capabilities(&self) -> CameraCapabilities {
        CameraCapabilities {
            supports_readout_display: true,
            supports_shutter_disabling: true,
            supports_bias_acquisition: true,
        }
    }

    async fn initialize(&mut self) -> Result<(), DaqError> {
        debug!("simulated camera initialized");
        Ok(())
    }

    async fn update_settings(&mut self, config: &AcquisitionConfig) -> Result<(), DaqError> {
        self.trigger_mode = config.trigger_mode;
        self.exposure_time = config.exposure_time;
        self.width = config.camera_window_width.max(1);
        self.height = config.camera_window_height.max(1);
        self.window_x = config.camera_window_x;
        self.window_y = config.camera_window_y;
        self.port = mode_name(PORT_NAMES, config.camera_readport_mode);
        self.speed = mode_name(SPEED_NAMES, config.camera_readspeed_mode);
        self.gain = mode_name(GAIN_NAMES, config.camera_gain_mode);
        self.target_temperature = config.camera_temperature;
        Ok(())
    }

    async fn start_acquiring(&mut self, _shutter_open: bool) -> Result<(), DaqError> {
        self.last_emit = Some(Instant::now());
        Ok(())
    }

    async fn stop_acquiring(&mut self) -> Result<(), DaqError> {
        self.last_emit = None;
        Ok(())
    }

    async fn tick(
        &mut self,
        current_mode: CameraMode,
        sink: &FifoSender<CameraFrame>,
    ) -> Result<(), DaqError> {
        if current_mode != CameraMode::Acquiring && current_mode != CameraMode::AcquireWait {
            return Ok(());
        }
        let now = Instant::now();
        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= self.cadence(),
            None => true,
        };
        if due {
            self.last_emit = Some(now);
            let frame = self.generate_frame();
            sink.push(frame);
        }
        Ok(())
    }

    async fn read_temperature(&mut self) -> Result<f64, DaqError> {
        Ok(self.temperature)
    }

    fn query_ccd_region(&self) -> (Rect, Option<Rect>) {
        (
            Rect::new(self.window_x, self.window_y, self.width, self.height),
            Some(Rect::new(self.window_x, self.window_y, self.width.min(16), self.height)),
        )
    }

    fn normalize_trigger(&self, ts: TriggerTimestamp) -> TriggerTimestamp {
        normalize_trigger(ts)
    }

    fn normalize_fn(&self) -> fn(TriggerTimestamp) -> TriggerTimestamp {
        normalize_trigger
    }

    async fn uninitialize(&mut self) -> Result<(), DaqError> {
        Ok(())
    }

    fn port_table(&self) -> Vec<String> {
        PORT_NAMES.iter().map(|s| s.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn bias_cadence_emits_frames_without_waiting_on_triggers() {
        let mut backend = SimulatedBackend::new(32, 32);
        let config = AcquisitionConfig {
            trigger_mode: TriggerMode::Bias,
            camera_window_width: 32,
            camera_window_height: 32,
            ..Default::default()
        };
        backend.update_settings(&config).await.unwrap();
        backend.start_acquiring(true).await.unwrap();

        let notify = Arc::new(Notify::new());
        let (tx, mut rx) = crate::queue::fifo::<CameraFrame>("frames", notify);

        backend.tick(CameraMode::Acquiring, &tx).await.unwrap();
        assert_eq!(rx.len(), 1, "first tick should emit immediately");
        tokio::time::sleep(Duration::from_millis(5)).await;
        backend.tick(CameraMode::Acquiring, &tx).await.unwrap();
        assert_eq!(rx.len(), 1, "second tick too soon should not emit");
        let _ = rx.try_pop();
        tokio::time::sleep(BIAS_CADENCE + Duration::from_millis(20)).await;
        backend.tick(CameraMode::Acquiring, &tx).await.unwrap();
        assert_eq!(rx.len(), 1, "tick after cadence elapses should emit");
    }

    #[tokio::test]
    async fn update_settings_wires_window_offset_and_readout_modes() {
        let mut backend = SimulatedBackend::new(32, 32);
        let config = AcquisitionConfig {
            camera_window_x: 8,
            camera_window_y: 4,
            camera_window_width: 32,
            camera_window_height: 32,
            camera_readport_mode: 1,
            camera_readspeed_mode: 2,
            camera_gain_mode: 1,
            ..Default::default()
        };
        backend.update_settings(&config).await.unwrap();

        let (region, _) = backend.query_ccd_region();
        assert_eq!((region.x, region.y), (8, 4));

        let frame = backend.generate_frame();
        assert_eq!(frame.port, "Fast");
        assert_eq!(frame.speed, "10MHz");
        assert_eq!(frame.gain, "2x");
    }

    #[tokio::test]
    async fn temperature_steps_towards_configured_setpoint_rather_than_jumping() {
        let mut backend = SimulatedBackend::new(8, 8);
        let config = AcquisitionConfig { camera_temperature: -30.0, ..Default::default() };
        backend.update_settings(&config).await.unwrap();

        let first = backend.generate_frame().temperature;
        assert!(first < -20.0 && first > -30.0, "should have stepped partway, got {first}");
        let second = backend.generate_frame().temperature;
        assert!(second < first, "should keep cooling towards setpoint");
    }

    #[tokio::test]
    async fn generated_frame_has_orientation_markers() {
        let mut backend = SimulatedBackend::new(64, 64);
        let frame = backend.generate_frame();
        assert_eq!(frame.pixels[0], 0);
        assert_eq!(frame.pixels[63], u16::MAX);
    }
}
