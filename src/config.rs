//! Process-wide acquisition configuration.
//!
//! Mirrors the teacher's `config_v4::V4Config` layering (a TOML file merged
//! with `DAQ_`-prefixed environment overrides via `figment`), but the schema
//! itself is the flat `AcquisitionConfig` key set from the specification
//! rather than an instrument registry. The store is a validated,
//! mutex-guarded singleton: mutators reject hardware-binding fields while an
//! acquisition is in progress.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::DaqError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerMode {
    Seconds,
    Milliseconds,
    /// No external triggers; emit frames at a fixed internal cadence.
    Bias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Dark,
    Flat,
    Focus,
    Target,
}

/// The full recognized key set from the specification's AcquisitionConfig.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub trigger_mode: TriggerMode,
    pub exposure_time: u32,
    pub align_first_exposure: bool,
    pub save_frames: bool,
    pub validate_timestamps: bool,
    pub object_type: ObjectType,
    pub calibration_countdown: u32,
    pub run_prefix: String,
    pub output_dir: PathBuf,
    pub run_number: u32,
    pub frame_flip_x: bool,
    pub frame_flip_y: bool,
    pub frame_transpose: bool,
    pub camera_binning: u32,
    pub camera_window_x: u32,
    pub camera_window_y: u32,
    pub camera_window_width: u32,
    pub camera_window_height: u32,
    pub preview_rate_limit_ms: u64,
    pub camera_readport_mode: u32,
    pub camera_readspeed_mode: u32,
    pub camera_gain_mode: u32,
    pub camera_temperature: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Seconds,
            exposure_time: 5,
            align_first_exposure: false,
            save_frames: true,
            validate_timestamps: false,
            object_type: ObjectType::Target,
            calibration_countdown: 0,
            run_prefix: "run".into(),
            output_dir: PathBuf::from("."),
            run_number: 0,
            frame_flip_x: false,
            frame_flip_y: false,
            frame_transpose: false,
            camera_binning: 1,
            camera_window_x: 0,
            camera_window_y: 0,
            camera_window_width: 512,
            camera_window_height: 512,
            preview_rate_limit_ms: 2000,
            camera_readport_mode: 0,
            camera_readspeed_mode: 0,
            camera_gain_mode: 0,
            camera_temperature: -20.0,
        }
    }
}

/// Operator-facing strings consulted only when building FITS headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetadata {
    pub observer: String,
    pub observatory: String,
    pub telescope: String,
    pub instrument: String,
    pub filter_name: String,
    pub target_name: String,
    pub program_version: String,
    /// Plate scale in arcseconds/pixel, written to the `IM-SCALE` header
    /// key. Observatory-specific and not an acquisition parameter, so it
    /// lives alongside the other descriptive strings rather than in
    /// `AcquisitionConfig`.
    pub plate_scale_arcsec_per_pixel: f64,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            observer: "unknown".into(),
            observatory: "unknown".into(),
            telescope: "unknown".into(),
            instrument: "ccd_daq".into(),
            filter_name: "clear".into(),
            target_name: "unknown".into(),
            program_version: env!("CARGO_PKG_VERSION").into(),
            plate_scale_arcsec_per_pixel: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    acquisition: AcquisitionConfig,
    #[serde(default)]
    metadata: RunMetadata,
}

/// Hardware-binding fields that may not be changed while a camera mode
/// other than `Idle` is observed.
const HARDWARE_BINDING_FIELDS: &[&str] = &[
    "camera_binning",
    "camera_window_x",
    "camera_window_y",
    "camera_window_width",
    "camera_window_height",
    "camera_readport_mode",
    "camera_readspeed_mode",
    "camera_gain_mode",
    "camera_temperature",
];

pub fn is_hardware_binding_field(name: &str) -> bool {
    HARDWARE_BINDING_FIELDS.contains(&name)
}

struct Inner {
    acquisition: AcquisitionConfig,
    metadata: RunMetadata,
}

/// Process-wide mutable configuration store, consulted by `CameraWorker`
/// and `FrameManager` at each decision point.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Inner>>,
}

impl SharedConfig {
    pub fn new(acquisition: AcquisitionConfig, metadata: RunMetadata) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner { acquisition, metadata })),
        }
    }

    /// Loads `path` merged with `DAQ_`-prefixed environment overrides,
    /// falling back to defaults if the file is absent.
    pub fn load(path: &std::path::Path) -> Result<Self, DaqError> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DAQ_").split("__"));
        let file: ConfigFile = figment
            .extract()
            .map_err(|e| DaqError::Config(e.to_string()))?;
        Ok(Self::new(file.acquisition, file.metadata))
    }

    pub fn snapshot(&self) -> AcquisitionConfig {
        self.inner.read().expect("config lock poisoned").acquisition.clone()
    }

    pub fn metadata(&self) -> RunMetadata {
        self.inner.read().expect("config lock poisoned").metadata.clone()
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.inner.read().expect("config lock poisoned").acquisition.trigger_mode
    }

    /// Decrements `calibration_countdown`; auto-disables `save_frames` when
    /// it reaches zero for a non-TARGET object type. Returns whether saving
    /// remains permitted for the frame that was just processed.
    pub fn record_save_and_check_countdown(&self) -> bool {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let allowed = guard.acquisition.save_frames;
        if !allowed {
            return false;
        }
        if guard.acquisition.object_type != ObjectType::Target {
            if guard.acquisition.calibration_countdown > 0 {
                guard.acquisition.calibration_countdown -= 1;
                if guard.acquisition.calibration_countdown == 0 {
                    guard.acquisition.save_frames = false;
                }
            } else {
                guard.acquisition.save_frames = false;
                return false;
            }
        }
        true
    }

    pub fn next_run_number(&self) -> u32 {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let n = guard.acquisition.run_number;
        guard.acquisition.run_number += 1;
        n
    }

    /// Applies a named field mutation, rejecting hardware-binding fields
    /// while acquisition is in progress. `apply` receives a mutable
    /// reference to the live config and performs the actual assignment.
    pub fn set_field(
        &self,
        field: &str,
        acquisition_in_progress: bool,
        apply: impl FnOnce(&mut AcquisitionConfig),
    ) -> Result<(), DaqError> {
        if acquisition_in_progress && is_hardware_binding_field(field) {
            return Err(DaqError::Configuration(format!(
                "cannot change '{field}' while acquisition is in progress"
            )));
        }
        let mut guard = self.inner.write().expect("config lock poisoned");
        apply(&mut guard.acquisition);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_binding_field_rejected_while_acquiring() {
        let cfg = SharedConfig::new(AcquisitionConfig::default(), RunMetadata::default());
        let result = cfg.set_field("camera_binning", true, |c| c.camera_binning = 2);
        assert!(result.is_err());
        assert_eq!(cfg.snapshot().camera_binning, 1);
    }

    #[test]
    fn non_hardware_field_allowed_while_acquiring() {
        let cfg = SharedConfig::new(AcquisitionConfig::default(), RunMetadata::default());
        cfg.set_field("run_prefix", true, |c| c.run_prefix = "m31".into())
            .unwrap();
        assert_eq!(cfg.snapshot().run_prefix, "m31");
    }

    #[test]
    fn calibration_countdown_disables_saving_at_zero() {
        let mut acq = AcquisitionConfig::default();
        acq.object_type = ObjectType::Dark;
        acq.calibration_countdown = 1;
        let cfg = SharedConfig::new(acq, RunMetadata::default());
        assert!(cfg.record_save_and_check_countdown());
        assert!(!cfg.snapshot().save_frames);
        assert!(!cfg.record_save_and_check_countdown());
    }

    #[test]
    fn run_number_increments_monotonically() {
        let cfg = SharedConfig::new(AcquisitionConfig::default(), RunMetadata::default());
        assert_eq!(cfg.next_run_number(), 0);
        assert_eq!(cfg.next_run_number(), 1);
        assert_eq!(cfg.snapshot().run_number, 2);
    }
}
