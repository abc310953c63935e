//! Owns every worker task and drives the orderly shutdown sequence:
//! frame manager, then script runners, then timer, then camera.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::camera::worker::{CameraCommand, CameraWorker};
use crate::camera::{CameraBackend, CameraMode};
use crate::config::SharedConfig;
use crate::fits::FrameEncoder;
use crate::frame::CameraFrame;
use crate::frame_manager::FrameManager;
use crate::logging::LogBuffer;
use crate::queue::fifo;
use crate::script_runner::{PreviewPending, ReductionPending, ScriptRunner};
use crate::timer::worker::{TimerCommand, TimerWorker};
use crate::timer::{TimerBackend, TimerMode};
use crate::timestamp::TriggerTimestamp;

/// Everything needed to assemble a [`Supervisor`] for one run.
pub struct SupervisorConfig<E: FrameEncoder + 'static> {
    pub shared_config: SharedConfig,
    pub log_buffer: LogBuffer,
    pub camera_backend: Box<dyn CameraBackend>,
    pub timer_backend: Box<dyn TimerBackend>,
    pub encoder: Arc<E>,
    pub preview_script: Option<PathBuf>,
    pub reduction_script: Option<PathBuf>,
}

/// The running acquisition core: every worker task plus the handles and
/// notifiers needed to command and stop them.
pub struct Supervisor {
    pub shared_config: SharedConfig,
    pub log_buffer: LogBuffer,
    pub fatal_error: Arc<Mutex<Option<String>>>,
    pub camera_mode: watch::Receiver<CameraMode>,
    pub timer_mode: watch::Receiver<TimerMode>,
    camera_cmd_tx: tokio::sync::mpsc::UnboundedSender<CameraCommand>,
    timer_cmd_tx: tokio::sync::mpsc::UnboundedSender<TimerCommand>,
    frame_manager_shutdown: Arc<Notify>,
    script_shutdown: Arc<Notify>,
    status_shutdown: Arc<Notify>,
    camera_handle: JoinHandle<()>,
    timer_handle: JoinHandle<()>,
    frame_manager_handle: JoinHandle<()>,
    preview_handle: JoinHandle<()>,
    reduction_handle: JoinHandle<()>,
    status_handle: JoinHandle<()>,
}

impl Supervisor {
    pub fn start<E: FrameEncoder + 'static>(cfg: SupervisorConfig<E>) -> Self {
        let fatal_error = Arc::new(Mutex::new(None));

        let frame_notify = Arc::new(Notify::new());
        let trigger_notify = Arc::new(Notify::new());
        let (frame_tx, frame_rx) = fifo::<CameraFrame>("frames", frame_notify);
        let (trigger_tx, trigger_rx) = fifo::<TriggerTimestamp>("triggers", trigger_notify);

        // Read the backend's normalization function out before it moves into
        // the camera worker. Every concrete backend's `normalize_trigger` is
        // a pure function of a fixed per-backend calibration constant, so a
        // bare function pointer captures it completely.
        let normalize_fn_ptr = cfg.camera_backend.normalize_fn();
        let normalize_fn: Box<dyn Fn(TriggerTimestamp) -> TriggerTimestamp + Send> = Box::new(normalize_fn_ptr);

        let safe_to_stop = Arc::new(Notify::new());

        let (camera_worker, camera_mode_rx, camera_cmd_tx) = CameraWorker::new(
            cfg.camera_backend,
            cfg.shared_config.clone(),
            frame_tx,
            fatal_error.clone(),
            safe_to_stop.clone(),
        );

        let (timer_worker, timer_mode_rx, _current_time_rx, timer_cmd_tx) =
            TimerWorker::new(cfg.timer_backend, trigger_tx, fatal_error.clone(), safe_to_stop);

        let preview_runner = ScriptRunner::<PreviewPending>::new("preview");
        let reduction_runner = ScriptRunner::<ReductionPending>::new("reduction");
        let preview_handle_ref = preview_runner.handle();
        let reduction_handle_ref = reduction_runner.handle();

        let frame_manager = FrameManager::new(
            frame_rx,
            trigger_rx,
            cfg.shared_config.clone(),
            cfg.encoder,
            preview_handle_ref,
            reduction_handle_ref,
            normalize_fn,
        );

        let frame_manager_shutdown = Arc::new(Notify::new());
        let script_shutdown = Arc::new(Notify::new());
        let status_shutdown = Arc::new(Notify::new());

        let camera_handle = tokio::spawn(camera_worker.run());
        let timer_handle = tokio::spawn(timer_worker.run());
        let frame_manager_handle = tokio::spawn(frame_manager.run(frame_manager_shutdown.clone()));

        let preview_script = cfg.preview_script.unwrap_or_else(|| PathBuf::from("./preview.sh"));
        let reduction_script = cfg.reduction_script.unwrap_or_else(|| PathBuf::from("./reduction.sh"));
        let preview_handle = tokio::spawn(preview_runner.run(preview_script, script_shutdown.clone()));
        let reduction_handle = tokio::spawn(reduction_runner.run(reduction_script, script_shutdown.clone()));

        let status_handle = tokio::spawn(crate::console::run_status_line(
            camera_mode_rx.clone(),
            timer_mode_rx.clone(),
            status_shutdown.clone(),
        ));

        Self {
            shared_config: cfg.shared_config,
            log_buffer: cfg.log_buffer,
            fatal_error,
            camera_mode: camera_mode_rx,
            timer_mode: timer_mode_rx,
            camera_cmd_tx,
            timer_cmd_tx,
            frame_manager_shutdown,
            script_shutdown,
            status_shutdown,
            camera_handle,
            timer_handle,
            frame_manager_handle,
            preview_handle,
            reduction_handle,
            status_handle,
        }
    }

    pub fn start_acquiring(&self, shutter_open: bool) {
        let _ = self.camera_cmd_tx.send(CameraCommand::Start { shutter_open });
        let config = self.shared_config.snapshot();
        let _ = self.timer_cmd_tx.send(TimerCommand::StartExposure {
            exposure_time: config.exposure_time,
            milliseconds_mode: config.trigger_mode == crate::config::TriggerMode::Milliseconds,
            align_first_exposure: config.align_first_exposure,
        });
    }

    pub fn stop_acquiring(&self) {
        let _ = self.timer_cmd_tx.send(TimerCommand::StopExposure);
        let _ = self.camera_cmd_tx.send(CameraCommand::Stop);
    }

    /// Orderly shutdown: frame manager first (so no in-flight pair is
    /// dropped mid-write), then the script runners, then the timer, then
    /// the camera, joining each task before moving to the next.
    pub async fn shutdown(self) {
        info!("supervisor shutdown: stopping frame manager");
        self.frame_manager_shutdown.notify_one();
        let _ = self.frame_manager_handle.await;

        info!("supervisor shutdown: stopping script runners");
        self.script_shutdown.notify_waiters();
        let _ = self.preview_handle.await;
        let _ = self.reduction_handle.await;

        info!("supervisor shutdown: stopping timer worker");
        let _ = self.timer_cmd_tx.send(TimerCommand::Shutdown);
        let _ = self.timer_handle.await;

        info!("supervisor shutdown: stopping camera worker");
        let _ = self.camera_cmd_tx.send(CameraCommand::Shutdown);
        let _ = self.camera_handle.await;

        self.status_shutdown.notify_one();
        let _ = self.status_handle.await;
        info!("supervisor shutdown complete");
    }
}
