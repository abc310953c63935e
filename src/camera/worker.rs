//! The camera worker: drives a `CameraBackend` through its lifecycle and
//! owns the observed `CameraMode`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::SharedConfig;
use crate::frame::CameraFrame;
use crate::queue::FifoSender;

use super::{CameraBackend, CameraMode};

/// Operator-issued desired states. `CameraWorker` drives the observed mode
/// towards whichever of these was last requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    Start { shutter_open: bool },
    Stop,
    Shutdown,
}

/// How often the backend is polled for temperature, per spec.md §4.2.
const TEMPERATURE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// How often `tick` is invoked regardless of mode — the hot path itself
/// decides whether there is any work to do.
const TICK_INTERVAL: Duration = Duration::from_millis(10);
/// Upper bound on how long `AcquireWait` waits for the timer's safe-to-stop
/// signal before giving up and stopping the camera anyway. A real board that
/// never acknowledges the stop request (power loss, disconnected cable)
/// must not wedge the worker forever.
const SAFE_TO_STOP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct CameraWorker {
    backend: Box<dyn CameraBackend>,
    config: SharedConfig,
    frame_sink: FifoSender<CameraFrame>,
    mode_tx: watch::Sender<CameraMode>,
    commands: tokio::sync::mpsc::UnboundedReceiver<CameraCommand>,
    fatal_error: Arc<Mutex<Option<String>>>,
    /// Signaled by the timer worker once it is safe to stop acquiring — the
    /// explicit replacement for the ambient "safe to stop" global the
    /// original firmware driver consulted.
    safe_to_stop: Arc<Notify>,
}

impl CameraWorker {
    pub fn new(
        backend: Box<dyn CameraBackend>,
        config: SharedConfig,
        frame_sink: FifoSender<CameraFrame>,
        fatal_error: Arc<Mutex<Option<String>>>,
        safe_to_stop: Arc<Notify>,
    ) -> (Self, watch::Receiver<CameraMode>, tokio::sync::mpsc::UnboundedSender<CameraCommand>) {
        let (mode_tx, mode_rx) = watch::channel(CameraMode::Uninitialized);
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                backend,
                config,
                frame_sink,
                mode_tx,
                commands: cmd_rx,
                fatal_error,
                safe_to_stop,
            },
            mode_rx,
            cmd_tx,
        )
    }

    fn set_mode(&self, mode: CameraMode) {
        let _ = self.mode_tx.send(mode);
    }

    fn mode(&self) -> CameraMode {
        *self.mode_tx.borrow()
    }

    async fn fail(&mut self, context: &str, err: crate::error::DaqError) {
        error!(context, error = %err, "camera worker fatal error");
        *self.fatal_error.lock().await = Some(format!("{context}: {err}"));
        self.set_mode(CameraMode::Shutdown);
    }

    /// Runs until a `Shutdown` command is processed or a fatal backend error
    /// occurs. Intended to be the body of a long-lived `tokio::spawn`.
    pub async fn run(mut self) {
        self.set_mode(CameraMode::Initializing);
        if let Err(e) = self.backend.initialize().await {
            self.fail("initialize", e).await;
            return;
        }
        self.set_mode(CameraMode::Idle);
        info!("camera worker idle, awaiting commands");

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut temp_tick = tokio::time::interval(TEMPERATURE_SAMPLE_INTERVAL);
        temp_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.mode() == CameraMode::Shutdown {
                break;
            }
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(CameraCommand::Start { shutter_open }) => self.handle_start(shutter_open).await,
                        Some(CameraCommand::Stop) => self.handle_stop().await,
                        Some(CameraCommand::Shutdown) | None => {
                            self.handle_shutdown().await;
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    let mode = self.mode();
                    if let Err(e) = self.backend.tick(mode, &self.frame_sink).await {
                        self.fail("tick", e).await;
                        break;
                    }
                }
                _ = temp_tick.tick() => {
                    match self.backend.read_temperature().await {
                        Ok(_t) => {}
                        Err(e) => warn!(error = %e, "temperature read failed, continuing"),
                    }
                }
            }
        }
        info!("camera worker exiting");
    }

    async fn handle_start(&mut self, shutter_open: bool) {
        if self.mode() != CameraMode::Idle {
            warn!(mode = ?self.mode(), "ignoring start command outside idle");
            return;
        }
        self.set_mode(CameraMode::AcquireStart);
        let snapshot = self.config.snapshot();
        if let Err(e) = self.backend.update_settings(&snapshot).await {
            self.fail("update_settings", e).await;
            return;
        }
        if let Err(e) = self.backend.start_acquiring(shutter_open).await {
            self.fail("start_acquiring", e).await;
            return;
        }
        self.set_mode(CameraMode::Acquiring);
    }

    async fn handle_stop(&mut self) {
        if self.mode() != CameraMode::Acquiring {
            warn!(mode = ?self.mode(), "ignoring stop command outside acquiring");
            return;
        }
        self.set_mode(CameraMode::AcquireWait);
        info!("camera worker awaiting timer's safe-to-stop signal");
        tokio::select! {
            _ = self.safe_to_stop.notified() => {}
            _ = tokio::time::sleep(SAFE_TO_STOP_TIMEOUT) => {
                warn!("timed out waiting for timer safe-to-stop signal, stopping anyway");
            }
        }

        self.set_mode(CameraMode::AcquireStop);
        if let Err(e) = self.backend.stop_acquiring().await {
            self.fail("stop_acquiring", e).await;
            return;
        }
        self.set_mode(CameraMode::Idle);
    }

    async fn handle_shutdown(&mut self) {
        if self.mode() == CameraMode::Acquiring || self.mode() == CameraMode::AcquireWait {
            let _ = self.backend.stop_acquiring().await;
        }
        let _ = self.backend.uninitialize().await;
        self.set_mode(CameraMode::Shutdown);
    }
}
