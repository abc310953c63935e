//! The timer worker: polls a `TimerBackend` on a fixed cadence, maintains
//! observed mode and current timestamp, and forwards trigger events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{error, info, warn};

use crate::queue::FifoSender;
use crate::timestamp::TriggerTimestamp;

use super::{Packet, TimerBackend, TimerMode};

/// Matches the original firmware driver's 100ms poll cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    StartExposure {
        exposure_time: u32,
        milliseconds_mode: bool,
        /// If set, the worker delays the call to `start_exposure` until the
        /// next wall-clock minute boundary before issuing it, per
        /// `AcquisitionConfig::align_first_exposure`.
        align_first_exposure: bool,
    },
    StopExposure,
    Shutdown,
}

pub struct TimerWorker {
    backend: Box<dyn TimerBackend>,
    trigger_sink: FifoSender<TriggerTimestamp>,
    mode_tx: watch::Sender<TimerMode>,
    current_time_tx: watch::Sender<Option<TriggerTimestamp>>,
    commands: tokio::sync::mpsc::UnboundedReceiver<TimerCommand>,
    fatal_error: Arc<Mutex<Option<String>>>,
    /// Signaled when the board acknowledges a stop-exposure request (the
    /// `F` packet is bidirectional), telling the camera worker it is safe
    /// to stop acquiring.
    safe_to_stop: Arc<Notify>,
}

impl TimerWorker {
    #[allow(clippy::type_complexity)]
    pub fn new(
        backend: Box<dyn TimerBackend>,
        trigger_sink: FifoSender<TriggerTimestamp>,
        fatal_error: Arc<Mutex<Option<String>>>,
        safe_to_stop: Arc<Notify>,
    ) -> (
        Self,
        watch::Receiver<TimerMode>,
        watch::Receiver<Option<TriggerTimestamp>>,
        tokio::sync::mpsc::UnboundedSender<TimerCommand>,
    ) {
        let (mode_tx, mode_rx) = watch::channel(TimerMode::Idle);
        let (current_time_tx, current_time_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                backend,
                trigger_sink,
                mode_tx,
                current_time_tx,
                commands: cmd_rx,
                fatal_error,
                safe_to_stop,
            },
            mode_rx,
            current_time_rx,
            cmd_tx,
        )
    }

    /// Delays until the next wall-clock minute boundary, publishing `Align`
    /// as the observed mode meanwhile. This is host-side behavior: the wire
    /// protocol's `START_EXPOSURE` packet carries no alignment flag, so the
    /// worker withholds the command rather than the board delaying it.
    async fn align_to_minute_boundary(&mut self) {
        let _ = self.mode_tx.send(TimerMode::Align);
        let remaining_ms = ms_until_next_minute_boundary(chrono::Utc::now().timestamp_millis());
        info!(remaining_ms, "aligning first exposure to next minute boundary");
        tokio::time::sleep(Duration::from_millis(remaining_ms)).await;
    }

    async fn fail(&mut self, context: &str, err: crate::error::DaqError) {
        error!(context, error = %err, "timer worker fatal error");
        *self.fatal_error.lock().await = Some(format!("{context}: {err}"));
    }

    pub async fn run(mut self) {
        if let Err(e) = self.backend.initialize().await {
            self.fail("initialize", e).await;
            return;
        }
        info!("timer worker initialized");

        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(TimerCommand::StartExposure { exposure_time, milliseconds_mode, align_first_exposure }) => {
                            if align_first_exposure {
                                self.align_to_minute_boundary().await;
                            }
                            if let Err(e) = self.backend.start_exposure(exposure_time, milliseconds_mode).await {
                                self.fail("start_exposure", e).await;
                            }
                        }
                        Some(TimerCommand::StopExposure) => {
                            if let Err(e) = self.backend.stop_exposure().await {
                                self.fail("stop_exposure", e).await;
                            }
                        }
                        Some(TimerCommand::Shutdown) | None => {
                            let _ = self.backend.shutdown().await;
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    match self.backend.poll().await {
                        Ok(packets) => self.handle_packets(packets),
                        Err(e) => {
                            self.fail("poll", e).await;
                            break;
                        }
                    }
                }
            }
        }
        info!("timer worker exiting");
    }

    fn handle_packets(&mut self, packets: Vec<Packet>) {
        for packet in packets {
            match packet {
                Packet::CurrentTime(ts) => {
                    let _ = self.current_time_tx.send(Some(ts));
                }
                Packet::DownloadTime(ts) => {
                    self.trigger_sink.push(ts);
                }
                Packet::StatusMode(mode) => {
                    let _ = self.mode_tx.send(mode);
                }
                Packet::DebugString(s) => {
                    info!(message = %s, "timer debug string");
                }
                Packet::DebugRaw(bytes) => {
                    warn!(len = bytes.len(), "timer debug raw bytes received");
                }
                Packet::StopExposure => {
                    info!("timer acknowledged stop-exposure request, signaling camera worker");
                    self.safe_to_stop.notify_one();
                }
            }
        }
    }
}

/// How many milliseconds remain until the next wall-clock minute boundary,
/// given the current time in milliseconds since the epoch. Exactly 0 when
/// already sitting on a boundary.
fn ms_until_next_minute_boundary(ms_since_epoch: i64) -> u64 {
    (60_000 - ms_since_epoch.rem_euclid(60_000)).rem_euclid(60_000) as u64
}
