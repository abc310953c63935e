//! The pairing engine: matches downloaded camera frames against GPS
//! trigger timestamps, applies the configured geometric transforms, and
//! hands the result to the FITS encoder and the preview/reduction scripts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::error::DaqError;
use crate::fits::{atomic_write, FrameEncoder, FrameRecord};
use crate::frame::CameraFrame;
use crate::queue::FifoReceiver;
use crate::script_runner::{PreviewPending, ReductionPending, ScriptRunnerHandle};
use crate::timestamp::TriggerTimestamp;

/// How far apart (in milliseconds) a frame's estimated exposure start and
/// its paired trigger may be before the pairing is considered
/// desynchronized.
const CONSISTENCY_TOLERANCE_MS: i64 = 1500;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct FrameManager<E: FrameEncoder> {
    frames: FifoReceiver<CameraFrame>,
    triggers: FifoReceiver<TriggerTimestamp>,
    config: SharedConfig,
    encoder: Arc<E>,
    preview: ScriptRunnerHandle<PreviewPending>,
    reduction: ScriptRunnerHandle<ReductionPending>,
    normalize_trigger: Box<dyn Fn(TriggerTimestamp) -> TriggerTimestamp + Send>,
    frame_counter: u32,
    /// True when the next frame/trigger pair produced is the first of a run
    /// (or the first since the last mismatch purge) and must be discarded
    /// unread rather than paired.
    first_frame_pending: bool,
    last_preview_write: Option<Instant>,
}

impl<E: FrameEncoder> FrameManager<E> {
    pub fn new(
        frames: FifoReceiver<CameraFrame>,
        triggers: FifoReceiver<TriggerTimestamp>,
        config: SharedConfig,
        encoder: Arc<E>,
        preview: ScriptRunnerHandle<PreviewPending>,
        reduction: ScriptRunnerHandle<ReductionPending>,
        normalize_trigger: Box<dyn Fn(TriggerTimestamp) -> TriggerTimestamp + Send>,
    ) -> Self {
        Self {
            frames,
            triggers,
            config,
            encoder,
            preview,
            reduction,
            normalize_trigger,
            frame_counter: 0,
            first_frame_pending: true,
            last_preview_write: None,
        }
    }

    /// Runs until `shutdown` is notified, waking whenever a frame or
    /// trigger arrives or the progress-log interval elapses.
    pub async fn run(mut self, shutdown: Arc<tokio::sync::Notify>) {
        let mut progress_tick = tokio::time::interval(PROGRESS_LOG_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = self.frames.notified() => self.process_available(),
                _ = self.triggers.notified() => self.process_available(),
                _ = progress_tick.tick() => {
                    info!(
                        queued_frames = self.frames.len(),
                        queued_triggers = self.triggers.len(),
                        frames_written = self.frame_counter,
                        "frame manager progress"
                    );
                }
            }
        }
        info!("frame manager exiting");
    }

    fn process_available(&mut self) {
        let trigger_mode = self.config.trigger_mode();
        if trigger_mode == crate::config::TriggerMode::Bias {
            while let Some(frame) = self.frames.try_pop() {
                self.handle_pair(frame, None);
            }
            return;
        }

        loop {
            let (Some(frame), Some(trigger)) = (self.frames.try_pop(), self.triggers.try_pop()) else {
                break;
            };
            let trigger = (self.normalize_trigger)(trigger);

            if self.first_frame_pending {
                self.first_frame_pending = false;
                warn!("discarding first exposure of this run, pairing not yet established");
                continue;
            }

            let snapshot = self.config.snapshot();
            let exposure = if snapshot.trigger_mode == crate::config::TriggerMode::Milliseconds {
                Duration::from_millis(snapshot.exposure_time as u64)
            } else {
                Duration::from_secs(snapshot.exposure_time as u64)
            };
            let estimated_start = frame.estimated_exposure_start(exposure);
            let delta = (estimated_start - trigger.to_datetime()).abs();
            if delta.num_milliseconds() > CONSISTENCY_TOLERANCE_MS {
                if self.config.snapshot().validate_timestamps {
                    tracing::error!(
                        delta_ms = delta.num_milliseconds(),
                        "frame/trigger consistency check failed, purging both queues"
                    );
                    while self.frames.try_pop().is_some() {}
                    while self.triggers.try_pop().is_some() {}
                    self.first_frame_pending = true;
                    break;
                }
                warn!(
                    delta_ms = delta.num_milliseconds(),
                    "frame/trigger consistency check failed, continuing without validation"
                );
            }

            self.handle_pair(frame, Some(trigger));
        }
    }

    fn handle_pair(&mut self, mut frame: CameraFrame, trigger: Option<TriggerTimestamp>) {
        let config = self.config.snapshot();
        let metadata = self.config.metadata();
        frame.apply_transforms(config.frame_flip_x, config.frame_flip_y, config.frame_transpose);

        self.frame_counter += 1;
        let milliseconds_precision = config.trigger_mode == crate::config::TriggerMode::Milliseconds;
        let should_save = self.config.record_save_and_check_countdown();
        // Use the not-yet-incremented run number for this attempt; only
        // claim it (advance the counter) once the write actually succeeds,
        // so a failed save doesn't burn a run number.
        let run_number = self.config.snapshot().run_number;

        let record = FrameRecord {
            frame: &frame,
            trigger: trigger.as_ref(),
            exposure_time: config.exposure_time,
            milliseconds_precision,
            config: &config,
            metadata: &metadata,
            run_number,
            frame_number: self.frame_counter,
            downloaded_at: frame.downloaded_time,
        };

        if should_save {
            match self.save_frame(&record) {
                Ok(()) => {
                    self.config.next_run_number();
                }
                Err(e) => warn!(error = %e, "failed to save frame"),
            }
        }

        self.maybe_write_preview(&record, config.preview_rate_limit_ms);
    }

    fn save_frame(&self, record: &FrameRecord<'_>) -> Result<(), DaqError> {
        let bytes = self.encoder.encode(record)?;
        let filename = format!(
            "{}-{:04}{}",
            record.config.run_prefix,
            record.run_number,
            self.encoder.extension()
        );
        let path: PathBuf = record.config.output_dir.join(filename);
        atomic_write(&path, &bytes, false)?;
        self.reduction.push(path);
        Ok(())
    }

    fn maybe_write_preview(&mut self, record: &FrameRecord<'_>, rate_limit_ms: u64) {
        let due = match self.last_preview_write {
            Some(last) => last.elapsed() >= Duration::from_millis(rate_limit_ms),
            None => true,
        };
        if !due {
            return;
        }
        self.last_preview_write = Some(Instant::now());

        let bytes = match self.encoder.encode(record) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode preview frame");
                return;
            }
        };
        let path = record
            .config
            .output_dir
            .join(format!("preview{}", self.encoder.extension()));
        if let Err(e) = atomic_write(&path, &bytes, true) {
            warn!(error = %e, "failed to write preview frame");
            return;
        }
        self.preview.request();
    }
}
