//! Simulated GPS timer: advances from the host clock rather than a real
//! serial link, emitting the same packet sequence a real board would.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::DaqError;
use crate::timestamp::TriggerTimestamp;

use super::{Packet, TimerBackend, TimerMode};

pub struct SimulatedTimerBackend {
    running: bool,
    milliseconds_mode: bool,
    exposure_total: u32,
    progress: u32,
    mode: TimerMode,
    last_poll: Option<chrono::DateTime<Utc>>,
    /// Set by `stop_exposure`; consumed by the next `poll`, which emits a
    /// `Packet::StopExposure` acknowledgment the same way a real board's `F`
    /// reply would.
    pending_stop_ack: bool,
}

impl Default for SimulatedTimerBackend {
    fn default() -> Self {
        Self {
            running: false,
            milliseconds_mode: false,
            exposure_total: 0,
            progress: 0,
            mode: TimerMode::Idle,
            last_poll: None,
            pending_stop_ack: false,
        }
    }
}

#[async_trait]
impl TimerBackend for SimulatedTimerBackend {
    async fn initialize(&mut self) -> Result<(), DaqError> {
        self.last_poll = Some(Utc::now());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Packet>, DaqError> {
        let now = Utc::now();
        let last = self.last_poll.unwrap_or(now);
        self.last_poll = Some(now);

        let mut packets = vec![Packet::CurrentTime(TriggerTimestamp::from_datetime(
            now,
            true,
            self.progress as u16,
        ))];

        if self.pending_stop_ack {
            self.pending_stop_ack = false;
            packets.push(Packet::StopExposure);
        }

        if self.running && self.exposure_total > 0 {
            let elapsed_units = if self.milliseconds_mode {
                (now - last).num_milliseconds().max(0) as u32
            } else {
                (now - last).num_seconds().max(0) as u32
            };
            self.progress += elapsed_units;
            if self.progress >= self.exposure_total {
                self.progress -= self.exposure_total;
                self.mode = TimerMode::Readout;
                packets.push(Packet::StatusMode(TimerMode::Readout));
                packets.push(Packet::DownloadTime(TriggerTimestamp::from_datetime(now, true, 0)));
            }
        }
        Ok(packets)
    }

    async fn start_exposure(&mut self, exposure_time: u32, milliseconds_mode: bool) -> Result<(), DaqError> {
        self.running = true;
        self.milliseconds_mode = milliseconds_mode;
        self.exposure_total = exposure_time;
        self.progress = 0;
        self.mode = TimerMode::Exposing;
        Ok(())
    }

    async fn stop_exposure(&mut self) -> Result<(), DaqError> {
        self.running = false;
        self.exposure_total = 0;
        self.progress = 0;
        self.mode = TimerMode::Idle;
        self.pending_stop_ack = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DaqError> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_download_time_once_exposure_elapses() {
        let mut timer = SimulatedTimerBackend::default();
        timer.initialize().await.unwrap();
        timer.start_exposure(0, true).await.unwrap();
        // exposure_total 0 means a trigger fires on the very next poll that
        // observes any elapsed time, since progress (0) >= total (0).
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let packets = timer.poll().await.unwrap();
        let has_download = packets.iter().any(|p| matches!(p, Packet::DownloadTime(_)));
        assert!(has_download);
    }

    #[tokio::test]
    async fn idle_timer_never_emits_download_time() {
        let mut timer = SimulatedTimerBackend::default();
        timer.initialize().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let packets = timer.poll().await.unwrap();
        assert!(!packets.iter().any(|p| matches!(p, Packet::DownloadTime(_))));
    }

    #[tokio::test]
    async fn stop_exposure_is_acknowledged_on_next_poll() {
        let mut timer = SimulatedTimerBackend::default();
        timer.initialize().await.unwrap();
        timer.start_exposure(60, false).await.unwrap();
        timer.stop_exposure().await.unwrap();

        let packets = timer.poll().await.unwrap();
        assert!(packets.iter().any(|p| matches!(p, Packet::StopExposure)));

        // The acknowledgment is a one-shot; it doesn't repeat on every poll.
        let packets = timer.poll().await.unwrap();
        assert!(!packets.iter().any(|p| matches!(p, Packet::StopExposure)));
    }
}
