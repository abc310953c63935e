//! Minimal headless status line, standing in for a real operator UI.
//!
//! Deliberately kept separate from [`crate::supervisor::Supervisor`] so a
//! richer front end (a TUI, a web dashboard) can observe the same watch
//! channels without touching the acquisition core.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::camera::CameraMode;
use crate::timer::TimerMode;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically logs the observed camera/timer mode pair at `info` level.
/// A real UI would subscribe to the same `watch::Receiver`s directly
/// instead of polling a log line.
pub async fn run_status_line(
    mut camera_mode: watch::Receiver<CameraMode>,
    mut timer_mode: watch::Receiver<TimerMode>,
    shutdown: std::sync::Arc<tokio::sync::Notify>,
) {
    let mut tick = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tick.tick() => {
                info!(
                    camera = ?*camera_mode.borrow_and_update(),
                    timer = ?*timer_mode.borrow_and_update(),
                    "status"
                );
            }
        }
    }
}
