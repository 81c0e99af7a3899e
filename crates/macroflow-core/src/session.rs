//! Cancellation and background playback

use crate::error::{Error, ErrorCode, Result};
use crate::player::{PlaybackReport, Player};
use crate::timeline::Timeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Cooperative stop flag. Observed between steps and between sleep slices.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a playback running on its own thread
pub struct PlaybackHandle {
    cancel: CancelToken,
    running: Arc<AtomicBool>,
    thread: JoinHandle<Result<PlaybackReport>>,
}

impl PlaybackHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request a stop and wait for the player to wind down
    pub fn stop(self) -> Result<PlaybackReport> {
        info!("Stopping playback...");
        self.cancel.cancel();
        self.join()
    }

    pub fn join(self) -> Result<PlaybackReport> {
        self.thread
            .join()
            .map_err(|_| Error::new(ErrorCode::Unknown, "playback thread panicked"))?
    }
}

impl Player {
    /// Validate up front, then play on a background thread
    pub fn spawn(mut self, timeline: Timeline) -> Result<PlaybackHandle> {
        self.config().validate()?;
        self.check(&timeline)?;

        let cancel = self.cancel_token();
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();

        let thread = std::thread::Builder::new()
            .name("macroflow-playback".to_string())
            .spawn(move || {
                let report = self.play(&timeline);
                running_flag.store(false, Ordering::SeqCst);
                report
            })?;

        Ok(PlaybackHandle {
            cancel,
            running,
            thread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RecordingDriver;
    use crate::event::{EventKind, TimedEvent};
    use crate::player::StopReason;
    use std::time::Duration;

    #[test]
    fn stop_cancels_a_long_sleep_promptly() {
        let driver = RecordingDriver::new();
        let timeline = Timeline::new(vec![
            TimedEvent::new(EventKind::KeyPress { key: "a".into() }, 0.0),
            TimedEvent::new(EventKind::KeyRelease { key: "a".into() }, 30.0),
        ]);

        let handle = Player::new(driver.clone()).spawn(timeline).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.is_running());

        let started = std::time::Instant::now();
        let report = handle.stop().unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(driver.calls().len(), 1);
    }

    #[test]
    fn join_returns_the_report() {
        let handle = Player::new(RecordingDriver::new())
            .spawn(Timeline::default())
            .unwrap();
        let report = handle.join().unwrap();
        assert!(report.completed());
    }
}
