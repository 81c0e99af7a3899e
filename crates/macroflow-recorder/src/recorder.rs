//! Live input recorder
//!
//! The recorder does not install OS hooks itself. Whatever captures input (a
//! platform hook, a remote agent, a test) pushes [`RawInput`] samples into an
//! [`InputSink`]; the sink timestamps them against the recorder's clock and
//! queues them on a bounded channel. Stopping the [`RecordingHandle`] drains
//! the queue into a [`Timeline`] ready to save or replay.

use anyhow::Result;
pub use crossbeam_channel::{Receiver, Sender};
use crossbeam_channel::{bounded, TrySendError};
use macroflow_core::event::seconds;
use macroflow_core::{Clock, EventKind, MouseButton, Point, SystemClock, TimedEvent, Timeline};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Mouse move sampling - record a move only after N pixels of travel
    pub mouse_move_threshold: f64,
    /// Max queued samples; further samples are dropped until drained
    pub max_buffer: usize,
    pub record_moves: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mouse_move_threshold: 5.0,
            max_buffer: 10000,
            record_moves: true,
        }
    }
}

/// One captured input sample, as reported by the hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawInput {
    Move { pos: Point },
    Press { button: MouseButton, pos: Point },
    Release { button: MouseButton, pos: Point },
    Wheel { pos: Point, amount: i32 },
    KeyPress { key: String },
    KeyRelease { key: String },
}

impl RawInput {
    fn into_kind(self) -> EventKind {
        match self {
            RawInput::Move { pos } => EventKind::MouseMove { pos },
            RawInput::Press { button, pos } => EventKind::MousePress { button, pos },
            RawInput::Release { button, pos } => EventKind::MouseRelease { button, pos },
            RawInput::Wheel { pos, amount } => EventKind::MouseWheel { pos, amount },
            RawInput::KeyPress { key } => EventKind::KeyPress { key },
            RawInput::KeyRelease { key } => EventKind::KeyRelease { key },
        }
    }

    fn pointer(&self) -> Option<Point> {
        match self {
            RawInput::Move { pos }
            | RawInput::Press { pos, .. }
            | RawInput::Release { pos, .. }
            | RawInput::Wheel { pos, .. } => Some(*pos),
            RawInput::KeyPress { .. } | RawInput::KeyRelease { .. } => None,
        }
    }
}

struct SinkState {
    tx: Sender<TimedEvent>,
    stop: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    start: Duration,
    config: RecorderConfig,
    last_mouse: Mutex<Option<Point>>,
    dropped: AtomicUsize,
}

/// Producer side of a recording; cheap to clone and share across hook threads
#[derive(Clone)]
pub struct InputSink {
    state: Arc<SinkState>,
}

impl InputSink {
    /// Timestamp and queue a sample. Returns false if it was not recorded
    /// (recording stopped, filtered move, or full buffer).
    pub fn submit(&self, input: RawInput) -> bool {
        let state = &self.state;
        if state.stop.load(Ordering::Relaxed) {
            return false;
        }

        if let Some(pos) = input.pointer() {
            let mut last = state.last_mouse.lock();
            if let RawInput::Move { .. } = input {
                if !state.config.record_moves {
                    return false;
                }
                if let Some(prev) = *last {
                    if prev.distance(&pos) < state.config.mouse_move_threshold {
                        return false;
                    }
                }
            }
            *last = Some(pos);
        }

        let t = seconds(state.clock.now().saturating_sub(state.start));
        match state.tx.try_send(TimedEvent::new(input.into_kind(), t)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if state.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!("recording buffer full, dropping samples");
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Recording handle - owns the recording session
pub struct RecordingHandle {
    state: Arc<SinkState>,
    events_rx: Receiver<TimedEvent>,
    events: Vec<TimedEvent>,
}

impl RecordingHandle {
    /// Stop accepting samples and return everything recorded, ordered by time
    pub fn stop(mut self) -> Timeline {
        self.state.stop.store(true, Ordering::SeqCst);
        self.drain();
        let mut events = self.events;
        // samples from different hook threads can arrive slightly out of order
        events.sort_by(|a, b| a.t.total_cmp(&b.t));
        info!(
            "Recording stopped: {} events, {} dropped",
            events.len(),
            self.state.dropped.load(Ordering::Relaxed)
        );
        Timeline::new(events)
    }

    /// Move queued samples into the handle's buffer, freeing channel space
    pub fn drain(&mut self) -> usize {
        let before = self.events.len();
        while let Ok(e) = self.events_rx.try_recv() {
            self.events.push(e);
        }
        let n = self.events.len() - before;
        if n > 0 {
            debug!("drained {} samples", n);
        }
        n
    }

    pub fn is_running(&self) -> bool {
        !self.state.stop.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Get the event receiver for streaming consumption
    pub fn receiver(&self) -> &Receiver<TimedEvent> {
        &self.events_rx
    }
}

/// The recorder
pub struct Recorder {
    config: RecorderConfig,
    clock: Arc<dyn Clock>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::with_config(RecorderConfig::default())
    }

    pub fn with_config(config: RecorderConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start a session. Timestamps are seconds since this call.
    pub fn start(&self) -> Result<(RecordingHandle, InputSink)> {
        if self.config.max_buffer == 0 {
            anyhow::bail!("max_buffer must be at least 1");
        }
        let (tx, rx) = bounded::<TimedEvent>(self.config.max_buffer);
        let state = Arc::new(SinkState {
            tx,
            stop: Arc::new(AtomicBool::new(false)),
            clock: self.clock.clone(),
            start: self.clock.now(),
            config: self.config.clone(),
            last_mouse: Mutex::new(None),
            dropped: AtomicUsize::new(0),
        });
        info!("Recording started");

        let handle = RecordingHandle {
            state: state.clone(),
            events_rx: rx,
            events: Vec::new(),
        };
        Ok((handle, InputSink { state }))
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macroflow_core::ManualClock;

    fn recorder(clock: &ManualClock, config: RecorderConfig) -> Recorder {
        Recorder::with_config(config).with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn timestamps_are_relative_to_start() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(100));
        let (handle, sink) = recorder(&clock, RecorderConfig::default()).start().unwrap();

        clock.advance(Duration::from_millis(250));
        assert!(sink.submit(RawInput::KeyPress { key: "a".into() }));
        clock.advance(Duration::from_millis(50));
        assert!(sink.submit(RawInput::KeyRelease { key: "a".into() }));

        let timeline = handle.stop();
        let times: Vec<f64> = timeline.iter().map(|e| e.t).collect();
        assert_eq!(times, vec![0.25, 0.3]);
    }

    #[test]
    fn small_moves_are_dropped() {
        let clock = ManualClock::new();
        let (handle, sink) = recorder(&clock, RecorderConfig::default()).start().unwrap();

        assert!(sink.submit(RawInput::Move { pos: Point::new(0, 0) }));
        assert!(!sink.submit(RawInput::Move { pos: Point::new(3, 0) }));
        assert!(sink.submit(RawInput::Move { pos: Point::new(10, 0) }));
        // a click re-anchors the threshold
        assert!(sink.submit(RawInput::Press {
            button: MouseButton::Left,
            pos: Point::new(50, 50)
        }));
        assert!(!sink.submit(RawInput::Move { pos: Point::new(52, 51) }));

        assert_eq!(handle.stop().len(), 3);
    }

    #[test]
    fn moves_can_be_disabled() {
        let clock = ManualClock::new();
        let config = RecorderConfig {
            record_moves: false,
            ..RecorderConfig::default()
        };
        let (handle, sink) = recorder(&clock, config).start().unwrap();

        assert!(!sink.submit(RawInput::Move { pos: Point::new(100, 100) }));
        assert!(sink.submit(RawInput::Wheel {
            pos: Point::new(100, 100),
            amount: -3
        }));

        let timeline = handle.stop();
        assert!(matches!(timeline.events()[0].kind, EventKind::MouseWheel { amount: -3, .. }));
    }

    #[test]
    fn full_buffer_drops_until_drained() {
        let clock = ManualClock::new();
        let config = RecorderConfig {
            max_buffer: 2,
            ..RecorderConfig::default()
        };
        let (mut handle, sink) = recorder(&clock, config).start().unwrap();

        for _ in 0..3 {
            sink.submit(RawInput::KeyPress { key: "x".into() });
        }
        assert_eq!(handle.dropped(), 1);
        assert_eq!(handle.drain(), 2);
        assert!(sink.submit(RawInput::KeyPress { key: "y".into() }));

        assert_eq!(handle.stop().len(), 3);
    }

    #[test]
    fn stopped_sink_rejects_samples() {
        let clock = ManualClock::new();
        let (handle, sink) = recorder(&clock, RecorderConfig::default()).start().unwrap();
        assert!(handle.is_running());

        let timeline = handle.stop();
        assert!(timeline.is_empty());
        assert!(!sink.submit(RawInput::KeyPress { key: "a".into() }));
    }

    #[test]
    fn raw_input_json_shape() {
        let input: RawInput =
            serde_json::from_str(r#"{"kind":"press","button":"right","pos":[5,6]}"#).unwrap();
        assert_eq!(
            input,
            RawInput::Press {
                button: MouseButton::Right,
                pos: Point::new(5, 6)
            }
        );
    }
}
