//! Macro tasks: ordered playlists of saved recordings

use crate::storage::ScriptStorage;
use anyhow::Result;
use macroflow_core::event::secs;
use macroflow_core::{CancelToken, Clock, PlaybackReport, Player, StopReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn unnamed_step() -> String {
    "Unnamed Step".to_string()
}

fn unnamed_task() -> String {
    "Unnamed Task".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroStep {
    #[serde(default = "unnamed_step")]
    pub name: String,
    /// Recording name or path, resolved through [`ScriptStorage::resolve`]
    pub file_path: String,
    #[serde(default = "one")]
    pub repeat: u32,
    /// Pause between repetitions of this step (not after the last one)
    #[serde(default, with = "secs")]
    pub delay: Duration,
    #[serde(default = "yes")]
    pub enabled: bool,
}

impl MacroStep {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            repeat: 1,
            delay: Duration::ZERO,
            enabled: true,
        }
    }

    pub fn repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroTask {
    #[serde(default = "unnamed_task")]
    pub name: String,
    /// Number of runs through all steps; 0 loops until cancelled
    #[serde(default = "one")]
    pub loop_count: u32,
    /// Pause between loops (not after the last one)
    #[serde(default, with = "secs")]
    pub loop_delay: Duration,
    #[serde(default)]
    pub steps: Vec<MacroStep>,
}

impl MacroTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loop_count: 1,
            loop_delay: Duration::ZERO,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: MacroStep) {
        self.steps.push(step);
    }

    pub fn insert_step(&mut self, index: usize, step: MacroStep) {
        let index = index.min(self.steps.len());
        self.steps.insert(index, step);
    }

    pub fn remove_step(&mut self, index: usize) -> Option<MacroStep> {
        (index < self.steps.len()).then(|| self.steps.remove(index))
    }

    pub fn move_step_up(&mut self, index: usize) {
        if index > 0 && index < self.steps.len() {
            self.steps.swap(index, index - 1);
        }
    }

    pub fn move_step_down(&mut self, index: usize) {
        if index + 1 < self.steps.len() {
            self.steps.swap(index, index + 1);
        }
    }
}

/// Totals over every playback a task run performed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskReport {
    pub loops: u32,
    pub plays: usize,
    pub skipped_steps: usize,
    pub guard_jumps: usize,
    pub loop_passes: usize,
    pub warnings: usize,
    pub stop: StopReason,
    #[serde(with = "secs")]
    pub elapsed: Duration,
}

impl TaskReport {
    fn absorb(&mut self, report: &PlaybackReport) {
        self.plays += 1;
        self.guard_jumps += report.guard_jumps;
        self.loop_passes += report.loop_passes;
        self.warnings += report.warnings;
    }
}

/// Runs macro tasks through one player, loading recordings from storage
pub struct TaskRunner<'s> {
    storage: &'s ScriptStorage,
    player: Player,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl<'s> TaskRunner<'s> {
    pub fn new(storage: &'s ScriptStorage, player: Player) -> Self {
        let clock = player.clock();
        let cancel = player.cancel_token();
        Self {
            storage,
            player,
            clock,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&mut self, task: &MacroTask) -> Result<TaskReport> {
        let started = self.clock.now();
        let mut report = TaskReport::default();
        info!("Running task '{}' ({} steps)", task.name, task.steps.len());

        let stop = self.run_loops(task, &mut report)?;
        report.stop = stop;
        report.elapsed = self.clock.now().saturating_sub(started);
        info!(
            "Task '{}' {:?}: {} loops, {} plays",
            task.name, report.stop, report.loops, report.plays
        );
        Ok(report)
    }

    fn run_loops(&mut self, task: &MacroTask, report: &mut TaskReport) -> Result<StopReason> {
        let mut current = 0u32;
        while task.loop_count == 0 || current < task.loop_count {
            if self.cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            for step in &task.steps {
                if !step.enabled {
                    report.skipped_steps += 1;
                    continue;
                }
                let timeline = self.storage.load(&step.file_path)?;
                debug!("step '{}': {} events x{}", step.name, timeline.len(), step.repeat);

                for i in 0..step.repeat {
                    if self.cancel.is_cancelled() {
                        return Ok(StopReason::Cancelled);
                    }
                    let played = self.player.play(&timeline)?;
                    report.absorb(&played);
                    if !played.completed() {
                        return Ok(played.stop);
                    }
                    if i + 1 < step.repeat && !self.pause(step.delay) {
                        return Ok(StopReason::Cancelled);
                    }
                }
            }

            current += 1;
            report.loops = current;
            let more = task.loop_count == 0 || current < task.loop_count;
            if more && !self.pause(task.loop_delay) {
                return Ok(StopReason::Cancelled);
            }
        }
        Ok(StopReason::Completed)
    }

    /// Sleep in cancellable slices. False if cancelled.
    fn pause(&self, duration: Duration) -> bool {
        let deadline = self.clock.now().saturating_add(duration);
        let slice = self.player.config().cancel_slice;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(slice));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macroflow_core::{
        DriverCall, EventKind, InputDriver, ManualClock, MouseButton, Point, RecordingDriver,
        TimedEvent, Timeline,
    };

    fn key_script(key: &str) -> Timeline {
        Timeline::new(vec![TimedEvent::new(EventKind::KeyPress { key: key.into() }, 0.5)])
    }

    fn setup() -> (tempfile::TempDir, ScriptStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::with_dir(dir.path()).unwrap();
        storage.save("a", &key_script("a")).unwrap();
        storage.save("b", &key_script("b")).unwrap();
        (dir, storage)
    }

    fn keys(calls: &[DriverCall]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::KeyPress(k) => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn runs_steps_in_order_with_repeats_and_delays() {
        let (_dir, storage) = setup();
        let clock = ManualClock::new();
        let driver = RecordingDriver::new();
        let player = Player::new(driver.clone()).with_clock(Arc::new(clock.clone()));

        let mut task = MacroTask::new("t");
        task.loop_count = 2;
        task.loop_delay = Duration::from_secs(10);
        task.add_step(MacroStep::new("first", "a").repeat(2).delay(Duration::from_secs(1)));
        task.add_step(MacroStep::new("skipped", "b").disabled());
        task.add_step(MacroStep::new("second", "b"));

        let report = TaskRunner::new(&storage, player).run(&task).unwrap();

        assert_eq!(keys(&driver.calls()), vec!["a", "a", "b", "a", "a", "b"]);
        assert_eq!(report.loops, 2);
        assert_eq!(report.plays, 6);
        assert_eq!(report.skipped_steps, 2);
        assert_eq!(report.stop, StopReason::Completed);
        // per loop: 3 plays of 0.5s + one 1s repeat delay; one 10s loop delay
        assert_eq!(clock.now(), Duration::from_secs(15));
    }

    /// Cancels after a fixed number of key presses
    struct StopAfter {
        inner: RecordingDriver,
        cancel: CancelToken,
        presses: usize,
    }

    impl InputDriver for StopAfter {
        fn move_cursor(&mut self, pos: Point) -> anyhow::Result<()> {
            self.inner.move_cursor(pos)
        }
        fn press_button(&mut self, button: MouseButton) -> anyhow::Result<()> {
            self.inner.press_button(button)
        }
        fn release_button(&mut self, button: MouseButton) -> anyhow::Result<()> {
            self.inner.release_button(button)
        }
        fn scroll_wheel(&mut self, amount: i32) -> anyhow::Result<()> {
            self.inner.scroll_wheel(amount)
        }
        fn press_key(&mut self, key: &str) -> anyhow::Result<()> {
            self.inner.press_key(key)?;
            if keys(&self.inner.calls()).len() >= self.presses {
                self.cancel.cancel();
            }
            Ok(())
        }
        fn release_key(&mut self, key: &str) -> anyhow::Result<()> {
            self.inner.release_key(key)
        }
    }

    #[test]
    fn infinite_task_stops_on_cancel() {
        let (_dir, storage) = setup();
        let clock = ManualClock::new();
        let cancel = CancelToken::new();
        let recorded = RecordingDriver::new();
        let driver = StopAfter {
            inner: recorded.clone(),
            cancel: cancel.clone(),
            presses: 5,
        };
        let player = Player::new(driver)
            .with_clock(Arc::new(clock.clone()))
            .with_cancel(cancel);

        let mut task = MacroTask::new("forever");
        task.loop_count = 0;
        task.add_step(MacroStep::new("a", "a"));

        let report = TaskRunner::new(&storage, player).run(&task).unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(keys(&recorded.calls()).len(), 5);
        assert_eq!(report.loops, 5);
    }

    #[test]
    fn missing_recording_is_an_error() {
        let (_dir, storage) = setup();
        let player = Player::new(RecordingDriver::new()).with_clock(Arc::new(ManualClock::new()));
        let mut task = MacroTask::new("broken");
        task.add_step(MacroStep::new("gone", "does_not_exist"));

        assert!(TaskRunner::new(&storage, player).run(&task).is_err());
    }

    #[test]
    fn step_editing_is_bounds_checked() {
        let mut task = MacroTask::new("t");
        task.add_step(MacroStep::new("one", "a"));
        task.add_step(MacroStep::new("two", "b"));
        task.move_step_up(0);
        task.move_step_down(1);
        task.move_step_down(0);
        let names: Vec<_> = task.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["two", "one"]);
        assert!(task.remove_step(5).is_none());
        task.insert_step(99, MacroStep::new("three", "a"));
        assert_eq!(task.steps.len(), 3);
    }

    #[test]
    fn parses_task_json_with_defaults() {
        let task: MacroTask = serde_json::from_str(
            r#"{"name": "x", "loop_delay": 1.5, "steps": [{"file_path": "a.json"}]}"#,
        )
        .unwrap();
        assert_eq!(task.loop_count, 1);
        assert_eq!(task.loop_delay, Duration::from_millis(1500));
        assert_eq!(task.steps[0].name, "Unnamed Step");
        assert_eq!(task.steps[0].repeat, 1);
        assert!(task.steps[0].enabled);
    }
}
