//! Timeline interpreter
//!
//! Walks a [`Timeline`] in order, sleeping so that each event fires at its
//! timestamp relative to the previous one (scaled by speed). Guard regions
//! are polled between steps and skipped as soon as their condition holds;
//! while-events run their children in a bounded sub-loop with loop-local
//! timestamps.
//!
//! Driver and evaluator failures never abort playback. They are logged,
//! counted in the report, and optionally stop the run once a consecutive
//! failure budget is spent.

use crate::clock::{Clock, SystemClock};
use crate::config::PlaybackConfig;
use crate::driver::InputDriver;
use crate::error::{BuildError, Result};
use crate::evaluator::ConditionEvaluator;
use crate::event::{EventKind, SmartAction, TextCondition, WhilePayload};
use crate::session::CancelToken;
use crate::timeline::Timeline;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    Completed,
    Cancelled,
    FailureBudgetExhausted,
}

/// What happened during one playback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackReport {
    pub moves: usize,
    pub presses: usize,
    pub releases: usize,
    pub scrolls: usize,
    pub keys: usize,
    pub smart_actions: usize,
    pub evaluations: usize,
    /// Guard regions skipped because their condition held
    pub guard_jumps: usize,
    pub loops: usize,
    pub loop_passes: usize,
    pub warnings: usize,
    pub stop: StopReason,
    #[serde(with = "crate::event::secs")]
    pub elapsed: Duration,
}

impl PlaybackReport {
    pub fn completed(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

pub struct Player {
    driver: Box<dyn InputDriver>,
    evaluator: Option<Box<dyn ConditionEvaluator>>,
    clock: Arc<dyn Clock>,
    config: PlaybackConfig,
    cancel: CancelToken,
}

impl Player {
    pub fn new(driver: impl InputDriver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
            evaluator: None,
            clock: Arc::new(SystemClock::new()),
            config: PlaybackConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: impl ConditionEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: PlaybackConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an externally owned cancellation flag (e.g. a Ctrl-C handler)
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Reject timelines that need an evaluator when none is installed.
    ///
    /// Runs before any input is sent so a misconfigured run fails up front
    /// instead of half-way through.
    pub fn check(&self, timeline: &Timeline) -> std::result::Result<(), BuildError> {
        if self.evaluator.is_none() {
            if let Some((index, kind)) = timeline.first_evaluator_use() {
                return Err(BuildError::EvaluatorRequired { index, kind });
            }
        }
        Ok(())
    }

    /// Play the timeline on the calling thread until it completes, is
    /// cancelled, or exhausts the failure budget.
    pub fn play(&mut self, timeline: &Timeline) -> Result<PlaybackReport> {
        self.config.validate()?;
        self.check(timeline)?;

        if !timeline.is_balanced() {
            warn!(
                "timeline has {} unmatched guard_start and {} stray guard_end events",
                timeline.unmatched_starts().len(),
                timeline.stray_ends().len()
            );
        }
        info!(
            "Playing {} events ({:.3}s) at {}x speed",
            timeline.len(),
            timeline.end_time() / self.config.speed,
            self.config.speed
        );

        let started = self.clock.now();
        let mut run = Run {
            driver: &mut self.driver,
            evaluator: &mut self.evaluator,
            clock: self.clock.as_ref(),
            config: &self.config,
            cancel: &self.cancel,
            report: PlaybackReport::default(),
            failures: 0,
        };

        let stop = match run.span(timeline, None) {
            Ok(_) => StopReason::Completed,
            Err(Halt::Stop(reason)) => reason,
            Err(Halt::LoopSatisfied) => StopReason::Completed,
        };

        let mut report = run.report;
        report.stop = stop;
        report.elapsed = self.clock.now().saturating_sub(started);
        info!(
            "Playback {:?} after {:.3}s: {} guard jumps, {} loop passes, {} warnings",
            report.stop,
            report.elapsed.as_secs_f64(),
            report.guard_jumps,
            report.loop_passes,
            report.warnings
        );
        Ok(report)
    }
}

/// Seconds to the nearest nanosecond, so `0.501 - 0.5` sleeps exactly 1ms
fn whole_nanos(secs: f64) -> Duration {
    Duration::from_nanos((secs * 1e9).round() as u64)
}

/// Why a span stopped early
enum Halt {
    /// The enclosing while-condition became true mid-pass
    LoopSatisfied,
    Stop(StopReason),
}

type Step<T> = std::result::Result<T, Halt>;

struct Guard<'t> {
    condition: &'t TextCondition,
    end: usize,
    next_poll: Duration,
}

/// Condition polled between the children of a while pass
struct LoopPoll<'t> {
    condition: &'t TextCondition,
    next: Duration,
}

struct Run<'p> {
    driver: &'p mut Box<dyn InputDriver>,
    evaluator: &'p mut Option<Box<dyn ConditionEvaluator>>,
    clock: &'p dyn Clock,
    config: &'p PlaybackConfig,
    cancel: &'p CancelToken,
    report: PlaybackReport,
    /// Consecutive failures since the last success
    failures: u32,
}

impl<'p> Run<'p> {
    /// Execute one event list. Returns the timestamp of the last event
    /// reached, so a while pass knows how much of its duration is left.
    fn span(&mut self, timeline: &Timeline, mut poll: Option<&mut LoopPoll<'_>>) -> Step<f64> {
        let events = timeline.events();
        let mut pc = 0;
        let mut anchor = 0.0_f64;
        let mut guards: Vec<Guard<'_>> = Vec::new();

        while pc < events.len() {
            self.checkpoint()?;

            if let Some(poll) = poll.as_deref_mut() {
                if self.clock.now() >= poll.next {
                    if self.evaluate(poll.condition) {
                        debug!("loop condition met mid-pass");
                        return Err(Halt::LoopSatisfied);
                    }
                    poll.next = self.clock.now().saturating_add(poll.condition.interval);
                }
            }

            if let Some(depth) = self.poll_guards(&mut guards) {
                let end = guards[depth].end;
                // inner guards end no later than the satisfied one
                guards.truncate(depth);
                self.report.guard_jumps += 1;
                debug!("guard condition met, jumping {} -> {}", pc, end);
                pc = end;
                anchor = events[end].t;
                continue;
            }

            let event = &events[pc];
            let delta = (event.t - anchor) / self.config.speed;
            if delta > 0.0 {
                self.pause(whole_nanos(delta))?;
            }
            anchor = event.t;

            match &event.kind {
                EventKind::MouseMove { pos } => {
                    self.report.moves += 1;
                    self.drive("mouse_move", |d| d.move_cursor(*pos));
                }
                EventKind::MousePress { button, pos } => {
                    self.report.presses += 1;
                    self.drive("mouse_press", |d| {
                        d.move_cursor(*pos)?;
                        d.press_button(*button)
                    });
                }
                EventKind::MouseRelease { button, pos } => {
                    self.report.releases += 1;
                    self.drive("mouse_release", |d| {
                        d.move_cursor(*pos)?;
                        d.release_button(*button)
                    });
                }
                EventKind::MouseWheel { pos, amount } => {
                    self.report.scrolls += 1;
                    self.drive("mouse_wheel", |d| {
                        d.move_cursor(*pos)?;
                        d.scroll_wheel(*amount)
                    });
                }
                EventKind::KeyPress { key } => {
                    self.report.keys += 1;
                    self.drive("key_press", |d| d.press_key(key));
                }
                EventKind::KeyRelease { key } => {
                    self.drive("key_release", |d| d.release_key(key));
                }
                EventKind::Smart(action) => self.perform(action),
                EventKind::GuardStart(condition) => match timeline.guard_end(pc) {
                    Some(end) => guards.push(Guard {
                        condition,
                        end,
                        next_poll: self.clock.now(),
                    }),
                    None => self.warn(format!(
                        "guard_start at {} has no matching guard_end; body runs unguarded",
                        pc
                    )),
                },
                EventKind::GuardEnd => {
                    if timeline.stray_ends().contains(&pc) {
                        self.warn(format!("stray guard_end at {} ignored", pc));
                    }
                    guards.retain(|g| g.end > pc);
                }
                EventKind::While(payload) => self.run_while(payload)?,
            }
            pc += 1;
        }
        Ok(anchor)
    }

    /// Poll due guards, outermost first. Returns the index of the first
    /// guard whose condition holds.
    fn poll_guards(&mut self, guards: &mut [Guard<'_>]) -> Option<usize> {
        for (depth, guard) in guards.iter_mut().enumerate() {
            if self.clock.now() < guard.next_poll {
                continue;
            }
            if self.evaluate(guard.condition) {
                return Some(depth);
            }
            guard.next_poll = self.clock.now().saturating_add(guard.condition.interval);
        }
        None
    }

    fn run_while(&mut self, payload: &WhilePayload) -> Step<()> {
        self.report.loops += 1;
        if self.evaluate(&payload.condition) {
            debug!("loop condition already met; body skipped");
            return Ok(());
        }

        let started = self.clock.now();
        let mut passes = 0u32;
        loop {
            self.checkpoint()?;
            if let Some(max) = payload.max_duration {
                if self.clock.now().saturating_sub(started) >= max {
                    debug!("loop stopped after {:?} ({} passes)", max, passes);
                    return Ok(());
                }
            }
            if let Some(max) = payload.max_loops {
                if passes >= max {
                    debug!("loop stopped after {} passes", passes);
                    return Ok(());
                }
            }

            let pass_start = self.clock.now();
            let mut poll = LoopPoll {
                condition: &payload.condition,
                next: pass_start.saturating_add(payload.condition.interval),
            };
            let reached = match self.span(&payload.children, Some(&mut poll)) {
                Ok(reached) => reached,
                Err(Halt::LoopSatisfied) => {
                    self.report.loop_passes += 1;
                    return Ok(());
                }
                Err(stop) => return Err(stop),
            };

            let trailing = (payload.pass_duration() - reached) / self.config.speed;
            if trailing > 0.0 {
                self.pause(whole_nanos(trailing))?;
            }
            passes += 1;
            self.report.loop_passes += 1;

            if self.evaluate(&payload.condition) {
                debug!("loop condition met after {} passes", passes);
                return Ok(());
            }
            if payload.pass_duration() <= 0.0 {
                // a pass with no loop-local time is paced by the poll interval
                self.pause(payload.condition.interval)?;
            }
        }
    }

    /// Sleep in slices so cancellation is seen within one slice
    fn pause(&mut self, duration: Duration) -> Step<()> {
        let deadline = self.clock.now().saturating_add(duration);
        loop {
            if self.cancel.is_cancelled() {
                return Err(Halt::Stop(StopReason::Cancelled));
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(());
            }
            self.clock.sleep((deadline - now).min(self.config.cancel_slice));
        }
    }

    fn checkpoint(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Stop(StopReason::Cancelled));
        }
        if let Some(budget) = self.config.failure_budget {
            if self.failures >= budget {
                return Err(Halt::Stop(StopReason::FailureBudgetExhausted));
            }
        }
        Ok(())
    }

    fn drive(
        &mut self,
        what: &str,
        action: impl FnOnce(&mut dyn InputDriver) -> anyhow::Result<()>,
    ) {
        match action(self.driver.as_mut()) {
            Ok(()) => self.failures = 0,
            Err(e) => self.fail(format!("{} failed: {:#}", what, e)),
        }
    }

    /// Evaluate a condition. Errors and a missing evaluator count as false.
    fn evaluate(&mut self, condition: &TextCondition) -> bool {
        let Some(evaluator) = self.evaluator.as_mut() else {
            return false;
        };
        self.report.evaluations += 1;
        match evaluator.evaluate(condition) {
            Ok(met) => {
                self.failures = 0;
                met
            }
            Err(e) => {
                self.fail(format!("condition {:?} failed: {:#}", condition.keywords, e));
                false
            }
        }
    }

    fn perform(&mut self, action: &SmartAction) {
        self.report.smart_actions += 1;
        let Some(evaluator) = self.evaluator.as_mut() else {
            return;
        };
        match evaluator.perform(action) {
            Ok(true) => self.failures = 0,
            Ok(false) => {
                self.failures = 0;
                debug!("{}: target not found", action.name());
            }
            Err(e) => self.fail(format!("{} failed: {:#}", action.name(), e)),
        }
    }

    fn fail(&mut self, message: String) {
        self.failures += 1;
        self.warn(message);
    }

    fn warn(&mut self, message: String) {
        self.report.warnings += 1;
        warn!("{}; continuing", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::driver::{DriverCall, RecordingDriver};
    use crate::evaluator::ScriptedEvaluator;
    use crate::event::{MouseButton, Point, TimedEvent};

    fn click_at(t: f64, x: i32, y: i32) -> Vec<TimedEvent> {
        let pos = Point::new(x, y);
        vec![
            TimedEvent::new(EventKind::MousePress { button: MouseButton::Left, pos }, t),
            TimedEvent::new(EventKind::MouseRelease { button: MouseButton::Left, pos }, t + 0.001),
        ]
    }

    fn player(driver: &RecordingDriver, clock: &ManualClock) -> Player {
        Player::new(driver.clone()).with_clock(Arc::new(clock.clone()))
    }

    #[test]
    fn paces_events_by_timestamp_delta() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let timeline = Timeline::new(click_at(0.5, 10, 20));

        let report = player(&driver, &clock).play(&timeline).unwrap();

        assert!(report.completed());
        assert_eq!(report.presses, 1);
        assert_eq!(report.releases, 1);
        assert_eq!(clock.now(), Duration::from_micros(501_000));
        let pos = Point::new(10, 20);
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Move(pos),
                DriverCall::Press(MouseButton::Left),
                DriverCall::Move(pos),
                DriverCall::Release(MouseButton::Left),
            ]
        );
    }

    #[test]
    fn speed_scales_sleeps() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let timeline = Timeline::new(vec![TimedEvent::new(
            EventKind::KeyPress { key: "a".into() },
            2.0,
        )]);

        player(&driver, &clock)
            .with_config(PlaybackConfig::default().speed(2.0))
            .play(&timeline)
            .unwrap();

        assert_eq!(clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn out_of_order_timestamps_fire_immediately() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let timeline = Timeline::new(vec![
            TimedEvent::new(EventKind::KeyPress { key: "a".into() }, 1.0),
            TimedEvent::new(EventKind::KeyRelease { key: "a".into() }, 0.5),
            TimedEvent::new(EventKind::KeyPress { key: "b".into() }, 1.5),
        ]);

        player(&driver, &clock).play(&timeline).unwrap();

        // 1.0, then 0, then 1.5 - 0.5
        assert_eq!(clock.now(), Duration::from_secs(2));
        assert_eq!(driver.calls().len(), 3);
    }

    #[test]
    fn missing_evaluator_is_rejected_before_any_input() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let mut events = click_at(0.0, 1, 1);
        events.push(TimedEvent::new(EventKind::GuardStart(TextCondition::new(["x"])), 1.0));
        events.push(TimedEvent::new(EventKind::GuardEnd, 1.0));

        let err = player(&driver, &clock).play(&Timeline::new(events)).unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::EvaluatorRequired);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn evaluator_errors_count_as_false() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let evaluator = ScriptedEvaluator::new(false).then_fail("ocr crashed");
        let mut events = vec![TimedEvent::new(EventKind::GuardStart(TextCondition::new(["x"])), 0.0)];
        events.extend(click_at(0.0, 5, 5));
        events.push(TimedEvent::new(EventKind::GuardEnd, 0.001));

        let report = player(&driver, &clock)
            .with_evaluator(evaluator)
            .play(&Timeline::new(events))
            .unwrap();

        assert!(report.completed());
        assert_eq!(report.guard_jumps, 0);
        assert_eq!(report.presses, 1);
        assert_eq!(report.warnings, 1);
    }

    #[test]
    fn unmatched_guard_start_runs_body_unguarded() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let evaluator = ScriptedEvaluator::new(true);
        let mut events = vec![TimedEvent::new(EventKind::GuardStart(TextCondition::new(["x"])), 0.0)];
        events.extend(click_at(0.1, 5, 5));

        let report = player(&driver, &clock)
            .with_evaluator(evaluator.clone())
            .play(&Timeline::new(events))
            .unwrap();

        assert_eq!(report.presses, 1);
        assert_eq!(report.guard_jumps, 0);
        assert_eq!(report.warnings, 1);
        assert_eq!(evaluator.evaluations(), 0);
    }

    #[test]
    fn failure_budget_stops_after_consecutive_failures() {
        let driver = RecordingDriver::failing();
        let clock = ManualClock::new();
        let mut events = Vec::new();
        for i in 0..5 {
            events.extend(click_at(i as f64, 0, 0));
        }

        let report = player(&driver, &clock)
            .with_config(PlaybackConfig::default().failure_budget(3))
            .play(&Timeline::new(events))
            .unwrap();

        assert_eq!(report.stop, StopReason::FailureBudgetExhausted);
        assert_eq!(report.presses + report.releases, 3);
        assert_eq!(report.warnings, 3);
    }

    #[test]
    fn failures_without_budget_never_stop_playback() {
        let driver = RecordingDriver::failing();
        let clock = ManualClock::new();
        let mut events = Vec::new();
        for i in 0..5 {
            events.extend(click_at(i as f64, 0, 0));
        }

        let report = player(&driver, &clock).play(&Timeline::new(events)).unwrap();

        assert!(report.completed());
        assert_eq!(report.warnings, 10);
    }

    #[test]
    fn pre_cancelled_token_sends_nothing() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let mut player = player(&driver, &clock);
        player.cancel_token().cancel();

        let report = player.play(&Timeline::new(click_at(0.0, 0, 0))).unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn huge_poll_interval_does_not_overflow() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        let condition = TextCondition::new(["x"]).interval(Duration::MAX);
        let events = vec![
            TimedEvent::new(EventKind::GuardStart(condition), 0.0),
            TimedEvent::new(EventKind::KeyPress { key: "a".into() }, 1.0),
            TimedEvent::new(EventKind::GuardEnd, 1.0),
        ];

        let report = player(&driver, &clock)
            .with_evaluator(ScriptedEvaluator::new(false))
            .play(&Timeline::new(events))
            .unwrap();

        assert!(report.completed());
        assert_eq!(report.keys, 1);
        // next poll saturates far beyond the guard end
        assert_eq!(report.evaluations, 1);
    }

    #[test]
    fn invalid_speed_is_rejected() {
        let driver = RecordingDriver::new();
        let clock = ManualClock::new();
        let err = player(&driver, &clock)
            .with_config(PlaybackConfig::default().speed(0.0))
            .play(&Timeline::default())
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidConfig);
    }
}
