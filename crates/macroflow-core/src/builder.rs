//! Script lowering: action tree -> flat timed events
//!
//! The clock is kept as an integer [`Duration`] and only converted to
//! seconds when an event is emitted, so lowering the same tree twice yields
//! bit-identical output and long scripts do not accumulate float error.

use crate::action::{Action, ActionNode, IfBlock, WhileBlock};
use crate::error::BuildError;
use crate::event::{seconds, EventKind, SmartAction, TextCondition, TimedEvent, WhilePayload};
use crate::timeline::Timeline;
use std::time::Duration;

/// Gap between the press and release halves of a click
pub const CLICK_GAP: Duration = Duration::from_millis(1);

/// Lower an authored script into a validated timeline.
pub fn lower(nodes: &[ActionNode]) -> Result<Timeline, BuildError> {
    let mut lowering = Lowering::default();
    lowering.nodes(nodes, &mut Vec::new())?;
    Ok(Timeline::new(lowering.events))
}

#[derive(Default)]
struct Lowering {
    clock: Duration,
    events: Vec<TimedEvent>,
}

impl Lowering {
    fn nodes(&mut self, nodes: &[ActionNode], path: &mut Vec<usize>) -> Result<(), BuildError> {
        for (i, node) in nodes.iter().enumerate() {
            path.push(i);
            self.node(node, path)?;
            path.pop();
        }
        Ok(())
    }

    fn node(&mut self, node: &ActionNode, path: &mut Vec<usize>) -> Result<(), BuildError> {
        if !node.enabled {
            return Ok(());
        }
        validate(node, path)?;

        for _ in 0..node.repeat {
            self.advance(node.delay_before, path)?;
            self.instance(&node.action, path)?;
        }
        Ok(())
    }

    fn instance(&mut self, action: &Action, path: &mut Vec<usize>) -> Result<(), BuildError> {
        match action {
            Action::Wait => {}
            Action::Move { pos } => self.push(EventKind::MouseMove { pos: *pos }),
            Action::Click { button, pos } => {
                self.push(EventKind::MousePress { button: *button, pos: *pos });
                self.advance(CLICK_GAP, path)?;
                self.push(EventKind::MouseRelease { button: *button, pos: *pos });
            }
            Action::Press { button, pos } => {
                self.push(EventKind::MousePress { button: *button, pos: *pos })
            }
            Action::Release { button, pos } => {
                self.push(EventKind::MouseRelease { button: *button, pos: *pos })
            }
            Action::Wheel { pos, amount } => {
                self.push(EventKind::MouseWheel { pos: *pos, amount: *amount })
            }
            Action::KeyPress { key } => self.push(EventKind::KeyPress { key: key.clone() }),
            Action::KeyRelease { key } => self.push(EventKind::KeyRelease { key: key.clone() }),
            Action::VisionClick(p) => self.push(EventKind::Smart(SmartAction::ClickText(p.clone()))),
            Action::TemplateClick(p) => {
                self.push(EventKind::Smart(SmartAction::ClickTemplate(p.clone())))
            }
            Action::VisionScrollUntil(p) => {
                self.push(EventKind::Smart(SmartAction::ScrollUntilText(p.clone())))
            }
            Action::VisionWait(p) => self.push(EventKind::Smart(SmartAction::WaitText(p.clone()))),
            Action::Mute(p) => self.push(EventKind::Smart(SmartAction::Mute(p.clone()))),
            Action::IfBlock(IfBlock { condition, children }) => {
                self.push(EventKind::GuardStart(condition.clone()));
                self.nodes(children, path)?;
                self.push(EventKind::GuardEnd);
            }
            Action::WhileBlock(block) => {
                let payload = lower_loop(block, path)?;
                self.push(EventKind::While(payload));
            }
        }
        Ok(())
    }

    fn advance(&mut self, by: Duration, path: &[usize]) -> Result<(), BuildError> {
        self.clock = self
            .clock
            .checked_add(by)
            .ok_or_else(|| BuildError::ClockOverflow { path: path.to_vec() })?;
        Ok(())
    }

    fn push(&mut self, kind: EventKind) {
        self.events.push(TimedEvent::new(kind, seconds(self.clock)));
    }
}

/// Children of a loop run on their own clock starting at 0.
fn lower_loop(block: &WhileBlock, path: &mut Vec<usize>) -> Result<WhilePayload, BuildError> {
    let mut inner = Lowering::default();
    inner.nodes(&block.children, path)?;
    Ok(WhilePayload {
        condition: block.condition.clone(),
        max_duration: block.max_duration,
        max_loops: block.max_loops,
        duration: inner.clock,
        children: Timeline::new(inner.events),
    })
}

fn validate(node: &ActionNode, path: &[usize]) -> Result<(), BuildError> {
    let path = || path.to_vec();

    if node.repeat == 0 {
        return Err(BuildError::ZeroRepeat { path: path() });
    }

    let kind = node.action.name();
    match &node.action {
        Action::VisionClick(p) => require_keywords(&p.keywords, kind, path)?,
        Action::VisionWait(p) => require_keywords(&p.keywords, kind, path)?,
        Action::VisionScrollUntil(p) => require_keywords(&p.keywords, kind, path)?,
        Action::TemplateClick(p) => {
            if p.template_path.trim().is_empty() {
                return Err(BuildError::MissingTemplate { path: path() });
            }
            if !(p.threshold > 0.0 && p.threshold <= 1.0) {
                return Err(BuildError::InvalidThreshold {
                    path: path(),
                    threshold: p.threshold,
                });
            }
        }
        Action::IfBlock(block) => require_condition(&block.condition, kind, path)?,
        Action::WhileBlock(block) => {
            require_condition(&block.condition, kind, path)?;
            if block.max_loops.is_none() && block.max_duration.is_none() {
                return Err(BuildError::UnboundedLoop { path: path() });
            }
        }
        Action::Wait
        | Action::Move { .. }
        | Action::Click { .. }
        | Action::Press { .. }
        | Action::Release { .. }
        | Action::Wheel { .. }
        | Action::KeyPress { .. }
        | Action::KeyRelease { .. }
        | Action::Mute(_) => {}
    }
    Ok(())
}

fn require_keywords(
    keywords: &[String],
    kind: &'static str,
    path: impl Fn() -> Vec<usize>,
) -> Result<(), BuildError> {
    if keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(BuildError::MissingKeywords { path: path(), kind });
    }
    Ok(())
}

fn require_condition(
    condition: &TextCondition,
    kind: &'static str,
    path: impl Fn() -> Vec<usize>,
) -> Result<(), BuildError> {
    require_keywords(&condition.keywords, kind, &path)?;
    if condition.interval.is_zero() {
        return Err(BuildError::InvalidInterval { path: path() });
    }
    Ok(())
}
