//! Condition evaluator seam
//!
//! Screen capture, OCR and template matching sit behind
//! [`ConditionEvaluator`]. Guards and loops call `evaluate`; smart actions
//! call `perform`.

use crate::event::{SmartAction, TextCondition};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

pub trait ConditionEvaluator: Send {
    /// Whether the condition currently holds. Must be fast and must not
    /// block for longer than one screen query.
    fn evaluate(&mut self, condition: &TextCondition) -> Result<bool>;

    /// Run a smart action. `Ok(false)` means the target was not found.
    fn perform(&mut self, action: &SmartAction) -> Result<bool>;
}

/// Answers every query with the same value. Used for dry runs.
#[derive(Debug, Clone, Copy)]
pub struct ConstEvaluator(pub bool);

impl ConditionEvaluator for ConstEvaluator {
    fn evaluate(&mut self, condition: &TextCondition) -> Result<bool> {
        info!("condition {:?} -> {}", condition.keywords, self.0);
        Ok(self.0)
    }

    fn perform(&mut self, action: &SmartAction) -> Result<bool> {
        info!("{} -> {}", action.name(), self.0);
        Ok(self.0)
    }
}

#[derive(Debug, Default)]
struct Script {
    answers: VecDeque<std::result::Result<bool, String>>,
    fallback: bool,
    evaluated: Vec<TextCondition>,
    performed: Vec<SmartAction>,
}

/// Answers `evaluate` from a queue, then with a fallback value once the
/// queue is empty. Clones share state, so a test can keep a handle after
/// moving one into a player.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEvaluator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEvaluator {
    pub fn new(fallback: bool) -> Self {
        let evaluator = Self::default();
        evaluator.script.lock().fallback = fallback;
        evaluator
    }

    pub fn then(self, answer: bool) -> Self {
        self.script.lock().answers.push_back(Ok(answer));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script.lock().answers.push_back(Err(message.into()));
        self
    }

    pub fn evaluations(&self) -> usize {
        self.script.lock().evaluated.len()
    }

    pub fn evaluated(&self) -> Vec<TextCondition> {
        self.script.lock().evaluated.clone()
    }

    pub fn performed(&self) -> Vec<SmartAction> {
        self.script.lock().performed.clone()
    }
}

impl ConditionEvaluator for ScriptedEvaluator {
    fn evaluate(&mut self, condition: &TextCondition) -> Result<bool> {
        let mut script = self.script.lock();
        script.evaluated.push(condition.clone());
        match script.answers.pop_front() {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(script.fallback),
        }
    }

    fn perform(&mut self, action: &SmartAction) -> Result<bool> {
        self.script.lock().performed.push(action.clone());
        Ok(true)
    }
}
