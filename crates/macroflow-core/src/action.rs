//! Authored action tree
//!
//! Scripts are written as a list of [`ActionNode`]s. Block nodes own their
//! children; there are no back references. Authoring JSON looks like
//!
//! ```json
//! [
//!   { "type": "click", "button": "left", "pos": [100, 100], "delay_ms": 250 },
//!   { "type": "if_block", "keywords": ["Next"], "children": [
//!       { "type": "key_press", "key": "enter" }
//!   ] }
//! ]
//! ```

use crate::event::{
    secs, ClickTemplate, ClickText, MouseButton, Mute, Point, ScrollUntilText, TextCondition,
    WaitText,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn is_true(b: &bool) -> bool {
    *b
}

fn is_one(n: &u32) -> bool {
    *n == 1
}

fn is_zero(d: &Duration) -> bool {
    d.is_zero()
}

fn left() -> MouseButton {
    MouseButton::Left
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    #[serde(flatten)]
    pub action: Action,
    /// Delay before every instance of this node
    #[serde(default, rename = "delay_ms", with = "millis", skip_serializing_if = "is_zero")]
    pub delay_before: Duration,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub repeat: u32,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Advance the clock by `delay_ms`, nothing else
    Wait,
    Move {
        pos: Point,
    },
    /// Press then release after a fixed minimal gap
    Click {
        #[serde(default = "left")]
        button: MouseButton,
        pos: Point,
    },
    Press {
        #[serde(default = "left")]
        button: MouseButton,
        pos: Point,
    },
    Release {
        #[serde(default = "left")]
        button: MouseButton,
        pos: Point,
    },
    Wheel {
        pos: Point,
        amount: i32,
    },
    KeyPress {
        key: String,
    },
    KeyRelease {
        key: String,
    },
    VisionClick(ClickText),
    TemplateClick(ClickTemplate),
    VisionScrollUntil(ScrollUntilText),
    VisionWait(WaitText),
    Mute(Mute),
    IfBlock(IfBlock),
    WhileBlock(WhileBlock),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Wait => "wait",
            Action::Move { .. } => "move",
            Action::Click { .. } => "click",
            Action::Press { .. } => "press",
            Action::Release { .. } => "release",
            Action::Wheel { .. } => "wheel",
            Action::KeyPress { .. } => "key_press",
            Action::KeyRelease { .. } => "key_release",
            Action::VisionClick(_) => "vision_click",
            Action::TemplateClick(_) => "template_click",
            Action::VisionScrollUntil(_) => "vision_scroll_until",
            Action::VisionWait(_) => "vision_wait",
            Action::Mute(_) => "mute",
            Action::IfBlock(_) => "if_block",
            Action::WhileBlock(_) => "while_block",
        }
    }
}

/// Skip the rest of the body as soon as the condition holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    #[serde(flatten)]
    pub condition: TextCondition,
    #[serde(default)]
    pub children: Vec<ActionNode>,
}

/// Repeat the body until the condition holds or a bound is hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileBlock {
    #[serde(flatten)]
    pub condition: TextCondition,
    #[serde(default, with = "secs::option")]
    pub max_duration: Option<Duration>,
    #[serde(default)]
    pub max_loops: Option<u32>,
    #[serde(default)]
    pub children: Vec<ActionNode>,
}

impl ActionNode {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            delay_before: Duration::ZERO,
            repeat: 1,
            enabled: true,
        }
    }

    pub fn wait(duration: Duration) -> Self {
        Self::new(Action::Wait).delay(duration)
    }

    pub fn click(button: MouseButton, x: i32, y: i32) -> Self {
        Self::new(Action::Click { button, pos: Point::new(x, y) })
    }

    pub fn key_press(key: impl Into<String>) -> Self {
        Self::new(Action::KeyPress { key: key.into() })
    }

    pub fn key_release(key: impl Into<String>) -> Self {
        Self::new(Action::KeyRelease { key: key.into() })
    }

    pub fn if_block(condition: TextCondition, children: Vec<ActionNode>) -> Self {
        Self::new(Action::IfBlock(IfBlock { condition, children }))
    }

    pub fn while_block(
        condition: TextCondition,
        max_loops: Option<u32>,
        max_duration: Option<Duration>,
        children: Vec<ActionNode>,
    ) -> Self {
        Self::new(Action::WhileBlock(WhileBlock {
            condition,
            max_duration,
            max_loops,
            children,
        }))
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay_before = delay;
        self
    }

    pub fn repeat(mut self, count: u32) -> Self {
        self.repeat = count;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_authoring_json_with_defaults() {
        let nodes: Vec<ActionNode> = serde_json::from_value(json!([
            { "type": "click", "pos": [10, 20], "delay_ms": 250, "repeat": 2 },
            { "type": "wait", "delay_ms": 1000 },
            { "type": "if_block", "keywords": ["Next"], "interval": 0.5, "children": [
                { "type": "key_press", "key": "enter", "enabled": false }
            ] }
        ]))
        .unwrap();

        assert_eq!(nodes[0], ActionNode::click(MouseButton::Left, 10, 20)
            .delay(Duration::from_millis(250))
            .repeat(2));
        assert_eq!(nodes[1], ActionNode::wait(Duration::from_secs(1)));
        match &nodes[2].action {
            Action::IfBlock(block) => {
                assert_eq!(block.condition.keywords, vec!["Next"]);
                assert_eq!(block.condition.interval, Duration::from_millis(500));
                assert!(!block.children[0].enabled);
            }
            other => panic!("expected if_block, got {}", other.name()),
        }
    }

    #[test]
    fn while_block_bounds_parse() {
        let node: ActionNode = serde_json::from_value(json!({
            "type": "while_block",
            "keywords": ["Done"],
            "max_loops": 3,
            "max_duration": 30.0,
            "children": [{ "type": "wait", "delay_ms": 1000 }]
        }))
        .unwrap();
        match node.action {
            Action::WhileBlock(w) => {
                assert_eq!(w.max_loops, Some(3));
                assert_eq!(w.max_duration, Some(Duration::from_secs(30)));
                assert_eq!(w.children.len(), 1);
            }
            other => panic!("expected while_block, got {}", other.name()),
        }
    }

    #[test]
    fn serialization_omits_default_common_fields() {
        let v = serde_json::to_value(ActionNode::key_press("a")).unwrap();
        assert_eq!(v, json!({ "type": "key_press", "key": "a" }));
    }
}
