//! Lowered event model
//!
//! A flat script is a list of [`TimedEvent`]s. On disk each event is a JSON
//! tuple `[kind, ...fields, t]`, e.g. `["mouse_press", "left", [100, 100], 0.0]`.
//! Timestamps are seconds: absolute since script start at the top level and
//! inside guards, relative to the pass start inside a while-event's children.

use crate::timeline::Timeline;
use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Screen position, `[x, y]` on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Screen search region, `[left, top, width, height]` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl From<[i32; 4]> for Region {
    fn from([left, top, width, height]: [i32; 4]) -> Self {
        Self { left, top, width, height }
    }
}

impl From<Region> for [i32; 4] {
    fn from(r: Region) -> Self {
        [r.left, r.top, r.width, r.height]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// Where to prefer a match when several candidates are found on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaPreference {
    #[default]
    BottomRight,
    Bottom,
    None,
}

/// Seconds as the nearest `f64` to the exact decimal value.
///
/// One division of the integer nanosecond count, so `1011ms` becomes exactly
/// the literal `1.011` (`as_secs_f64` adds two rounded parts).
pub fn seconds(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e9
}

/// Duration fields are plain seconds on the wire.
pub mod secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(super::seconds(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&super::super::seconds(*d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            match Option::<f64>::deserialize(d)? {
                Some(v) => Duration::try_from_secs_f64(v).map(Some).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn default_guard_interval() -> Duration {
    Duration::from_millis(300)
}

/// Text-presence predicate consulted by guards and while loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCondition {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub region: Option<Region>,
    /// Poll interval
    #[serde(default = "default_guard_interval", with = "secs")]
    pub interval: Duration,
    #[serde(default, alias = "prefer_area")]
    pub area_preference: AreaPreference,
    /// Additionally require the matched text to sit on a green patch
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_green: bool,
}

impl TextCondition {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            region: None,
            interval: default_guard_interval(),
            area_preference: AreaPreference::default(),
            require_green: false,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

fn default_click_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_click_interval() -> Duration {
    Duration::from_millis(400)
}

/// Find text on screen and click its center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickText {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_click_timeout", with = "secs")]
    pub timeout: Duration,
    #[serde(default = "default_click_interval", with = "secs")]
    pub interval: Duration,
    #[serde(default, alias = "area_preference")]
    pub prefer_area: AreaPreference,
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_wait_interval() -> Duration {
    Duration::from_millis(800)
}

/// Block until text appears on screen or the timeout expires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitText {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_wait_timeout", with = "secs")]
    pub timeout: Duration,
    #[serde(default = "default_wait_interval", with = "secs")]
    pub interval: Duration,
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_green: bool,
}

fn default_max_scrolls() -> u32 {
    8
}

fn default_scroll_step() -> i32 {
    -600
}

fn default_scroll_area() -> AreaPreference {
    AreaPreference::Bottom
}

fn default_scroll_pause() -> Duration {
    Duration::from_millis(300)
}

/// Scroll the wheel until text shows up, then click it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollUntilText {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_max_scrolls")]
    pub max_scrolls: u32,
    /// Wheel amount per scroll, negative scrolls down
    #[serde(default = "default_scroll_step")]
    pub step: i32,
    #[serde(default = "default_scroll_area", alias = "area_preference")]
    pub prefer_area: AreaPreference,
    #[serde(default = "default_scroll_pause", with = "secs")]
    pub pause: Duration,
}

fn default_threshold() -> f64 {
    0.84
}

/// Click the best match of an image template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickTemplate {
    pub template_path: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_mute_strategy() -> String {
    "press_m".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mute {
    #[serde(default = "default_mute_strategy")]
    pub strategy: String,
}

impl Default for Mute {
    fn default() -> Self {
        Self { strategy: default_mute_strategy() }
    }
}

/// Vision-driven actions executed by the condition evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum SmartAction {
    ClickText(ClickText),
    WaitText(WaitText),
    ScrollUntilText(ScrollUntilText),
    ClickTemplate(ClickTemplate),
    Mute(Mute),
}

impl SmartAction {
    pub fn name(&self) -> &'static str {
        match self {
            SmartAction::ClickText(_) => "smart_click_ocr",
            SmartAction::WaitText(_) => "smart_wait_text",
            SmartAction::ScrollUntilText(_) => "smart_scroll_until_text",
            SmartAction::ClickTemplate(_) => "smart_click_template",
            SmartAction::Mute(_) => "smart_mute",
        }
    }
}

/// Payload of a while-event: a bounded, condition-terminated loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhilePayload {
    #[serde(flatten)]
    pub condition: TextCondition,
    #[serde(default, with = "secs::option")]
    pub max_duration: Option<Duration>,
    #[serde(default)]
    pub max_loops: Option<u32>,
    /// Loop-local length of one pass, trailing waits included
    #[serde(default, with = "secs")]
    pub duration: Duration,
    /// Loop-local events, timestamps start at 0 on every pass
    pub children: Timeline,
}

impl WhilePayload {
    /// Pass length, never shorter than the last child
    pub fn pass_duration(&self) -> f64 {
        seconds(self.duration).max(self.children.end_time())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    MouseMove { pos: Point },
    MousePress { button: MouseButton, pos: Point },
    MouseRelease { button: MouseButton, pos: Point },
    MouseWheel { pos: Point, amount: i32 },
    KeyPress { key: String },
    KeyRelease { key: String },
    Smart(SmartAction),
    GuardStart(TextCondition),
    GuardEnd,
    While(WhilePayload),
}

impl EventKind {
    /// Tag used in the persisted tuple
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MouseMove { .. } => "mouse_move",
            EventKind::MousePress { .. } => "mouse_press",
            EventKind::MouseRelease { .. } => "mouse_release",
            EventKind::MouseWheel { .. } => "mouse_wheel",
            EventKind::KeyPress { .. } => "key_press",
            EventKind::KeyRelease { .. } => "key_release",
            EventKind::Smart(action) => action.name(),
            EventKind::GuardStart(_) => "guard_start",
            EventKind::GuardEnd => "guard_end",
            EventKind::While(_) => "while",
        }
    }

    /// Whether executing this event consults the condition evaluator
    pub fn needs_evaluator(&self) -> bool {
        matches!(
            self,
            EventKind::Smart(_) | EventKind::GuardStart(_) | EventKind::While(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub kind: EventKind,
    /// Seconds, see module docs for the time origin
    pub t: f64,
}

impl TimedEvent {
    pub fn new(kind: EventKind, t: f64) -> Self {
        Self { kind, t }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("event is not a non-empty list")]
    Empty,

    #[error("event kind must be a string")]
    MissingKind,

    #[error("{kind}: last element must be a numeric timestamp")]
    MissingTimestamp { kind: String },

    #[error("unknown event kind '{0}'")]
    UnknownKind(String),

    #[error("{kind}: expected {expected} field(s) between kind and timestamp, found {found}")]
    Arity {
        kind: String,
        expected: usize,
        found: usize,
    },

    #[error("{kind}: invalid payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize)]
struct Empty {}

impl Serialize for TimedEvent {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(None)?;
        seq.serialize_element(self.kind.name())?;
        match &self.kind {
            EventKind::MouseMove { pos } => seq.serialize_element(pos)?,
            EventKind::MousePress { button, pos } | EventKind::MouseRelease { button, pos } => {
                seq.serialize_element(button)?;
                seq.serialize_element(pos)?;
            }
            EventKind::MouseWheel { pos, amount } => {
                seq.serialize_element(pos)?;
                seq.serialize_element(amount)?;
            }
            EventKind::KeyPress { key } | EventKind::KeyRelease { key } => {
                seq.serialize_element(key)?
            }
            EventKind::Smart(action) => match action {
                SmartAction::ClickText(p) => seq.serialize_element(p)?,
                SmartAction::WaitText(p) => seq.serialize_element(p)?,
                SmartAction::ScrollUntilText(p) => seq.serialize_element(p)?,
                SmartAction::ClickTemplate(p) => seq.serialize_element(p)?,
                SmartAction::Mute(p) => seq.serialize_element(p)?,
            },
            EventKind::GuardStart(cond) => seq.serialize_element(cond)?,
            EventKind::GuardEnd => seq.serialize_element(&Empty {})?,
            EventKind::While(payload) => seq.serialize_element(payload)?,
        }
        seq.serialize_element(&self.t)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TimedEvent {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(d)?;
        TimedEvent::from_wire(items).map_err(D::Error::custom)
    }
}

impl TimedEvent {
    /// Parse one persisted tuple
    pub fn from_wire(items: Vec<Value>) -> Result<Self, WireError> {
        let (first, rest) = items.split_first().ok_or(WireError::Empty)?;
        let kind = first.as_str().ok_or(WireError::MissingKind)?;
        let (last, fields) = rest.split_last().ok_or_else(|| WireError::MissingTimestamp {
            kind: kind.to_string(),
        })?;
        let t = last.as_f64().ok_or_else(|| WireError::MissingTimestamp {
            kind: kind.to_string(),
        })?;

        let arity = |expected: usize| {
            if fields.len() == expected {
                Ok(())
            } else {
                Err(WireError::Arity {
                    kind: kind.to_string(),
                    expected,
                    found: fields.len(),
                })
            }
        };

        let event = match kind {
            "mouse_move" => {
                arity(1)?;
                EventKind::MouseMove { pos: field(kind, &fields[0])? }
            }
            "mouse_press" => {
                arity(2)?;
                EventKind::MousePress {
                    button: field(kind, &fields[0])?,
                    pos: field(kind, &fields[1])?,
                }
            }
            "mouse_release" => {
                arity(2)?;
                EventKind::MouseRelease {
                    button: field(kind, &fields[0])?,
                    pos: field(kind, &fields[1])?,
                }
            }
            "mouse_wheel" => {
                arity(2)?;
                EventKind::MouseWheel {
                    pos: field(kind, &fields[0])?,
                    amount: field(kind, &fields[1])?,
                }
            }
            "key_press" => {
                arity(1)?;
                EventKind::KeyPress { key: field(kind, &fields[0])? }
            }
            "key_release" => {
                arity(1)?;
                EventKind::KeyRelease { key: field(kind, &fields[0])? }
            }
            "smart_click_ocr" => {
                arity(1)?;
                EventKind::Smart(SmartAction::ClickText(field(kind, &fields[0])?))
            }
            "smart_wait_text" => {
                arity(1)?;
                EventKind::Smart(SmartAction::WaitText(field(kind, &fields[0])?))
            }
            "smart_scroll_until_text" => {
                arity(1)?;
                EventKind::Smart(SmartAction::ScrollUntilText(field(kind, &fields[0])?))
            }
            "smart_click_template" => {
                arity(1)?;
                EventKind::Smart(SmartAction::ClickTemplate(field(kind, &fields[0])?))
            }
            "smart_mute" => {
                // older files store the mute event without a payload
                if fields.is_empty() {
                    EventKind::Smart(SmartAction::Mute(Mute::default()))
                } else {
                    arity(1)?;
                    EventKind::Smart(SmartAction::Mute(field(kind, &fields[0])?))
                }
            }
            "guard_start" | "smart_if_guard_ocr" => {
                arity(1)?;
                EventKind::GuardStart(field(kind, &fields[0])?)
            }
            "guard_end" | "smart_end_guard" => {
                if fields.len() > 1 {
                    arity(1)?;
                }
                EventKind::GuardEnd
            }
            "while" => {
                arity(1)?;
                EventKind::While(field(kind, &fields[0])?)
            }
            other => return Err(WireError::UnknownKind(other.to_string())),
        };

        Ok(TimedEvent::new(event, t))
    }
}

fn field<T: DeserializeOwned>(kind: &str, v: &Value) -> Result<T, WireError> {
    serde_json::from_value(v.clone()).map_err(|source| WireError::Payload {
        kind: kind.to_string(),
        source,
    })
}
