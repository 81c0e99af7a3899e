//! macroflow-core - Script lowering and timeline playback for input automation
//!
//! Authored scripts are trees of [`ActionNode`]s: waits, clicks, key
//! presses, vision-driven smart actions, and two control-flow blocks (a
//! condition-guarded region and a bounded while loop). [`lower`] flattens a
//! tree into a [`Timeline`] of timestamped events; a [`Player`] replays it
//! through an [`InputDriver`], asking a [`ConditionEvaluator`] about the
//! screen whenever a guard or loop needs an answer.
//!
//! ## Platform Support
//!
//! - **macOS**: native driver via CGEvent
//! - **Windows**: native driver via SendInput
//! - **Linux**: dry run only ([`LogDriver`])

pub mod action;
pub mod builder;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod platform;
pub mod player;
pub mod session;
pub mod timeline;

pub use action::{Action, ActionNode, IfBlock, WhileBlock};
pub use builder::lower;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PlaybackConfig;
pub use driver::{DriverCall, InputDriver, LogDriver, RecordingDriver};
pub use error::{BuildError, Error, ErrorCode, Result};
pub use evaluator::{ConditionEvaluator, ConstEvaluator, ScriptedEvaluator};
pub use event::{
    AreaPreference, EventKind, MouseButton, Point, Region, SmartAction, TextCondition,
    TimedEvent, WhilePayload, WireError,
};
pub use player::{PlaybackReport, Player, StopReason};
pub use session::{CancelToken, PlaybackHandle};
pub use timeline::Timeline;

pub mod prelude {
    pub use crate::action::{Action, ActionNode};
    pub use crate::builder::lower;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::PlaybackConfig;
    pub use crate::driver::{InputDriver, LogDriver};
    pub use crate::error::{BuildError, Error, ErrorCode, Result};
    pub use crate::evaluator::{ConditionEvaluator, ConstEvaluator};
    pub use crate::event::{EventKind, MouseButton, Point, TextCondition, TimedEvent};
    pub use crate::player::{PlaybackReport, Player, StopReason};
    pub use crate::session::{CancelToken, PlaybackHandle};
    pub use crate::timeline::Timeline;
}
