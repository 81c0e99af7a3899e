//! macroflow-recorder - Recording, storage and macro tasks
//!
//! Captures live input into timelines, keeps them on disk as flat event
//! arrays, and chains saved recordings into looping macro tasks.

pub mod recorder;
pub mod storage;
pub mod task;

pub use recorder::{InputSink, RawInput, Recorder, RecorderConfig, RecordingHandle};
pub use storage::{default_name, ScriptStorage};
pub use task::{MacroStep, MacroTask, TaskReport, TaskRunner};

pub mod prelude {
    pub use crate::recorder::{InputSink, RawInput, Recorder, RecorderConfig, RecordingHandle};
    pub use crate::storage::{default_name, ScriptStorage};
    pub use crate::task::{MacroStep, MacroTask, TaskReport, TaskRunner};
}
