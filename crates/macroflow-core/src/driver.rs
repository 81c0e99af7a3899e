//! Input driver seam
//!
//! The player never talks to the OS directly. Platform drivers live in
//! [`crate::platform`]; this module has the trait plus two drivers that do
//! not touch real devices.

use crate::event::{MouseButton, Point};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Synchronous, best-effort device actions. Errors are reported back to the
/// player, which logs them and moves on.
pub trait InputDriver: Send {
    fn move_cursor(&mut self, pos: Point) -> Result<()>;
    fn press_button(&mut self, button: MouseButton) -> Result<()>;
    fn release_button(&mut self, button: MouseButton) -> Result<()>;
    /// Positive scrolls up, negative scrolls down
    fn scroll_wheel(&mut self, amount: i32) -> Result<()>;
    fn press_key(&mut self, key: &str) -> Result<()>;
    fn release_key(&mut self, key: &str) -> Result<()>;
}

impl<D: InputDriver + ?Sized> InputDriver for Box<D> {
    fn move_cursor(&mut self, pos: Point) -> Result<()> {
        (**self).move_cursor(pos)
    }
    fn press_button(&mut self, button: MouseButton) -> Result<()> {
        (**self).press_button(button)
    }
    fn release_button(&mut self, button: MouseButton) -> Result<()> {
        (**self).release_button(button)
    }
    fn scroll_wheel(&mut self, amount: i32) -> Result<()> {
        (**self).scroll_wheel(amount)
    }
    fn press_key(&mut self, key: &str) -> Result<()> {
        (**self).press_key(key)
    }
    fn release_key(&mut self, key: &str) -> Result<()> {
        (**self).release_key(key)
    }
}

/// Dry-run driver: logs every action instead of performing it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDriver;

impl InputDriver for LogDriver {
    fn move_cursor(&mut self, pos: Point) -> Result<()> {
        info!("move to ({}, {})", pos.x, pos.y);
        Ok(())
    }

    fn press_button(&mut self, button: MouseButton) -> Result<()> {
        info!("press {}", button.as_str());
        Ok(())
    }

    fn release_button(&mut self, button: MouseButton) -> Result<()> {
        info!("release {}", button.as_str());
        Ok(())
    }

    fn scroll_wheel(&mut self, amount: i32) -> Result<()> {
        info!("scroll {}", amount);
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        info!("key down {}", key);
        Ok(())
    }

    fn release_key(&mut self, key: &str) -> Result<()> {
        info!("key up {}", key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Move(Point),
    Press(MouseButton),
    Release(MouseButton),
    Wheel(i32),
    KeyPress(String),
    KeyRelease(String),
}

/// Captures calls into a shared log; clones see the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    calls: Arc<Mutex<Vec<DriverCall>>>,
    failing: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call is still recorded, then reported as failed
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: DriverCall) -> Result<()> {
        self.calls.lock().push(call);
        if self.failing {
            anyhow::bail!("injected driver failure");
        }
        Ok(())
    }
}

impl InputDriver for RecordingDriver {
    fn move_cursor(&mut self, pos: Point) -> Result<()> {
        self.record(DriverCall::Move(pos))
    }

    fn press_button(&mut self, button: MouseButton) -> Result<()> {
        self.record(DriverCall::Press(button))
    }

    fn release_button(&mut self, button: MouseButton) -> Result<()> {
        self.record(DriverCall::Release(button))
    }

    fn scroll_wheel(&mut self, amount: i32) -> Result<()> {
        self.record(DriverCall::Wheel(amount))
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        self.record(DriverCall::KeyPress(key.to_string()))
    }

    fn release_key(&mut self, key: &str) -> Result<()> {
        self.record(DriverCall::KeyRelease(key.to_string()))
    }
}
