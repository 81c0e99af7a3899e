//! Native input drivers
//!
//! macOS posts CGEvents, Windows uses SendInput. Other targets have no
//! native driver; callers fall back to [`crate::driver::LogDriver`].

use crate::driver::InputDriver;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "macos")]
pub use self::macos::NativeDriver;

#[cfg(target_os = "windows")]
pub use self::windows::NativeDriver;

/// The native driver for this OS, if there is one
pub fn native_driver() -> Option<Box<dyn InputDriver>> {
    #[cfg(any(target_os = "macos", target_os = "windows"))]
    {
        Some(Box::new(NativeDriver::new()))
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        None
    }
}
