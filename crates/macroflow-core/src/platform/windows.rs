//! SendInput injection

use crate::driver::InputDriver;
use crate::event::{MouseButton, Point};
use anyhow::{anyhow, Result};

use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
    MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_WHEEL,
    MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::SetCursorPos;

/// One wheel notch
const WHEEL_DELTA: i32 = 120;

#[derive(Debug, Default)]
pub struct NativeDriver;

impl NativeDriver {
    pub fn new() -> Self {
        Self
    }
}

impl InputDriver for NativeDriver {
    fn move_cursor(&mut self, pos: Point) -> Result<()> {
        unsafe {
            SetCursorPos(pos.x, pos.y).map_err(|e| anyhow!("Failed to move cursor: {:?}", e))?;
        }
        Ok(())
    }

    fn press_button(&mut self, button: MouseButton) -> Result<()> {
        let flags = match button {
            MouseButton::Left => MOUSEEVENTF_LEFTDOWN,
            MouseButton::Right => MOUSEEVENTF_RIGHTDOWN,
            MouseButton::Middle => MOUSEEVENTF_MIDDLEDOWN,
        };
        send_inputs(&[make_mouse_input(flags, 0)])
    }

    fn release_button(&mut self, button: MouseButton) -> Result<()> {
        let flags = match button {
            MouseButton::Left => MOUSEEVENTF_LEFTUP,
            MouseButton::Right => MOUSEEVENTF_RIGHTUP,
            MouseButton::Middle => MOUSEEVENTF_MIDDLEUP,
        };
        send_inputs(&[make_mouse_input(flags, 0)])
    }

    fn scroll_wheel(&mut self, amount: i32) -> Result<()> {
        send_inputs(&[make_mouse_input(MOUSEEVENTF_WHEEL, amount * WHEEL_DELTA)])
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        let vk = key_name_to_vk(key).ok_or_else(|| anyhow!("Unknown key: {}", key))?;
        send_inputs(&[make_key_input(vk, false)])
    }

    fn release_key(&mut self, key: &str) -> Result<()> {
        let vk = key_name_to_vk(key).ok_or_else(|| anyhow!("Unknown key: {}", key))?;
        send_inputs(&[make_key_input(vk, true)])
    }
}

/// Virtual key for a recorded key name: a single character or a named key
fn key_name_to_vk(name: &str) -> Option<u16> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        let c = c.to_ascii_uppercase();
        return match c {
            'A'..='Z' | '0'..='9' | ' ' => Some(c as u16),
            _ => None,
        };
    }
    Some(match name.to_lowercase().as_str() {
        "backspace" => 0x08,
        "tab" => 0x09,
        "enter" | "return" => 0x0D,
        "shift" | "shift_l" => 0xA0,
        "shift_r" => 0xA1,
        "ctrl" | "ctrl_l" | "control" => 0xA2,
        "ctrl_r" => 0xA3,
        "alt" | "alt_l" => 0xA4,
        "alt_r" | "alt_gr" => 0xA5,
        "pause" => 0x13,
        "caps_lock" => 0x14,
        "esc" | "escape" => 0x1B,
        "space" => 0x20,
        "page_up" | "pageup" => 0x21,
        "page_down" | "pagedown" => 0x22,
        "end" => 0x23,
        "home" => 0x24,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "print_screen" => 0x2C,
        "insert" => 0x2D,
        "delete" => 0x2E,
        "cmd" | "cmd_l" | "win" => 0x5B,
        "cmd_r" => 0x5C,
        "menu" => 0x5D,
        "num_lock" => 0x90,
        "scroll_lock" => 0x91,
        f if f.starts_with('f') => {
            let n: u16 = f[1..].parse().ok()?;
            if !(1..=24).contains(&n) {
                return None;
            }
            0x70 + n - 1
        }
        _ => return None,
    })
}

fn make_mouse_input(flags: MOUSE_EVENT_FLAGS, data: i32) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: data as u32,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn make_key_input(vk: u16, key_up: bool) -> INPUT {
    let flags = if key_up {
        KEYEVENTF_KEYUP
    } else {
        KEYBD_EVENT_FLAGS(0)
    };

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send_inputs(inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };

    if sent as usize != inputs.len() {
        return Err(anyhow!("SendInput failed: sent {} of {}", sent, inputs.len()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_recorded_key_names() {
        assert_eq!(key_name_to_vk("a"), Some(0x41));
        assert_eq!(key_name_to_vk("M"), Some(0x4D));
        assert_eq!(key_name_to_vk("7"), Some(0x37));
        assert_eq!(key_name_to_vk("space"), Some(0x20));
        assert_eq!(key_name_to_vk("ctrl_l"), Some(0xA2));
        assert_eq!(key_name_to_vk("f1"), Some(0x70));
        assert_eq!(key_name_to_vk("f12"), Some(0x7B));
        assert_eq!(key_name_to_vk("f30"), None);
        assert_eq!(key_name_to_vk("media_volume_up"), None);
    }
}
