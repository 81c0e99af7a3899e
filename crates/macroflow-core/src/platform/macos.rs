//! CGEvent injection

use crate::driver::InputDriver;
use crate::event::{MouseButton, Point};
use anyhow::{anyhow, Result};

use cidre::cg;

// Raw FFI for CGEventPost (not exposed by cidre)
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventPost(tap: u32, event: *const std::ffi::c_void);
}

const HID_EVENT_TAP: u32 = 0;

fn post_event(event: &cg::Event) {
    unsafe {
        CGEventPost(HID_EVENT_TAP, event as *const _ as *const std::ffi::c_void);
    }
}

/// Posts mouse and keyboard events at the HID level.
///
/// CGEvent mouse events carry a position, so the driver remembers where the
/// cursor was last moved and which button is held (moves while a button is
/// down are posted as drags).
#[derive(Debug, Default)]
pub struct NativeDriver {
    cursor: Point,
    held: Option<MouseButton>,
}

impl NativeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn post_mouse(&self, kind: cg::EventType, button: MouseButton) -> Result<()> {
        let pos = cg::Point {
            x: self.cursor.x as f64,
            y: self.cursor.y as f64,
        };
        let event = cg::Event::mouse(None, kind, pos, cg_button(button))
            .ok_or_else(|| anyhow!("failed to create {:?} event", kind))?;
        post_event(&event);
        Ok(())
    }

    fn post_key(&self, key: &str, down: bool) -> Result<()> {
        let code = key_code(key).ok_or_else(|| anyhow!("unknown key: {}", key))?;
        let event = cg::Event::keyboard(None, code, down)
            .ok_or_else(|| anyhow!("failed to create key event for {}", key))?;
        post_event(&event);
        Ok(())
    }
}

impl InputDriver for NativeDriver {
    fn move_cursor(&mut self, pos: Point) -> Result<()> {
        self.cursor = pos;
        let (kind, button) = match self.held {
            Some(MouseButton::Left) => (cg::EventType::LEFT_MOUSE_DRAGGED, MouseButton::Left),
            Some(MouseButton::Right) => (cg::EventType::RIGHT_MOUSE_DRAGGED, MouseButton::Right),
            Some(MouseButton::Middle) => (cg::EventType::OHTER_MOUSE_DRAGGED, MouseButton::Middle),
            None => (cg::EventType::MOUSE_MOVED, MouseButton::Left),
        };
        self.post_mouse(kind, button)
    }

    fn press_button(&mut self, button: MouseButton) -> Result<()> {
        let kind = match button {
            MouseButton::Left => cg::EventType::LEFT_MOUSE_DOWN,
            MouseButton::Right => cg::EventType::RIGHT_MOUSE_DOWN,
            MouseButton::Middle => cg::EventType::OHTER_MOUSE_DOWN,
        };
        self.post_mouse(kind, button)?;
        self.held = Some(button);
        Ok(())
    }

    fn release_button(&mut self, button: MouseButton) -> Result<()> {
        let kind = match button {
            MouseButton::Left => cg::EventType::LEFT_MOUSE_UP,
            MouseButton::Right => cg::EventType::RIGHT_MOUSE_UP,
            MouseButton::Middle => cg::EventType::OHTER_MOUSE_UP,
        };
        self.held = None;
        self.post_mouse(kind, button)
    }

    fn scroll_wheel(&mut self, amount: i32) -> Result<()> {
        let event = cg::Event::wheel_2(None, cg::ScrollEventUnit::Line, 1, amount)
            .ok_or_else(|| anyhow!("failed to create scroll event"))?;
        post_event(&event);
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<()> {
        self.post_key(key, true)
    }

    fn release_key(&mut self, key: &str) -> Result<()> {
        self.post_key(key, false)
    }
}

fn cg_button(button: MouseButton) -> cg::MouseButton {
    match button {
        MouseButton::Left => cg::MouseButton::Left,
        MouseButton::Right => cg::MouseButton::Right,
        MouseButton::Middle => cg::MouseButton::Center,
    }
}

/// Virtual keycode for a recorded key name: either a single character or a
/// named key such as `space`, `ctrl_l` or `f5`.
fn key_code(key: &str) -> Option<u16> {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return char_code(c.to_ascii_lowercase());
    }
    Some(match key.to_lowercase().as_str() {
        "enter" | "return" => 36,
        "tab" => 48,
        "space" => 49,
        "backspace" => 51,
        "esc" | "escape" => 53,
        "cmd" | "cmd_l" | "cmd_r" | "command" => 55,
        "shift" | "shift_l" => 56,
        "caps_lock" => 57,
        "alt" | "alt_l" | "option" => 58,
        "ctrl" | "ctrl_l" | "control" => 59,
        "shift_r" => 60,
        "alt_r" | "alt_gr" => 61,
        "ctrl_r" => 62,
        "f1" => 122,
        "f2" => 120,
        "f3" => 99,
        "f4" => 118,
        "f5" => 96,
        "f6" => 97,
        "f7" => 98,
        "f8" => 100,
        "f9" => 101,
        "f10" => 109,
        "f11" => 103,
        "f12" => 111,
        "home" => 115,
        "page_up" | "pageup" => 116,
        "delete" => 117,
        "end" => 119,
        "page_down" | "pagedown" => 121,
        "left" => 123,
        "right" => 124,
        "down" => 125,
        "up" => 126,
        _ => return None,
    })
}

fn char_code(c: char) -> Option<u16> {
    Some(match c {
        'a' => 0,
        's' => 1,
        'd' => 2,
        'f' => 3,
        'h' => 4,
        'g' => 5,
        'z' => 6,
        'x' => 7,
        'c' => 8,
        'v' => 9,
        'b' => 11,
        'q' => 12,
        'w' => 13,
        'e' => 14,
        'r' => 15,
        'y' => 16,
        't' => 17,
        '1' | '!' => 18,
        '2' | '@' => 19,
        '3' | '#' => 20,
        '4' | '$' => 21,
        '6' | '^' => 22,
        '5' | '%' => 23,
        '=' | '+' => 24,
        '9' | '(' => 25,
        '7' | '&' => 26,
        '-' | '_' => 27,
        '8' | '*' => 28,
        '0' | ')' => 29,
        ']' | '}' => 30,
        'o' => 31,
        'u' => 32,
        '[' | '{' => 33,
        'i' => 34,
        'p' => 35,
        'l' => 37,
        'j' => 38,
        '\'' | '"' => 39,
        'k' => 40,
        ';' | ':' => 41,
        '\\' | '|' => 42,
        ',' | '<' => 43,
        '/' | '?' => 44,
        'n' => 45,
        'm' => 46,
        '.' | '>' => 47,
        ' ' => 49,
        '`' | '~' => 50,
        _ => return None,
    })
}
