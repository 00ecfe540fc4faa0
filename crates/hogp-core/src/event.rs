//! Physical input events as produced by an [`InputEventSource`](crate::InputEventSource)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::{PAGE_BUTTON, PAGE_CONSUMER, PAGE_KEYBOARD};

/// Relative axis codes for `PointerMove` and `Scroll` events (evdev numbering)
pub mod axis {
    pub const X: u32 = 0x00;
    pub const Y: u32 = 0x01;
    pub const HWHEEL: u32 = 0x06;
    pub const WHEEL: u32 = 0x08;
}

/// Kind of a physical input event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyPress,
    KeyRelease,
    PointerMove,
    ButtonPress,
    ButtonRelease,
    Scroll,
}

impl EventKind {
    pub fn is_press(self) -> bool {
        matches!(self, EventKind::KeyPress | EventKind::ButtonPress)
    }
}

/// A HID usage split into page and id
///
/// Event codes carry usages in extended form (`page << 16 | id`). A code
/// with a zero page is interpreted against the default page of its event
/// kind: keyboard for keys, button for buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Usage {
    pub page: u16,
    pub id: u16,
}

impl Usage {
    pub const fn new(page: u16, id: u16) -> Self {
        Self { page, id }
    }

    pub const fn keyboard(id: u16) -> Self {
        Self::new(PAGE_KEYBOARD, id)
    }

    pub const fn button(id: u16) -> Self {
        Self::new(PAGE_BUTTON, id)
    }

    pub const fn consumer(id: u16) -> Self {
        Self::new(PAGE_CONSUMER, id)
    }

    /// Split an extended usage code, falling back to `default_page` when the
    /// code carries no page
    pub fn from_code(code: u32, default_page: u16) -> Self {
        let page = (code >> 16) as u16;
        Self {
            page: if page == 0 { default_page } else { page },
            id: code as u16,
        }
    }

    /// Extended usage code
    pub const fn code(self) -> u32 {
        (self.page as u32) << 16 | self.id as u32
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}:{:#04x}", self.page, self.id)
    }
}

/// A discrete physical input event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Usage code for keys and buttons, axis code for motion and scroll
    pub code: u32,
    /// Relative delta for motion and scroll, unused otherwise
    #[serde(default)]
    pub value: i32,
    /// Monotonic timestamp in microseconds
    #[serde(default)]
    pub timestamp: u64,
}

impl InputEvent {
    pub fn new(kind: EventKind, code: u32, value: i32) -> Self {
        Self {
            kind,
            code,
            value,
            timestamp: 0,
        }
    }

    pub fn key_press(usage: u16) -> Self {
        Self::new(EventKind::KeyPress, usage as u32, 1)
    }

    pub fn key_release(usage: u16) -> Self {
        Self::new(EventKind::KeyRelease, usage as u32, 0)
    }

    pub fn button_press(usage: Usage) -> Self {
        Self::new(EventKind::ButtonPress, usage.code(), 1)
    }

    pub fn button_release(usage: Usage) -> Self {
        Self::new(EventKind::ButtonRelease, usage.code(), 0)
    }

    pub fn pointer_move(axis: u32, delta: i32) -> Self {
        Self::new(EventKind::PointerMove, axis, delta)
    }

    pub fn scroll(axis: u32, delta: i32) -> Self {
        Self::new(EventKind::Scroll, axis, delta)
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_code_round_trip() {
        let usage = Usage::consumer(0xE9);
        assert_eq!(usage.code(), 0x000C_00E9);
        assert_eq!(Usage::from_code(usage.code(), PAGE_BUTTON), usage);
    }

    #[test]
    fn test_usage_default_page() {
        assert_eq!(Usage::from_code(0x04, PAGE_KEYBOARD), Usage::keyboard(0x04));
        assert_eq!(Usage::from_code(0x02, PAGE_BUTTON), Usage::button(0x02));
    }

    #[test]
    fn test_event_json_shape() {
        let event: InputEvent =
            serde_json::from_str(r#"{"kind":"key_press","code":4}"#).unwrap();
        assert_eq!(event.kind, EventKind::KeyPress);
        assert_eq!(event.code, 0x04);
        assert_eq!(event.value, 0);
        assert_eq!(event.timestamp, 0);

        let json = serde_json::to_string(&InputEvent::pointer_move(axis::X, -3)).unwrap();
        assert!(json.contains(r#""kind":"pointer_move""#));
        assert!(json.contains(r#""value":-3"#));
    }
}
