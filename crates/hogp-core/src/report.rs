//! HID input report framing
//!
//! Layouts of the built-in report map:
//! ```text
//! Keyboard (ID 1, 8 bytes):  [modifiers, reserved, k1, k2, k3, k4, k5, k6]
//! Consumer (ID 2, 2 bytes):  [usage lo, usage hi]
//! Pointer  (ID 3, 5 bytes):  [buttons, x, y, wheel, pan]
//! ```

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::descriptor::{CONSUMER_REPORT_ID, KEYBOARD_REPORT_ID, POINTER_REPORT_ID};

/// Report ID as declared in the report map
pub type ReportId = u8;

/// Boot protocol reports are always framed to this length
pub const BOOT_REPORT_LEN: usize = 8;

pub const KEYBOARD_REPORT_LEN: usize = 8;
pub const CONSUMER_REPORT_LEN: usize = 2;
pub const POINTER_REPORT_LEN: usize = 5;

/// Maximum number of simultaneously reported non-modifier keys
pub const MAX_KEYS: usize = 6;

bitflags! {
    /// Keyboard modifier byte, one bit per usage 0xE0..=0xE7
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const LEFT_CTRL = 1 << 0;
        const LEFT_SHIFT = 1 << 1;
        const LEFT_ALT = 1 << 2;
        const LEFT_GUI = 1 << 3;
        const RIGHT_CTRL = 1 << 4;
        const RIGHT_SHIFT = 1 << 5;
        const RIGHT_ALT = 1 << 6;
        const RIGHT_GUI = 1 << 7;
    }
}

impl Modifiers {
    /// Modifier bit for a keyboard usage, if it is one of 0xE0..=0xE7
    pub fn from_usage(usage: u16) -> Option<Self> {
        match usage {
            0xE0..=0xE7 => Some(Self::from_bits_retain(1 << (usage - 0xE0))),
            _ => None,
        }
    }
}

bitflags! {
    /// Pointer button byte, one bit per button usage 1..=5
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
        const TERTIARY = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

impl Buttons {
    pub fn from_usage(usage: u16) -> Option<Self> {
        match usage {
            1..=5 => Some(Self::from_bits_retain(1 << (usage - 1))),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Framed Report
// ----------------------------------------------------------------------------

/// An input report ready for delivery, tagged with its report ID
#[derive(Clone, PartialEq, Eq)]
pub struct HidReport {
    id: ReportId,
    payload: SmallVec<[u8; BOOT_REPORT_LEN]>,
    /// Keyboard state at the time of encoding, in boot layout
    boot: [u8; BOOT_REPORT_LEN],
}

impl HidReport {
    /// Report whose boot frame is the idle keyboard
    pub fn new(id: ReportId, payload: &[u8]) -> Self {
        Self {
            id,
            payload: SmallVec::from_slice(payload),
            boot: [0; BOOT_REPORT_LEN],
        }
    }

    /// Attach the keyboard state to send in place of this report in Boot mode
    pub fn with_boot_frame(mut self, frame: [u8; BOOT_REPORT_LEN]) -> Self {
        self.boot = frame;
        self
    }

    pub fn id(&self) -> ReportId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ReportId) {
        self.id = id;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload in Report protocol mode
    pub fn to_vec(&self) -> Vec<u8> {
        self.payload.to_vec()
    }

    /// Boot keyboard frame `[modifiers, 0, k1..k6]` sent in Boot mode
    ///
    /// Never derived from a pointer or consumer payload: those reports carry
    /// the keyboard state that was current when they were encoded.
    pub fn to_boot_frame(&self) -> [u8; BOOT_REPORT_LEN] {
        self.boot
    }
}

impl fmt::Debug for HidReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HidReport({}, {})", self.id, hex::encode(&self.payload))
    }
}

// ----------------------------------------------------------------------------
// Typed Reports
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: Modifiers,
    /// Key usages ascending, unused slots zero
    pub keys: [u8; MAX_KEYS],
}

impl KeyboardReport {
    pub fn to_boot_frame(&self) -> [u8; BOOT_REPORT_LEN] {
        let mut frame = [0u8; BOOT_REPORT_LEN];
        frame[0] = self.modifiers.bits();
        frame[2..].copy_from_slice(&self.keys);
        frame
    }

    pub fn to_report(&self) -> HidReport {
        let frame = self.to_boot_frame();
        HidReport::new(KEYBOARD_REPORT_ID, &frame[..KEYBOARD_REPORT_LEN]).with_boot_frame(frame)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Active consumer usage, zero when released
    pub usage: u16,
}

impl ConsumerReport {
    pub fn to_report(&self) -> HidReport {
        HidReport::new(CONSUMER_REPORT_ID, &self.usage.to_le_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerReport {
    pub buttons: Buttons,
    pub x: i8,
    pub y: i8,
    pub wheel: i8,
    pub pan: i8,
}

impl PointerReport {
    pub fn to_report(&self) -> HidReport {
        HidReport::new(
            POINTER_REPORT_ID,
            &[
                self.buttons.bits(),
                self.x as u8,
                self.y as u8,
                self.wheel as u8,
                self.pan as u8,
            ],
        )
    }
}
