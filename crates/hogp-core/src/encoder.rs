//! Input event to HID report translation
//!
//! The encoder owns all per-device input state (held keys, pressed buttons,
//! the active consumer usage) and is driven one event at a time by the input
//! flow. It never touches the characteristic store or the transport.

use smallvec::{smallvec, SmallVec};
use tracing::trace;

use crate::descriptor::{
    ReportDescriptor, ReportLayout, ReportType, PAGE_BUTTON, PAGE_CONSUMER, PAGE_KEYBOARD,
    USAGE_AC_PAN, USAGE_WHEEL, USAGE_X, USAGE_Y,
};
use crate::error::{DescriptorError, EncodeError};
use crate::event::{axis, EventKind, InputEvent, Usage};
use crate::keys::KeyState;
use crate::report::{
    Buttons, ConsumerReport, HidReport, PointerReport, ReportId, CONSUMER_REPORT_LEN,
    KEYBOARD_REPORT_LEN, POINTER_REPORT_LEN,
};

/// Reports produced by a single event
pub type Reports = SmallVec<[HidReport; 1]>;

// ----------------------------------------------------------------------------
// Usage Table
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyboardUsages {
    report_id: ReportId,
    key_max: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConsumerUsages {
    report_id: ReportId,
    min: u16,
    max: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PointerUsages {
    report_id: ReportId,
    buttons: u8,
    axis_min: i32,
    axis_max: i32,
    wheel: bool,
    pan: bool,
}

/// What the report map can express, derived from its field layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsageTable {
    keyboard: Option<KeyboardUsages>,
    consumer: Option<ConsumerUsages>,
    pointer: Option<PointerUsages>,
}

impl UsageTable {
    fn from_layout(layout: &ReportLayout) -> Result<Self, DescriptorError> {
        let inputs = || {
            layout
                .fields
                .iter()
                .filter(|field| field.report_type == ReportType::Input && !field.is_constant())
        };

        let keyboard = inputs()
            .find(|field| !field.is_variable() && field.usage_page() == Some(PAGE_KEYBOARD))
            .map(|field| KeyboardUsages {
                report_id: field.report_id,
                key_max: field.logical_max.clamp(0, u8::MAX as i32) as u8,
            });

        let consumer = inputs()
            .find(|field| !field.is_variable() && field.usage_page() == Some(PAGE_CONSUMER))
            .map(|field| ConsumerUsages {
                report_id: field.report_id,
                min: field.logical_min.clamp(1, u16::MAX as i32) as u16,
                max: field.logical_max.clamp(0, u16::MAX as i32) as u16,
            });

        let pointer = inputs()
            .find(|field| field.covers(USAGE_X) && field.covers(USAGE_Y))
            .map(|axes| {
                let report_id = axes.report_id;
                let in_report = || inputs().filter(move |field| field.report_id == report_id);
                PointerUsages {
                    report_id,
                    buttons: in_report()
                        .find(|field| field.is_variable() && field.usage_page() == Some(PAGE_BUTTON))
                        .map_or(0, |field| field.report_count.min(5) as u8),
                    axis_min: axes.logical_min.max(i8::MIN as i32 + 1),
                    axis_max: axes.logical_max.min(i8::MAX as i32),
                    wheel: in_report().any(|field| field.covers(USAGE_WHEEL)),
                    pan: in_report().any(|field| field.covers(USAGE_AC_PAN)),
                }
            });

        let expect_len = |report_id: ReportId, expected: usize| {
            match layout.length(ReportType::Input, report_id) {
                Some(len) if len == expected => Ok(()),
                other => Err(DescriptorError::malformed(
                    0,
                    format!(
                        "input report {} is {:?} bytes, encoder frames {}",
                        report_id, other, expected
                    ),
                )),
            }
        };
        if let Some(keyboard) = keyboard {
            expect_len(keyboard.report_id, KEYBOARD_REPORT_LEN)?;
        }
        if let Some(consumer) = consumer {
            expect_len(consumer.report_id, CONSUMER_REPORT_LEN)?;
        }
        if let Some(pointer) = pointer {
            expect_len(pointer.report_id, POINTER_REPORT_LEN)?;
        }

        if keyboard.is_none() && consumer.is_none() && pointer.is_none() {
            return Err(DescriptorError::malformed(
                0,
                "report map declares no keyboard, consumer or pointer input",
            ));
        }

        Ok(Self {
            keyboard,
            consumer,
            pointer,
        })
    }
}

// ----------------------------------------------------------------------------
// Report Encoder
// ----------------------------------------------------------------------------

/// Stateful translator from [`InputEvent`]s to [`HidReport`]s
#[derive(Debug, Clone)]
pub struct ReportEncoder {
    usages: UsageTable,
    keys: KeyState,
    buttons: Buttons,
    /// Held consumer usages in press order; the newest is reported
    consumer: SmallVec<[u16; 4]>,
}

impl ReportEncoder {
    /// Build an encoder for the reports declared by `descriptor`
    pub fn new(descriptor: &ReportDescriptor) -> Result<Self, DescriptorError> {
        let layout = descriptor.layout()?;
        Ok(Self {
            usages: UsageTable::from_layout(&layout)?,
            keys: KeyState::new(),
            buttons: Buttons::empty(),
            consumer: SmallVec::new(),
        })
    }

    pub fn key_state(&self) -> &KeyState {
        &self.keys
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    /// Translate one event into the reports it produces
    pub fn encode(&mut self, event: &InputEvent) -> Result<Reports, EncodeError> {
        let unsupported = || EncodeError::UnsupportedEvent {
            kind: event.kind,
            code: event.code,
        };

        let report = match event.kind {
            EventKind::KeyPress | EventKind::KeyRelease => {
                let keyboard = self.usages.keyboard.ok_or_else(unsupported)?;
                let usage = Usage::from_code(event.code, PAGE_KEYBOARD);
                let valid = usage.page == PAGE_KEYBOARD
                    && ((1..=keyboard.key_max as u16).contains(&usage.id)
                        || (0xE0..=0xE7).contains(&usage.id));
                if !valid {
                    return Err(unsupported());
                }

                if event.kind == EventKind::KeyPress {
                    self.keys.press(usage.id as u8);
                } else {
                    self.keys.release(usage.id as u8);
                }
                let mut report = self.keys.report().to_report();
                report.set_id(keyboard.report_id);
                report
            }

            EventKind::ButtonPress | EventKind::ButtonRelease => {
                let usage = Usage::from_code(event.code, PAGE_BUTTON);
                match usage.page {
                    PAGE_BUTTON => {
                        let pointer = self.usages.pointer.ok_or_else(unsupported)?;
                        if usage.id == 0 || usage.id > pointer.buttons as u16 {
                            return Err(unsupported());
                        }
                        let bit = Buttons::from_usage(usage.id).ok_or_else(unsupported)?;
                        self.buttons.set(bit, event.kind == EventKind::ButtonPress);
                        self.pointer_report(pointer, PointerReport::default())
                    }
                    PAGE_CONSUMER => {
                        let consumer = self.usages.consumer.ok_or_else(unsupported)?;
                        if !(consumer.min..=consumer.max).contains(&usage.id) {
                            return Err(unsupported());
                        }
                        if event.kind == EventKind::ButtonPress {
                            if !self.consumer.contains(&usage.id) {
                                self.consumer.push(usage.id);
                            }
                        } else {
                            self.consumer.retain(|held| *held != usage.id);
                        }
                        let mut report = ConsumerReport {
                            usage: self.consumer(),
                        }
                        .to_report();
                        report.set_id(consumer.report_id);
                        report
                    }
                    _ => return Err(unsupported()),
                }
            }

            EventKind::PointerMove => {
                let pointer = self.usages.pointer.ok_or_else(unsupported)?;
                let delta = clamp_axis(event.value, pointer);
                let motion = match event.code {
                    axis::X => PointerReport {
                        x: delta,
                        ..Default::default()
                    },
                    axis::Y => PointerReport {
                        y: delta,
                        ..Default::default()
                    },
                    _ => return Err(unsupported()),
                };
                self.pointer_report(pointer, motion)
            }

            EventKind::Scroll => {
                let pointer = self.usages.pointer.ok_or_else(unsupported)?;
                let delta = clamp_axis(event.value, pointer);
                let motion = match event.code {
                    axis::WHEEL if pointer.wheel => PointerReport {
                        wheel: delta,
                        ..Default::default()
                    },
                    axis::HWHEEL if pointer.pan => PointerReport {
                        pan: delta,
                        ..Default::default()
                    },
                    _ => return Err(unsupported()),
                };
                self.pointer_report(pointer, motion)
            }
        };

        let report = report.with_boot_frame(self.keys.report().to_boot_frame());
        trace!("Encoded {:?} {:#x} as {:?}", event.kind, event.code, report);
        Ok(smallvec![report])
    }

    /// Consumer usage currently reported, zero when none is held
    pub fn consumer(&self) -> u16 {
        self.consumer.last().copied().unwrap_or(0)
    }

    fn pointer_report(&self, pointer: PointerUsages, motion: PointerReport) -> HidReport {
        let mut report = PointerReport {
            buttons: self.buttons,
            ..motion
        }
        .to_report();
        report.set_id(pointer.report_id);
        report
    }
}

fn clamp_axis(value: i32, pointer: PointerUsages) -> i8 {
    value.clamp(pointer.axis_min, pointer.axis_max) as i8
}
