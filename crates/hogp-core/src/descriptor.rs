//! HID report descriptor (Report Map) modelling and validation
//!
//! The descriptor is the immutable byte sequence served through the Report Map
//! characteristic. It is built once at startup, validated, and never mutated.
//! Parsing follows the HID 1.11 short-item encoding: a prefix byte carrying
//! `bSize`, `bType` and `bTag`, followed by 0, 1, 2 or 4 payload bytes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::DescriptorError;

// ----------------------------------------------------------------------------
// Usage Pages
// ----------------------------------------------------------------------------

pub const PAGE_GENERIC_DESKTOP: u16 = 0x01;
pub const PAGE_KEYBOARD: u16 = 0x07;
pub const PAGE_LED: u16 = 0x08;
pub const PAGE_BUTTON: u16 = 0x09;
pub const PAGE_CONSUMER: u16 = 0x0C;

/// Usage pages this bridge knows how to size and encode
const KNOWN_USAGE_PAGES: [u16; 5] = [
    PAGE_GENERIC_DESKTOP,
    PAGE_KEYBOARD,
    PAGE_LED,
    PAGE_BUTTON,
    PAGE_CONSUMER,
];

pub const USAGE_X: u32 = (PAGE_GENERIC_DESKTOP as u32) << 16 | 0x30;
pub const USAGE_Y: u32 = (PAGE_GENERIC_DESKTOP as u32) << 16 | 0x31;
pub const USAGE_WHEEL: u32 = (PAGE_GENERIC_DESKTOP as u32) << 16 | 0x38;
pub const USAGE_AC_PAN: u32 = (PAGE_CONSUMER as u32) << 16 | 0x0238;

// ----------------------------------------------------------------------------
// Built-in Report Map
// ----------------------------------------------------------------------------

/// Report ID of the keyboard input report
pub const KEYBOARD_REPORT_ID: u8 = 1;
/// Report ID of the consumer control input report
pub const CONSUMER_REPORT_ID: u8 = 2;
/// Report ID of the pointer input report
pub const POINTER_REPORT_ID: u8 = 3;

#[rustfmt::skip]
const COMBINED_REPORT_MAP: &[u8] = &[
    // Keyboard
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xA1, 0x01,       // Collection (Application)
    0x85, KEYBOARD_REPORT_ID,
    0x05, 0x07,       //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0,       //   Usage Minimum (Left Control)
    0x29, 0xE7,       //   Usage Maximum (Right GUI)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data, Variable, Absolute) modifiers
    0x95, 0x01,       //   Report Count (1)
    0x75, 0x08,       //   Report Size (8)
    0x81, 0x01,       //   Input (Constant) reserved
    0x95, 0x05,       //   Report Count (5)
    0x75, 0x01,       //   Report Size (1)
    0x05, 0x08,       //   Usage Page (LEDs)
    0x19, 0x01,       //   Usage Minimum (Num Lock)
    0x29, 0x05,       //   Usage Maximum (Kana)
    0x91, 0x02,       //   Output (Data, Variable, Absolute)
    0x95, 0x01,       //   Report Count (1)
    0x75, 0x03,       //   Report Size (3)
    0x91, 0x01,       //   Output (Constant)
    0x95, 0x06,       //   Report Count (6)
    0x75, 0x08,       //   Report Size (8)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x65,       //   Logical Maximum (101)
    0x05, 0x07,       //   Usage Page (Keyboard/Keypad)
    0x19, 0x00,       //   Usage Minimum (0)
    0x29, 0x65,       //   Usage Maximum (101)
    0x81, 0x00,       //   Input (Data, Array) key slots
    0xC0,             // End Collection

    // Consumer control
    0x05, 0x0C,       // Usage Page (Consumer)
    0x09, 0x01,       // Usage (Consumer Control)
    0xA1, 0x01,       // Collection (Application)
    0x85, CONSUMER_REPORT_ID,
    0x75, 0x10,       //   Report Size (16)
    0x95, 0x01,       //   Report Count (1)
    0x15, 0x01,       //   Logical Minimum (1)
    0x26, 0xFF, 0x07, //   Logical Maximum (2047)
    0x19, 0x01,       //   Usage Minimum (1)
    0x2A, 0xFF, 0x07, //   Usage Maximum (2047)
    0x81, 0x00,       //   Input (Data, Array)
    0xC0,             // End Collection

    // Pointer
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x02,       // Usage (Mouse)
    0xA1, 0x01,       // Collection (Application)
    0x85, POINTER_REPORT_ID,
    0x09, 0x01,       //   Usage (Pointer)
    0xA1, 0x00,       //   Collection (Physical)
    0x05, 0x09,       //     Usage Page (Button)
    0x19, 0x01,       //     Usage Minimum (1)
    0x29, 0x05,       //     Usage Maximum (5)
    0x15, 0x00,       //     Logical Minimum (0)
    0x25, 0x01,       //     Logical Maximum (1)
    0x95, 0x05,       //     Report Count (5)
    0x75, 0x01,       //     Report Size (1)
    0x81, 0x02,       //     Input (Data, Variable, Absolute)
    0x95, 0x01,       //     Report Count (1)
    0x75, 0x03,       //     Report Size (3)
    0x81, 0x01,       //     Input (Constant) padding
    0x05, 0x01,       //     Usage Page (Generic Desktop)
    0x09, 0x30,       //     Usage (X)
    0x09, 0x31,       //     Usage (Y)
    0x09, 0x38,       //     Usage (Wheel)
    0x15, 0x81,       //     Logical Minimum (-127)
    0x25, 0x7F,       //     Logical Maximum (127)
    0x75, 0x08,       //     Report Size (8)
    0x95, 0x03,       //     Report Count (3)
    0x81, 0x06,       //     Input (Data, Variable, Relative)
    0x05, 0x0C,       //     Usage Page (Consumer)
    0x0A, 0x38, 0x02, //     Usage (AC Pan)
    0x95, 0x01,       //     Report Count (1)
    0x81, 0x06,       //     Input (Data, Variable, Relative)
    0xC0,             //   End Collection
    0xC0,             // End Collection
];

// ----------------------------------------------------------------------------
// Items
// ----------------------------------------------------------------------------

/// Decoded short-item tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    // Main
    Input,
    Output,
    Feature,
    Collection,
    EndCollection,
    // Global
    UsagePage,
    LogicalMinimum,
    LogicalMaximum,
    PhysicalMinimum,
    PhysicalMaximum,
    UnitExponent,
    Unit,
    ReportSize,
    ReportId,
    ReportCount,
    Push,
    Pop,
    // Local
    Usage,
    UsageMinimum,
    UsageMaximum,
    /// Any other local item (designators, strings, delimiters)
    OtherLocal(u8),
}

impl Tag {
    fn decode(item_type: u8, tag: u8) -> Option<Self> {
        let tag = match (item_type, tag) {
            (0, 0x8) => Tag::Input,
            (0, 0x9) => Tag::Output,
            (0, 0xB) => Tag::Feature,
            (0, 0xA) => Tag::Collection,
            (0, 0xC) => Tag::EndCollection,
            (1, 0x0) => Tag::UsagePage,
            (1, 0x1) => Tag::LogicalMinimum,
            (1, 0x2) => Tag::LogicalMaximum,
            (1, 0x3) => Tag::PhysicalMinimum,
            (1, 0x4) => Tag::PhysicalMaximum,
            (1, 0x5) => Tag::UnitExponent,
            (1, 0x6) => Tag::Unit,
            (1, 0x7) => Tag::ReportSize,
            (1, 0x8) => Tag::ReportId,
            (1, 0x9) => Tag::ReportCount,
            (1, 0xA) => Tag::Push,
            (1, 0xB) => Tag::Pop,
            (2, 0x0) => Tag::Usage,
            (2, 0x1) => Tag::UsageMinimum,
            (2, 0x2) => Tag::UsageMaximum,
            (2, other) => Tag::OtherLocal(other),
            _ => return None,
        };
        Some(tag)
    }

    /// Whether the tag is a main item (ends the current local state)
    pub fn is_main(self) -> bool {
        matches!(
            self,
            Tag::Input | Tag::Output | Tag::Feature | Tag::Collection | Tag::EndCollection
        )
    }
}

/// A single short item of the descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    /// Byte offset of the prefix within the descriptor
    pub offset: usize,
    pub tag: Tag,
    /// Payload length in bytes (0, 1, 2 or 4)
    pub size: usize,
    /// Payload, little-endian, zero-extended
    pub data: u32,
}

impl Item {
    /// Payload interpreted as a two's complement value of `size` bytes
    pub fn signed(&self) -> i32 {
        match self.size {
            1 => self.data as u8 as i8 as i32,
            2 => self.data as u16 as i16 as i32,
            _ => self.data as i32,
        }
    }
}

/// Iterator over the items of a descriptor, yielding an error on truncation
pub struct Items<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<Item, DescriptorError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset;
        let prefix = *self.bytes.get(offset)?;

        if prefix == 0xFE {
            self.offset = self.bytes.len();
            return Some(Err(DescriptorError::malformed(
                offset,
                "long items are not supported",
            )));
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let item_type = (prefix >> 2) & 0x03;
        let tag_bits = prefix >> 4;

        let payload = match self.bytes.get(offset + 1..offset + 1 + size) {
            Some(payload) => payload,
            None => {
                self.offset = self.bytes.len();
                return Some(Err(DescriptorError::malformed(
                    offset,
                    format!("item payload of {} bytes is truncated", size),
                )));
            }
        };
        self.offset = offset + 1 + size;

        let Some(tag) = Tag::decode(item_type, tag_bits) else {
            return Some(Err(DescriptorError::malformed(
                offset,
                format!("unknown item prefix {:#04x}", prefix),
            )));
        };

        let data = payload
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | *byte as u32);

        Some(Ok(Item {
            offset,
            tag,
            size,
            data,
        }))
    }
}

// ----------------------------------------------------------------------------
// Layout
// ----------------------------------------------------------------------------

/// HID report types as carried in the Report Reference descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReportType {
    Input = 0x01,
    Output = 0x02,
    Feature = 0x03,
}

/// A main item field as laid out inside its report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportField {
    pub report_type: ReportType,
    pub report_id: u8,
    /// Bit offset of the field within the report payload
    pub bit_offset: usize,
    pub report_size: u32,
    pub report_count: u32,
    /// Main item data (constant / variable / relative flags)
    pub flags: u32,
    /// Extended usages (`page << 16 | id`) listed before the main item
    pub usages: Vec<u32>,
    /// Extended usage range, if a minimum/maximum pair was declared
    pub usage_range: Option<(u32, u32)>,
    pub logical_min: i32,
    pub logical_max: i32,
}

impl ReportField {
    pub fn is_constant(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn is_variable(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn is_relative(&self) -> bool {
        self.flags & 0x04 != 0
    }

    pub fn bit_len(&self) -> usize {
        self.report_size as usize * self.report_count as usize
    }

    /// Whether the field can carry the given extended usage
    pub fn covers(&self, usage: u32) -> bool {
        self.usages.contains(&usage)
            || self
                .usage_range
                .map_or(false, |(min, max)| (min..=max).contains(&usage))
    }

    /// Usage page of the field, taken from its first declared usage
    pub fn usage_page(&self) -> Option<u16> {
        self.usages
            .first()
            .copied()
            .or(self.usage_range.map(|(min, _)| min))
            .map(|usage| (usage >> 16) as u16)
    }
}

/// Result of walking the whole descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportLayout {
    pub fields: Vec<ReportField>,
    bits: BTreeMap<(ReportType, u8), usize>,
}

impl ReportLayout {
    /// Payload length in bytes of the given report
    pub fn length(&self, report_type: ReportType, report_id: u8) -> Option<usize> {
        self.bits.get(&(report_type, report_id)).map(|bits| bits / 8)
    }

    /// Report IDs declared for the given report type, ascending
    pub fn report_ids(&self, report_type: ReportType) -> Vec<u8> {
        self.bits
            .keys()
            .filter(|(ty, _)| *ty == report_type)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Data fields of one report, in declaration order
    pub fn fields_of(
        &self,
        report_type: ReportType,
        report_id: u8,
    ) -> impl Iterator<Item = &ReportField> {
        self.fields.iter().filter(move |field| {
            field.report_type == report_type && field.report_id == report_id && !field.is_constant()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GlobalState {
    usage_page: u16,
    logical_min: i32,
    logical_max: i32,
    report_size: Option<u32>,
    report_count: Option<u32>,
    report_id: u8,
}

#[derive(Debug, Default)]
struct LocalState {
    usages: Vec<u32>,
    usage_min: Option<u32>,
    usage_max: Option<u32>,
}

impl LocalState {
    fn extended(page: u16, item: &Item) -> u32 {
        if item.size == 4 {
            item.data
        } else {
            (page as u32) << 16 | item.data
        }
    }
}

// ----------------------------------------------------------------------------
// Report Descriptor
// ----------------------------------------------------------------------------

/// Immutable HID report descriptor
#[derive(Clone, PartialEq, Eq)]
pub struct ReportDescriptor {
    bytes: Vec<u8>,
}

impl ReportDescriptor {
    /// Wrap raw descriptor bytes. Call [`validate`](Self::validate) before use.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The combined keyboard + consumer control + pointer report map
    pub fn combined() -> Self {
        Self::new(COMBINED_REPORT_MAP)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn items(&self) -> Items<'_> {
        Items {
            bytes: &self.bytes,
            offset: 0,
        }
    }

    /// Check structural well-formedness
    pub fn validate(&self) -> Result<(), DescriptorError> {
        self.layout().map(|_| ())
    }

    /// Input report payload length in bytes, excluding the report ID prefix
    pub fn report_length(&self, report_id: u8) -> Option<usize> {
        self.layout().ok()?.length(ReportType::Input, report_id)
    }

    /// Input report IDs declared by the descriptor
    pub fn report_ids(&self) -> Vec<u8> {
        self.layout()
            .map(|layout| layout.report_ids(ReportType::Input))
            .unwrap_or_default()
    }

    /// Walk the descriptor and compute every report's field layout
    pub fn layout(&self) -> Result<ReportLayout, DescriptorError> {
        if self.bytes.is_empty() {
            return Err(DescriptorError::malformed(0, "descriptor is empty"));
        }

        let mut layout = ReportLayout::default();
        let mut global = GlobalState::default();
        let mut stack: Vec<GlobalState> = Vec::new();
        let mut local = LocalState::default();
        let mut collections: Vec<usize> = Vec::new();
        let mut uses_report_ids = false;

        for item in self.items() {
            let item = item?;
            match item.tag {
                Tag::UsagePage => {
                    let page = item.data as u16;
                    if !KNOWN_USAGE_PAGES.contains(&page) {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            format!("undefined usage page {:#06x}", page),
                        ));
                    }
                    global.usage_page = page;
                }
                Tag::LogicalMinimum => global.logical_min = item.signed(),
                Tag::LogicalMaximum => global.logical_max = item.signed(),
                Tag::ReportSize => global.report_size = Some(item.data),
                Tag::ReportCount => global.report_count = Some(item.data),
                Tag::ReportId => {
                    if item.data == 0 || item.data > 0xFF {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            format!("report ID {} is reserved or out of range", item.data),
                        ));
                    }
                    global.report_id = item.data as u8;
                    uses_report_ids = true;
                }
                Tag::Push => stack.push(global),
                Tag::Pop => {
                    global = stack.pop().ok_or_else(|| {
                        DescriptorError::malformed(item.offset, "pop without matching push")
                    })?;
                }
                Tag::Usage => {
                    if item.size == 4 {
                        let page = (item.data >> 16) as u16;
                        if !KNOWN_USAGE_PAGES.contains(&page) {
                            return Err(DescriptorError::malformed(
                                item.offset,
                                format!("undefined usage page {:#06x}", page),
                            ));
                        }
                    }
                    local
                        .usages
                        .push(LocalState::extended(global.usage_page, &item));
                }
                Tag::UsageMinimum => {
                    local.usage_min = Some(LocalState::extended(global.usage_page, &item))
                }
                Tag::UsageMaximum => {
                    local.usage_max = Some(LocalState::extended(global.usage_page, &item))
                }
                Tag::Collection => collections.push(item.offset),
                Tag::EndCollection => {
                    if collections.pop().is_none() {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            "end collection without matching collection",
                        ));
                    }
                }
                Tag::Input | Tag::Output | Tag::Feature => {
                    if collections.is_empty() {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            "main item outside of an application collection",
                        ));
                    }
                    if uses_report_ids && global.report_id == 0 {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            "main item declared before the first report ID",
                        ));
                    }
                    let (Some(report_size), Some(report_count)) =
                        (global.report_size, global.report_count)
                    else {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            "main item without report size and count",
                        ));
                    };
                    if report_size == 0 || report_size > 32 {
                        return Err(DescriptorError::malformed(
                            item.offset,
                            format!("report size {} is out of range", report_size),
                        ));
                    }

                    let report_type = match item.tag {
                        Tag::Input => ReportType::Input,
                        Tag::Output => ReportType::Output,
                        _ => ReportType::Feature,
                    };
                    let bits = layout
                        .bits
                        .entry((report_type, global.report_id))
                        .or_default();
                    let usage_range = match (local.usage_min, local.usage_max) {
                        (Some(min), Some(max)) if min <= max => Some((min, max)),
                        (None, None) => None,
                        _ => {
                            return Err(DescriptorError::malformed(
                                item.offset,
                                "unpaired or inverted usage minimum/maximum",
                            ))
                        }
                    };

                    layout.fields.push(ReportField {
                        report_type,
                        report_id: global.report_id,
                        bit_offset: *bits,
                        report_size,
                        report_count,
                        flags: item.data,
                        usages: std::mem::take(&mut local.usages),
                        usage_range,
                        logical_min: global.logical_min,
                        logical_max: global.logical_max,
                    });
                    *bits += report_size as usize * report_count as usize;
                }
                Tag::PhysicalMinimum
                | Tag::PhysicalMaximum
                | Tag::UnitExponent
                | Tag::Unit
                | Tag::OtherLocal(_) => {}
            }

            if item.tag.is_main() {
                local = LocalState::default();
            }
        }

        if let Some(open) = collections.last() {
            return Err(DescriptorError::malformed(
                *open,
                "collection is never closed",
            ));
        }

        for ((report_type, report_id), bits) in &layout.bits {
            if bits % 8 != 0 {
                return Err(DescriptorError::malformed(
                    self.bytes.len(),
                    format!(
                        "{:?} report {} is {} bits, not byte aligned",
                        report_type, report_id, bits
                    ),
                ));
            }
        }

        if layout.bits.is_empty() {
            return Err(DescriptorError::malformed(
                self.bytes.len(),
                "descriptor declares no reports",
            ));
        }

        Ok(layout)
    }
}

impl Default for ReportDescriptor {
    fn default() -> Self {
        Self::combined()
    }
}

impl fmt::Debug for ReportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportDescriptor")
            .field("len", &self.bytes.len())
            .field("bytes", &hex::encode(&self.bytes))
            .finish()
    }
}

impl AsRef<[u8]> for ReportDescriptor {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
