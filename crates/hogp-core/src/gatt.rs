//! GATT service layout of a HID-over-GATT peripheral
//!
//! Describes the HID and Device Information services, their characteristics,
//! flags and static values. The layout is platform independent; transports
//! translate it into their stack's registration calls.

use std::fmt;

use bitflags::bitflags;
use uuid::Uuid;

use crate::config::{BridgeConfig, ReportSecurity};
use crate::descriptor::{ReportDescriptor, ReportType};
use crate::error::DescriptorError;
use crate::report::ReportId;

// ----------------------------------------------------------------------------
// Assigned Numbers
// ----------------------------------------------------------------------------

pub const DEVICE_INFORMATION_SERVICE: u16 = 0x180A;
pub const HID_SERVICE: u16 = 0x1812;

pub const MANUFACTURER_NAME: u16 = 0x2A29;
pub const MODEL_NUMBER: u16 = 0x2A24;
pub const FIRMWARE_REVISION: u16 = 0x2A28;
pub const PNP_ID: u16 = 0x2A50;

pub const PROTOCOL_MODE: u16 = 0x2A4E;
pub const HID_INFORMATION: u16 = 0x2A4A;
pub const HID_CONTROL_POINT: u16 = 0x2A4C;
pub const REPORT_MAP: u16 = 0x2A4B;
pub const REPORT: u16 = 0x2A4D;

pub const REPORT_REFERENCE: u16 = 0x2908;
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: u16 = 0x2902;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub const fn uuid16(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | (short as u128) << 96)
}

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Characteristics exposed by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharacteristicId {
    ManufacturerName,
    ModelNumber,
    FirmwareRevision,
    PnpId,
    ProtocolMode,
    HidInformation,
    ControlPoint,
    ReportMap,
    /// Input report with the given report ID
    Report(ReportId),
}

impl CharacteristicId {
    /// 16-bit assigned number of the characteristic type
    pub fn assigned_number(&self) -> u16 {
        match self {
            CharacteristicId::ManufacturerName => MANUFACTURER_NAME,
            CharacteristicId::ModelNumber => MODEL_NUMBER,
            CharacteristicId::FirmwareRevision => FIRMWARE_REVISION,
            CharacteristicId::PnpId => PNP_ID,
            CharacteristicId::ProtocolMode => PROTOCOL_MODE,
            CharacteristicId::HidInformation => HID_INFORMATION,
            CharacteristicId::ControlPoint => HID_CONTROL_POINT,
            CharacteristicId::ReportMap => REPORT_MAP,
            CharacteristicId::Report(_) => REPORT,
        }
    }

    pub fn uuid(&self) -> Uuid {
        uuid16(self.assigned_number())
    }

    pub fn is_report(&self) -> bool {
        matches!(self, CharacteristicId::Report(_))
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacteristicId::Report(id) => write!(f, "Report({})", id),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Descriptors exposed under a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    ReportReference,
    ClientCharacteristicConfiguration,
}

impl DescriptorKind {
    pub fn uuid(&self) -> Uuid {
        match self {
            DescriptorKind::ReportReference => uuid16(REPORT_REFERENCE),
            DescriptorKind::ClientCharacteristicConfiguration => {
                uuid16(CLIENT_CHARACTERISTIC_CONFIGURATION)
            }
        }
    }
}

bitflags! {
    /// GATT characteristic properties and access requirements
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicFlags: u16 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const WRITE_WITHOUT_RESPONSE = 1 << 2;
        const NOTIFY = 1 << 3;
        const INDICATE = 1 << 4;
        /// Reads require an encrypted link
        const ENCRYPT_READ = 1 << 5;
        /// Reads require an encrypted, authenticated link
        const SECURE_READ = 1 << 6;
    }
}

impl CharacteristicFlags {
    pub fn is_readable(self) -> bool {
        self.intersects(Self::READ | Self::ENCRYPT_READ | Self::SECURE_READ)
    }

    pub fn is_writable(self) -> bool {
        self.intersects(Self::WRITE | Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn is_notifiable(self) -> bool {
        self.intersects(Self::NOTIFY | Self::INDICATE)
    }
}

// ----------------------------------------------------------------------------
// Layout
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDef {
    pub kind: DescriptorKind,
    /// Static value, `None` when the stack manages the descriptor
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub id: CharacteristicId,
    pub flags: CharacteristicFlags,
    /// Static value, `None` for characteristics served from bridge state
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<DescriptorDef>,
}

impl CharacteristicDef {
    fn fixed(id: CharacteristicId, flags: CharacteristicFlags, value: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            flags,
            value: Some(value.into()),
            descriptors: Vec::new(),
        }
    }

    fn dynamic(id: CharacteristicId, flags: CharacteristicFlags) -> Self {
        Self {
            id,
            flags,
            value: None,
            descriptors: Vec::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.id.uuid()
    }

    pub fn descriptor(&self, kind: DescriptorKind) -> Option<&DescriptorDef> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub assigned_number: u16,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDef>,
}

impl ServiceDef {
    pub fn uuid(&self) -> Uuid {
        uuid16(self.assigned_number)
    }
}

/// Complete GATT application: Device Information and HID services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattLayout {
    services: Vec<ServiceDef>,
}

impl GattLayout {
    /// Build the layout for a validated report map
    pub fn new(descriptor: &ReportDescriptor, config: &BridgeConfig) -> Result<Self, DescriptorError> {
        let layout = descriptor.layout()?;
        let info = &config.device_info;

        let device_information = ServiceDef {
            assigned_number: DEVICE_INFORMATION_SERVICE,
            primary: true,
            characteristics: vec![
                CharacteristicDef::fixed(
                    CharacteristicId::ManufacturerName,
                    CharacteristicFlags::READ,
                    info.manufacturer.as_bytes(),
                ),
                CharacteristicDef::fixed(
                    CharacteristicId::ModelNumber,
                    CharacteristicFlags::READ,
                    info.model.as_bytes(),
                ),
                CharacteristicDef::fixed(
                    CharacteristicId::FirmwareRevision,
                    CharacteristicFlags::READ,
                    info.firmware_revision.as_bytes(),
                ),
                CharacteristicDef::fixed(
                    CharacteristicId::PnpId,
                    CharacteristicFlags::READ,
                    info.pnp_id.to_bytes(),
                ),
            ],
        };

        let report_read = match config.report_security {
            ReportSecurity::Open => CharacteristicFlags::READ,
            ReportSecurity::Encrypted => CharacteristicFlags::ENCRYPT_READ,
            ReportSecurity::Secure => CharacteristicFlags::SECURE_READ,
        };

        let mut hid = vec![
            CharacteristicDef::dynamic(
                CharacteristicId::ProtocolMode,
                CharacteristicFlags::READ | CharacteristicFlags::WRITE_WITHOUT_RESPONSE,
            ),
            CharacteristicDef::fixed(
                CharacteristicId::HidInformation,
                CharacteristicFlags::READ,
                config.hid_information.to_bytes(),
            ),
            CharacteristicDef::dynamic(
                CharacteristicId::ControlPoint,
                CharacteristicFlags::WRITE_WITHOUT_RESPONSE,
            ),
            CharacteristicDef::fixed(
                CharacteristicId::ReportMap,
                CharacteristicFlags::READ,
                descriptor.as_bytes(),
            ),
        ];

        for report_id in layout.report_ids(ReportType::Input) {
            hid.push(CharacteristicDef {
                id: CharacteristicId::Report(report_id),
                flags: report_read | CharacteristicFlags::NOTIFY,
                value: None,
                descriptors: vec![
                    DescriptorDef {
                        kind: DescriptorKind::ReportReference,
                        value: Some(vec![report_id, ReportType::Input as u8]),
                    },
                    DescriptorDef {
                        kind: DescriptorKind::ClientCharacteristicConfiguration,
                        value: None,
                    },
                ],
            });
        }

        Ok(Self {
            services: vec![
                device_information,
                ServiceDef {
                    assigned_number: HID_SERVICE,
                    primary: true,
                    characteristics: hid,
                },
            ],
        })
    }

    pub fn services(&self) -> &[ServiceDef] {
        &self.services
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicDef> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    pub fn characteristic(&self, id: CharacteristicId) -> Option<&CharacteristicDef> {
        self.characteristics().find(|c| c.id == id)
    }

    pub fn static_value(&self, id: CharacteristicId) -> Option<&[u8]> {
        self.characteristic(id)?.value.as_deref()
    }

    /// Report IDs exposed as Report characteristics, ascending
    pub fn report_ids(&self) -> Vec<ReportId> {
        self.characteristics()
            .filter_map(|c| match c.id {
                CharacteristicId::Report(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Service UUIDs to include in advertisements
    pub fn advertised_services(&self) -> Vec<Uuid> {
        vec![uuid16(HID_SERVICE)]
    }
}
