use std::time::SystemTime;

use uuid::Uuid;

use super::advertisement::AdvertisementData;

/// A platform-specific device identifier, the MAC address string on Android.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub(crate) String);

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Link state of a connection, as reported by the native stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Power state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

/// Snapshot of what the host platform currently allows.
///
/// Read from [crate::NativeStack::platform_state] on every attempt; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformState {
    pub ble_supported: bool,
    pub location_permission_granted: bool,
    pub adapter: AdapterState,
    /// Whether this platform version needs the location service on for scanning.
    pub location_service_required: bool,
    pub location_service_enabled: bool,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            ble_supported: true,
            location_permission_granted: true,
            adapter: AdapterState::On,
            location_service_required: false,
            location_service_enabled: true,
        }
    }
}

/// What a precondition check is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Connect,
    Scan,
}

/// Identifies a characteristic within the remote GATT database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicId {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicId {
    pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// The descriptor with the given [Uuid] under this characteristic.
    pub const fn descriptor(self, descriptor: Uuid) -> DescriptorId {
        DescriptorId {
            characteristic: self,
            descriptor,
        }
    }
}

/// Identifies a descriptor within the remote GATT database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorId {
    pub characteristic: CharacteristicId,
    pub descriptor: Uuid,
}

/// How a characteristic value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteType {
    #[default]
    WithResponse,
    WithoutResponse,
    Signed,
}

/// Whether the peripheral should send notifications or indications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotifyMode {
    #[default]
    Notify,
    Indicate,
}

impl NotifyMode {
    /// The value written to the client characteristic configuration descriptor.
    pub fn cccd_value(self) -> [u8; 2] {
        match self {
            NotifyMode::Notify => [0x01, 0x00],
            NotifyMode::Indicate => [0x02, 0x00],
        }
    }
}

/// Characteristic properties bit set, as defined in the Bluetooth Core Specification,
/// Vol 3, Part G, §3.3.1.1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    pub fn from_bits(bits: u32) -> Self {
        CharacteristicProperties {
            broadcast: (bits & (1 << 0)) != 0,
            read: (bits & (1 << 1)) != 0,
            write_without_response: (bits & (1 << 2)) != 0,
            write: (bits & (1 << 3)) != 0,
            notify: (bits & (1 << 4)) != 0,
            indicate: (bits & (1 << 5)) != 0,
            authenticated_signed_writes: (bits & (1 << 6)) != 0,
            extended_properties: (bits & (1 << 7)) != 0,
        }
    }

    pub fn to_bits(self) -> u32 {
        u32::from(self.broadcast)
            | (u32::from(self.read) << 1)
            | (u32::from(self.write_without_response) << 2)
            | (u32::from(self.write) << 3)
            | (u32::from(self.notify) << 4)
            | (u32::from(self.indicate) << 5)
            | (u32::from(self.authenticated_signed_writes) << 6)
            | (u32::from(self.extended_properties) << 7)
    }
}

/// A discovered characteristic and its descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Uuid>,
}

/// A discovered service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<CharacteristicInfo>,
    pub included_services: Vec<Uuid>,
}

/// One advertisement observed while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanResult {
    pub device: DeviceId,
    pub advertisement: AdvertisementData,
    /// The raw advertisement (and scan response) payload.
    pub raw: Vec<u8>,
    pub rssi: i16,
    pub timestamp: SystemTime,
}

impl ScanResult {
    /// Builds a scan result from the raw AD structures reported by the native stack.
    pub fn from_raw(device: DeviceId, raw: Vec<u8>, rssi: i16, timestamp: SystemTime) -> Self {
        Self {
            device,
            advertisement: AdvertisementData::parse(&raw),
            raw,
            rssi,
            timestamp,
        }
    }
}
