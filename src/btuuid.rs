//! Helpers for Bluetooth SIG assigned 16-bit and 32-bit UUIDs.

use uuid::Uuid;

/// The Bluetooth Base UUID, `00000000-0000-1000-8000-00805F9B34FB`.
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2902);

/// Creates a [Uuid] from a 16-bit Bluetooth SIG assigned number.
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Creates a [Uuid] from a 32-bit Bluetooth SIG assigned number.
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Extension trait for [Uuid] with helper methods for Bluetooth short UUIDs.
pub trait BluetoothUuidExt: private::Sealed {
    fn from_u16(uuid: u16) -> Self;
    fn from_u32(uuid: u32) -> Self;

    /// Creates a [Uuid] from a little-endian byte slice of length 2, 4 or 16.
    fn from_bluetooth_bytes(bytes: &[u8]) -> Option<Self>
    where
        Self: Sized;

    fn is_u16_uuid(&self) -> bool;
    fn is_u32_uuid(&self) -> bool;
    fn try_to_u16(&self) -> Option<u16>;
    fn try_to_u32(&self) -> Option<u32>;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn from_bluetooth_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Self::from_u16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            4 => Some(Self::from_u32(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(bytes);
                Some(Uuid::from_u128(u128::from_le_bytes(buf)))
            }
            _ => None,
        }
    }

    fn is_u16_uuid(&self) -> bool {
        self.try_to_u16().is_some()
    }

    fn is_u32_uuid(&self) -> bool {
        self.try_to_u32().is_some()
    }

    fn try_to_u16(&self) -> Option<u16> {
        self.try_to_u32().and_then(|x| x.try_into().ok())
    }

    fn try_to_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        ((value & BASE_MASK) == BLUETOOTH_BASE_UUID).then_some((value >> 96) as u32)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for uuid::Uuid {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_conversions() {
        let cccd = Uuid::from_u16(0x2902);
        assert_eq!(cccd, CLIENT_CHARACTERISTIC_CONFIGURATION);
        assert_eq!(
            cccd.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(cccd.try_to_u16(), Some(0x2902));

        let long = Uuid::from_u32(0x1234_5678);
        assert!(long.is_u32_uuid());
        assert!(!long.is_u16_uuid());

        let random = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
        assert_eq!(random.try_to_u32(), None);
    }

    #[test]
    fn uuid_from_little_endian_bytes() {
        assert_eq!(
            Uuid::from_bluetooth_bytes(&[0x0d, 0x18]),
            Some(Uuid::from_u16(0x180d))
        );
        let random = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);
        let le = random.as_u128().to_le_bytes();
        assert_eq!(Uuid::from_bluetooth_bytes(&le), Some(random));
        assert_eq!(Uuid::from_bluetooth_bytes(&[1, 2, 3]), None);
    }
}
