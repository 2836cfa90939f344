//! Parsing of raw advertisement payloads into [AdvertisementData].

use std::collections::HashMap;

use uuid::Uuid;

use crate::btuuid::BluetoothUuidExt;

const AD_FLAGS: u8 = 0x01;
const AD_INCOMPLETE_UUID16: u8 = 0x02;
const AD_COMPLETE_UUID16: u8 = 0x03;
const AD_INCOMPLETE_UUID32: u8 = 0x04;
const AD_COMPLETE_UUID32: u8 = 0x05;
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TX_POWER_LEVEL: u8 = 0x0a;
const AD_SERVICE_DATA_UUID16: u8 = 0x16;
const AD_SERVICE_DATA_UUID32: u8 = 0x20;
const AD_SERVICE_DATA_UUID128: u8 = 0x21;
const AD_MANUFACTURER_DATA: u8 = 0xff;

/// LE General / Limited Discoverable mode flags.
const FLAGS_DISCOVERABLE_MASK: u8 = 0x03;

/// Manufacturer-specific advertisement data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManufacturerData {
    /// Company identifier, see <https://www.bluetooth.com/specifications/assigned-numbers/>.
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// Data included in a Bluetooth advertisement or scan response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub manufacturer_data: Option<ManufacturerData>,
    pub services: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub tx_power_level: Option<i16>,
    /// `true` when the advertising flags mark the device as discoverable.
    pub is_discoverable: bool,
}

impl AdvertisementData {
    /// Parses a sequence of AD structures (`len, type, data...`).
    ///
    /// Parsing stops at the first zero-length or truncated structure; everything
    /// decoded before that point is kept.
    pub fn parse(data: &[u8]) -> Self {
        let mut adv = AdvertisementData::default();
        for (ad_type, payload) in AdStructures(data) {
            match ad_type {
                AD_FLAGS => {
                    adv.is_discoverable = payload
                        .first()
                        .is_some_and(|flags| flags & FLAGS_DISCOVERABLE_MASK != 0);
                }
                AD_INCOMPLETE_UUID16 | AD_COMPLETE_UUID16 => {
                    push_uuids(&mut adv.services, payload, 2);
                }
                AD_INCOMPLETE_UUID32 | AD_COMPLETE_UUID32 => {
                    push_uuids(&mut adv.services, payload, 4);
                }
                AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128 => {
                    push_uuids(&mut adv.services, payload, 16);
                }
                AD_SHORTENED_LOCAL_NAME => {
                    // a complete name seen earlier wins
                    if adv.local_name.is_none() {
                        adv.local_name = Some(String::from_utf8_lossy(payload).into_owned());
                    }
                }
                AD_COMPLETE_LOCAL_NAME => {
                    adv.local_name = Some(String::from_utf8_lossy(payload).into_owned());
                }
                AD_TX_POWER_LEVEL => {
                    adv.tx_power_level = payload.first().map(|&p| i16::from(p as i8));
                }
                AD_SERVICE_DATA_UUID16 => insert_service_data(&mut adv.service_data, payload, 2),
                AD_SERVICE_DATA_UUID32 => insert_service_data(&mut adv.service_data, payload, 4),
                AD_SERVICE_DATA_UUID128 => {
                    insert_service_data(&mut adv.service_data, payload, 16)
                }
                AD_MANUFACTURER_DATA if payload.len() >= 2 => {
                    adv.manufacturer_data = Some(ManufacturerData {
                        company_id: u16::from_le_bytes([payload[0], payload[1]]),
                        data: payload[2..].to_vec(),
                    });
                }
                _ => (),
            }
        }
        adv
    }

    /// Checks whether the advertisement lists the given service.
    pub fn has_service(&self, uuid: Uuid) -> bool {
        self.services.contains(&uuid)
    }
}

fn push_uuids(services: &mut Vec<Uuid>, payload: &[u8], width: usize) {
    for chunk in payload.chunks_exact(width) {
        if let Some(uuid) = Uuid::from_bluetooth_bytes(chunk) {
            if !services.contains(&uuid) {
                services.push(uuid);
            }
        }
    }
}

fn insert_service_data(map: &mut HashMap<Uuid, Vec<u8>>, payload: &[u8], width: usize) {
    if payload.len() < width {
        return;
    }
    if let Some(uuid) = Uuid::from_bluetooth_bytes(&payload[..width]) {
        map.insert(uuid, payload[width..].to_vec());
    }
}

/// Iterates over `(ad_type, payload)` pairs of an advertisement payload.
struct AdStructures<'a>(&'a [u8]);

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.0;
        let len = *data.first()? as usize;
        if len == 0 || len + 1 > data.len() {
            self.0 = &[];
            return None;
        }
        let ad_type = data[1];
        let payload = &data[2..len + 1];
        self.0 = &data[len + 1..];
        Some((ad_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_services_and_manufacturer_data() {
        let raw = [
            0x02, 0x01, 0x06, // flags
            0x05, 0x03, 0x0d, 0x18, 0x0f, 0x18, // complete 16-bit uuids: HR, battery
            0x05, 0x09, b'B', b'a', b'n', b'd', // complete local name
            0x02, 0x0a, 0xf4, // tx power -12 dBm
            0x05, 0xff, 0x4c, 0x00, 0x02, 0x15, // Apple, 2 bytes of payload
        ];
        let adv = AdvertisementData::parse(&raw);
        assert_eq!(adv.local_name.as_deref(), Some("Band"));
        assert!(adv.is_discoverable);
        assert_eq!(
            adv.services,
            vec![Uuid::from_u16(0x180d), Uuid::from_u16(0x180f)]
        );
        assert_eq!(adv.tx_power_level, Some(-12));
        assert_eq!(
            adv.manufacturer_data,
            Some(ManufacturerData {
                company_id: 0x004c,
                data: vec![0x02, 0x15],
            })
        );
    }

    #[test]
    fn complete_name_overrides_shortened_name() {
        let raw = [
            0x03, 0x08, b'G', b'e', //
            0x05, 0x09, b'G', b'e', b'a', b'r',
        ];
        let adv = AdvertisementData::parse(&raw);
        assert_eq!(adv.local_name.as_deref(), Some("Gear"));
    }

    #[test]
    fn service_data_is_keyed_by_uuid() {
        let raw = [0x05, 0x16, 0x0f, 0x18, 0x64, 0x01];
        let adv = AdvertisementData::parse(&raw);
        assert_eq!(
            adv.service_data.get(&Uuid::from_u16(0x180f)),
            Some(&vec![0x64, 0x01])
        );
    }

    #[test]
    fn truncated_structure_keeps_earlier_fields() {
        let raw = [0x03, 0x09, b'O', b'K', 0x09, 0x03, 0x0d];
        let adv = AdvertisementData::parse(&raw);
        assert_eq!(adv.local_name.as_deref(), Some("OK"));
        assert!(adv.services.is_empty());
        assert_eq!(AdvertisementData::parse(&[]), AdvertisementData::default());
    }

    #[test]
    fn discoverable_follows_the_le_mode_bits_only() {
        // BR/EDR not supported, non-discoverable
        assert!(!AdvertisementData::parse(&[0x02, 0x01, 0x04]).is_discoverable);
        // LE Limited Discoverable
        assert!(AdvertisementData::parse(&[0x02, 0x01, 0x05]).is_discoverable);
        assert!(!AdvertisementData::parse(&[]).is_discoverable);
    }
}
