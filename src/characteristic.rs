use futures_core::Stream;
use uuid::Uuid;

use super::connection::Connection;
use super::descriptor::Descriptor;
use super::error::ErrorKind;
use super::types::{CharacteristicId, CharacteristicInfo, NotifyMode, WriteType};
use super::{CharacteristicProperties, Result};

/// Size of the ATT header of a Write Command.
const ATT_WRITE_HEADER_LEN: usize = 3;

/// A Bluetooth GATT characteristic.
#[derive(Debug, Clone)]
pub struct Characteristic {
    conn: Connection,
    id: CharacteristicId,
    info: CharacteristicInfo,
}

impl PartialEq for Characteristic {
    fn eq(&self, other: &Self) -> bool {
        self.conn == other.conn && self.id == other.id
    }
}

impl Eq for Characteristic {}

impl std::hash::Hash for Characteristic {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.conn.hash(state);
        self.id.hash(state);
    }
}

impl Characteristic {
    pub(crate) fn new(conn: Connection, id: CharacteristicId, info: CharacteristicInfo) -> Self {
        Self { conn, id, info }
    }

    /// The [Uuid] identifying the type of this GATT characteristic.
    pub fn uuid(&self) -> Uuid {
        self.id.characteristic
    }

    pub fn id(&self) -> CharacteristicId {
        self.id
    }

    /// The properties of this this GATT characteristic.
    ///
    /// Characteristic properties indicate which operations (e.g. read, write, notify, etc)
    /// may be performed on this characteristic.
    pub fn properties(&self) -> CharacteristicProperties {
        self.info.properties
    }

    /// Read the value of this characteristic from the device.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.conn.read_characteristic(self.id).await
    }

    /// Write `value` to this characteristic on the device and request the device to return a response
    /// indicating a successful write.
    pub async fn write(&self, value: &[u8]) -> Result<()> {
        self.conn
            .write_characteristic(self.id, value, WriteType::WithResponse)
            .await
    }

    /// Write `value` to this characteristic on the device without requesting a response.
    ///
    /// The native stack truncates such writes to the MTU silently, so longer values are
    /// rejected up front.
    pub async fn write_without_response(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.max_write_len() {
            return Err(crate::Error::new(
                ErrorKind::InvalidParameter,
                None,
                "write length exceeds the MTU's limitation",
            ));
        }
        self.conn
            .write_characteristic(self.id, value, WriteType::WithoutResponse)
            .await
    }

    /// Get the maximum amount of data that can be written in a single packet for this characteristic.
    pub fn max_write_len(&self) -> usize {
        usize::from(self.conn.mtu()).saturating_sub(ATT_WRITE_HEADER_LEN)
    }

    /// Enables notification of value changes for this GATT characteristic.
    ///
    /// Returns a stream of values for the characteristic sent from the device.
    pub async fn notify(&self) -> Result<impl Stream<Item = Vec<u8>> + Send + Unpin + 'static> {
        let mode = if self.info.properties.notify || !self.info.properties.indicate {
            NotifyMode::Notify
        } else {
            NotifyMode::Indicate
        };
        self.conn.subscribe(self.id, mode).await
    }

    /// Disables notifications enabled with [Characteristic::notify].
    pub async fn stop_notify(&self) -> Result<()> {
        self.conn.unsubscribe(self.id).await
    }

    /// Is the device currently sending notifications for this characteristic?
    pub async fn is_notifying(&self) -> bool {
        self.conn.is_subscribed(self.id).await
    }

    /// Get previously discovered descriptors.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.info
            .descriptors
            .iter()
            .map(|&uuid| Descriptor::new(self.conn.clone(), self.id.descriptor(uuid)))
            .collect()
    }
}
