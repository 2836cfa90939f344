use super::connection::Connection;
use super::types::DescriptorId;
use super::{Result, Uuid};

/// A Bluetooth GATT descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    conn: Connection,
    id: DescriptorId,
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.conn == other.conn && self.id == other.id
    }
}

impl Eq for Descriptor {}

impl Descriptor {
    pub(crate) fn new(conn: Connection, id: DescriptorId) -> Self {
        Self { conn, id }
    }

    /// The [Uuid] identifying the type of this GATT descriptor.
    pub fn uuid(&self) -> Uuid {
        self.id.descriptor
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Read the value of this descriptor from the device.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.conn.read_descriptor(self.id).await
    }

    /// Write the `value` to this descriptor on the device.
    pub async fn write(&self, value: &[u8]) -> Result<()> {
        self.conn.write_descriptor(self.id, value).await
    }
}
