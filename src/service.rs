use super::characteristic::Characteristic;
use super::connection::Connection;
use super::types::{CharacteristicId, ServiceInfo};
use crate::Uuid;

/// A Bluetooth GATT service.
#[derive(Debug, Clone)]
pub struct Service {
    conn: Connection,
    info: ServiceInfo,
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.conn == other.conn && self.info.uuid == other.info.uuid
    }
}

impl Eq for Service {}

impl std::hash::Hash for Service {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.conn.hash(state);
        self.info.uuid.hash(state);
    }
}

impl Service {
    pub(crate) fn new(conn: Connection, info: ServiceInfo) -> Self {
        Self { conn, info }
    }

    /// The [Uuid] identifying the type of this GATT service.
    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }

    /// Whether this is a primary service of the device.
    pub fn is_primary(&self) -> bool {
        self.info.is_primary
    }

    /// The discovered attributes of this service.
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    /// Get previously discovered characteristics.
    pub fn characteristics(&self) -> Vec<Characteristic> {
        self.info
            .characteristics
            .iter()
            .map(|ch| {
                Characteristic::new(
                    self.conn.clone(),
                    CharacteristicId::new(self.info.uuid, ch.uuid),
                    ch.clone(),
                )
            })
            .collect()
    }

    /// Returns the characteristic(s) with the given [Uuid].
    pub fn characteristics_with_uuid(&self, uuid: Uuid) -> Vec<Characteristic> {
        self.characteristics()
            .into_iter()
            .filter(|ch| ch.uuid() == uuid)
            .collect()
    }

    /// Returns the [Uuid]s of the services included by this service.
    pub fn included_services(&self) -> &[Uuid] {
        &self.info.included_services
    }
}
