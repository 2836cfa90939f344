use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_core::Stream;
use futures_lite::StreamExt;
use log::{debug, info};
use uuid::Uuid;

use super::btuuid::CLIENT_CHARACTERISTIC_CONFIGURATION;
use super::callback::{CallbackBridge, CharacteristicValue, GattEvent};
use super::error::{ErrorKind, GattStatus, NativeError};
use super::event_stream::EventReceiver;
use super::native::NativeGatt;
use super::serializer::{CommandSerializer, GattOperation, OperationOutput, OperationTicket};
use super::service::Service;
use super::types::{
    CharacteristicId, ConnectionState, DescriptorId, DeviceId, NotifyMode, ServiceInfo, WriteType,
};
use super::util::{defer, BoolExt};
use super::{Error, Result};

/// MTU every LE link starts with.
pub const DEFAULT_MTU: u16 = 23;

/// Opaque, process-unique identifier of one native GATT client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A GATT connection to a remote device.
///
/// Obtained from [crate::Central::connect] as soon as the native stack accepted the
/// connection attempt; the link itself is reported later on
/// [Connection::connection_states]. Clones share the same native handle, which is
/// closed when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    id: HandleId,
    device: DeviceId,
    gatt: Arc<dyn NativeGatt>,
    pub(crate) bridge: Arc<CallbackBridge>,
    serializer: Arc<CommandSerializer>,
    services: Mutex<Option<Vec<ServiceInfo>>>,
    subscriptions: async_lock::Mutex<HashMap<CharacteristicId, NotifyMode>>,
    closed: AtomicBool,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl std::hash::Hash for Connection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        id: HandleId,
        device: DeviceId,
        gatt: Arc<dyn NativeGatt>,
        bridge: Arc<CallbackBridge>,
    ) -> Self {
        let serializer = CommandSerializer::new(gatt.clone());
        bridge.attach(serializer.clone());
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                device,
                gatt,
                bridge,
                serializer,
                services: Mutex::new(None),
                subscriptions: async_lock::Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device
    }

    /// The latest reported link state.
    pub fn state(&self) -> ConnectionState {
        self.inner
            .bridge
            .streams
            .connection_state
            .latest()
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Link state changes, starting with the current state. Ends after `Disconnected`.
    pub fn connection_states(&self) -> EventReceiver<ConnectionState> {
        self.inner.bridge.streams.connection_state.subscribe()
    }

    /// Waits until the link is established.
    ///
    /// Fails with [ErrorKind::ConnectionFailed] if the link went down with an error
    /// status, or [ErrorKind::ConnectionClosed] otherwise.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut states = self.connection_states();
        while let Some(state) = states.next().await {
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => break,
                _ => (),
            }
        }
        Err(self.closed_error())
    }

    fn closed_error(&self) -> Error {
        match self.inner.bridge.disconnect_status() {
            Some(status) if !status.is_success() => Error::new(
                ErrorKind::ConnectionFailed,
                Some(NativeError::GattStatus(status)),
                format!("link to {} went down", self.inner.device),
            ),
            _ => ErrorKind::ConnectionClosed.into(),
        }
    }

    /// Queues an operation without waiting for it.
    pub fn submit(&self, operation: GattOperation) -> OperationTicket {
        self.inner.serializer.submit(operation)
    }

    /// Queues an operation and waits for its result.
    pub async fn enqueue(&self, operation: GattOperation) -> Result<OperationOutput> {
        self.submit(operation).wait().await
    }

    /// Number of operations in flight or waiting to be dispatched.
    pub fn pending_operations(&self) -> usize {
        self.inner.serializer.pending()
    }

    /// Discovers the services of the remote device.
    pub async fn discover_services(&self) -> Result<Vec<Service>> {
        let infos = match self.enqueue(GattOperation::DiscoverServices).await? {
            OperationOutput::Services(infos) => infos,
            other => return Err(unexpected(other)),
        };
        debug!(
            "{}: discovered {} service(s)",
            self.inner.device,
            infos.len()
        );
        *self
            .inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(infos.clone());
        Ok(self.wrap_services(infos))
    }

    /// Get previously discovered services.
    ///
    /// If no services have been discovered yet, this method will perform service discovery.
    pub async fn services(&self) -> Result<Vec<Service>> {
        let cached = self
            .inner
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cached {
            Some(infos) => Ok(self.wrap_services(infos)),
            None => self.discover_services().await,
        }
    }

    /// Discover the primary service(s) of this device with the given [Uuid].
    pub async fn services_with_uuid(&self, uuid: Uuid) -> Result<Vec<Service>> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .filter(|serv| serv.uuid() == uuid)
            .collect())
    }

    fn wrap_services(&self, infos: Vec<ServiceInfo>) -> Vec<Service> {
        infos
            .into_iter()
            .map(|info| Service::new(self.clone(), info))
            .collect()
    }

    pub async fn read_characteristic(&self, id: CharacteristicId) -> Result<Vec<u8>> {
        match self.enqueue(GattOperation::ReadCharacteristic(id)).await? {
            OperationOutput::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn write_characteristic(
        &self,
        id: CharacteristicId,
        value: impl Into<Vec<u8>>,
        write_type: WriteType,
    ) -> Result<()> {
        let op = GattOperation::WriteCharacteristic(id, value.into(), write_type);
        self.enqueue(op).await.map(|_| ())
    }

    pub async fn read_descriptor(&self, id: DescriptorId) -> Result<Vec<u8>> {
        match self.enqueue(GattOperation::ReadDescriptor(id)).await? {
            OperationOutput::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn write_descriptor(&self, id: DescriptorId, value: impl Into<Vec<u8>>) -> Result<()> {
        let op = GattOperation::WriteDescriptor(id, value.into());
        self.enqueue(op).await.map(|_| ())
    }

    /// Requests a larger MTU; returns the MTU actually negotiated.
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        match self.enqueue(GattOperation::RequestMtu(mtu)).await? {
            OperationOutput::Mtu(mtu) => Ok(mtu),
            other => Err(unexpected(other)),
        }
    }

    /// The last successfully negotiated MTU.
    pub fn mtu(&self) -> u16 {
        match self.inner.bridge.streams.mtu.latest() {
            Some(Ok(mtu)) => mtu,
            _ => DEFAULT_MTU,
        }
    }

    /// Get the current signal strength from the device in dBm.
    pub async fn read_rssi(&self) -> Result<i16> {
        match self.enqueue(GattOperation::RequestRssi).await? {
            OperationOutput::Rssi(rssi) => Ok(rssi),
            other => Err(unexpected(other)),
        }
    }

    /// All notifications and indications received on this connection.
    pub fn characteristic_changes(&self) -> EventReceiver<CharacteristicValue> {
        self.inner.bridge.streams.characteristic_changed.subscribe()
    }

    /// Outcomes of every service discovery, including ones started elsewhere.
    pub fn service_discoveries(&self) -> EventReceiver<Result<()>> {
        self.inner.bridge.streams.services_discovered.subscribe()
    }

    pub fn characteristic_reads(&self) -> EventReceiver<GattEvent<CharacteristicId, Vec<u8>>> {
        self.inner.bridge.streams.characteristic_read.subscribe()
    }

    pub fn characteristic_writes(&self) -> EventReceiver<GattEvent<CharacteristicId, ()>> {
        self.inner.bridge.streams.characteristic_write.subscribe()
    }

    pub fn descriptor_reads(&self) -> EventReceiver<GattEvent<DescriptorId, Vec<u8>>> {
        self.inner.bridge.streams.descriptor_read.subscribe()
    }

    pub fn descriptor_writes(&self) -> EventReceiver<GattEvent<DescriptorId, ()>> {
        self.inner.bridge.streams.descriptor_write.subscribe()
    }

    /// MTU negotiation outcomes, starting with the latest one.
    pub fn mtu_updates(&self) -> EventReceiver<Result<u16>> {
        self.inner.bridge.streams.mtu.subscribe()
    }

    pub fn rssi_updates(&self) -> EventReceiver<Result<i16>> {
        self.inner.bridge.streams.rssi.subscribe()
    }

    /// Values received for one characteristic, without touching its configuration.
    pub fn notifications(
        &self,
        id: CharacteristicId,
    ) -> impl Stream<Item = Vec<u8>> + Send + Unpin + 'static {
        self.characteristic_changes()
            .filter(move |change| change.id == id)
            .map(|change| change.value)
    }

    /// Enables notifications (or indications) for a characteristic and returns the
    /// stream of its values, which ends when the connection goes down.
    pub async fn subscribe(
        &self,
        id: CharacteristicId,
        mode: NotifyMode,
    ) -> Result<impl Stream<Item = Vec<u8>> + Send + Unpin + 'static> {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if self.inner.bridge.is_torn_down() {
            return Err(ErrorKind::ConnectionClosed.into());
        }
        // subscribe first so nothing sent right after the CCCD write is missed
        let values = self.notifications(id);
        if subscriptions.get(&id) == Some(&mode) {
            return Ok(values);
        }
        let gatt = &self.inner.gatt;
        let newly_enabled = !subscriptions.contains_key(&id);
        if newly_enabled {
            gatt.set_characteristic_notification(&id, true).non_false()?;
        }
        let rollback = newly_enabled.then(|| {
            defer(|| {
                let _ = gatt.set_characteristic_notification(&id, false);
            })
        });
        self.write_descriptor(
            id.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION),
            mode.cccd_value().to_vec(),
        )
        .await?;
        if let Some(rollback) = rollback {
            rollback.defuse();
        }
        subscriptions.insert(id, mode);
        Ok(values)
    }

    /// Disables notifications previously enabled with [Connection::subscribe].
    pub async fn unsubscribe(&self, id: CharacteristicId) -> Result<()> {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        if subscriptions.remove(&id).is_none() {
            return Ok(());
        }
        self.write_descriptor(
            id.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION),
            vec![0x00, 0x00],
        )
        .await?;
        self.inner
            .gatt
            .set_characteristic_notification(&id, false)
            .non_false()
    }

    pub async fn is_subscribed(&self, id: CharacteristicId) -> bool {
        self.inner.subscriptions.lock().await.contains_key(&id)
    }

    /// Asks the native stack to drop the link. Completion is reported on the state stream.
    pub fn disconnect(&self) {
        if self.inner.bridge.is_torn_down() {
            return;
        }
        info!("disconnecting from {}", self.inner.device);
        self.inner.gatt.disconnect();
    }

    /// Releases the native handle right away.
    ///
    /// The native stack stops calling back after `close`, so the terminal
    /// `Disconnected` state is published locally.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl ConnectionInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing GATT client {} for {}", self.id, self.device);
        self.gatt.close();
        self.bridge.teardown(GattStatus::SUCCESS);
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(output: OperationOutput) -> Error {
    Error::new(
        ErrorKind::Internal,
        None,
        format!("unexpected operation output {output:?}"),
    )
}
