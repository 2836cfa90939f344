//! The native callback delegate of a connection and its event streams.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, info, warn};

use crate::error::{ErrorKind, GattStatus};
use crate::event_stream::EventStream;
use crate::native::GattCallback;
use crate::serializer::{CommandSerializer, OperationKey, OperationOutput, GattOperation};
use crate::types::{CharacteristicId, ConnectionState, DescriptorId, DeviceId};
use crate::Result;

/// Result of a GATT request reported by the native stack for one attribute.
#[derive(Debug, Clone)]
pub struct GattEvent<Id, T> {
    pub target: Id,
    pub result: Result<T>,
}

/// A value pushed by the peripheral through a notification or indication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicValue {
    pub id: CharacteristicId,
    pub value: Vec<u8>,
}

/// One stream per native event type.
pub(crate) struct GattStreams {
    pub connection_state: EventStream<ConnectionState>,
    pub services_discovered: EventStream<Result<()>>,
    pub characteristic_read: EventStream<GattEvent<CharacteristicId, Vec<u8>>>,
    pub characteristic_write: EventStream<GattEvent<CharacteristicId, ()>>,
    pub characteristic_changed: EventStream<CharacteristicValue>,
    pub descriptor_read: EventStream<GattEvent<DescriptorId, Vec<u8>>>,
    pub descriptor_write: EventStream<GattEvent<DescriptorId, ()>>,
    pub mtu: EventStream<Result<u16>>,
    pub rssi: EventStream<Result<i16>>,
}

impl GattStreams {
    fn new(capacity: usize) -> Self {
        Self {
            connection_state: EventStream::with_initial(capacity, ConnectionState::Connecting),
            services_discovered: EventStream::new(capacity),
            characteristic_read: EventStream::new(capacity),
            characteristic_write: EventStream::new(capacity),
            characteristic_changed: EventStream::new(capacity),
            descriptor_read: EventStream::new(capacity),
            descriptor_write: EventStream::new(capacity),
            mtu: EventStream::replaying(capacity),
            rssi: EventStream::new(capacity),
        }
    }

    fn close_data(&self) {
        self.services_discovered.close();
        self.characteristic_read.close();
        self.characteristic_write.close();
        self.characteristic_changed.close();
        self.descriptor_read.close();
        self.descriptor_write.close();
        self.mtu.close();
        self.rssi.close();
    }
}

/// The single [GattCallback] registered for a connection.
///
/// It is the only writer of the connection state. Every native event is republished
/// on its stream, and completions are handed to the connection's serializer.
pub(crate) struct CallbackBridge {
    device: DeviceId,
    pub(crate) streams: GattStreams,
    serializer: OnceLock<Arc<CommandSerializer>>,
    torn_down: AtomicBool,
    disconnect_status: OnceLock<GattStatus>,
    request_mtu_on_connect: Option<u16>,
    mtu_requested: AtomicBool,
    on_teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CallbackBridge {
    pub fn new(device: DeviceId, capacity: usize, request_mtu_on_connect: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            device,
            streams: GattStreams::new(capacity),
            serializer: OnceLock::new(),
            torn_down: AtomicBool::new(false),
            disconnect_status: OnceLock::new(),
            request_mtu_on_connect,
            mtu_requested: AtomicBool::new(false),
            on_teardown: Mutex::new(None),
        })
    }

    /// Attaches the serializer of the native handle this bridge was registered with.
    ///
    /// A `Connected` event that arrived before the serializer was attached still gets
    /// its MTU request.
    pub fn attach(&self, serializer: Arc<CommandSerializer>) {
        let serializer = self.serializer.get_or_init(|| serializer);
        if self.is_torn_down() {
            serializer.fail_all(ErrorKind::ConnectionClosed.into());
        } else if self.streams.connection_state.latest() == Some(ConnectionState::Connected) {
            self.request_mtu_once();
        }
    }

    /// Sets what runs once when the connection is torn down; runs it immediately if
    /// that already happened.
    pub fn set_on_teardown(&self, f: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_teardown.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_torn_down() {
            drop(slot);
            f();
        } else {
            *slot = Some(Box::new(f));
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// The status carried by the terminal disconnect event, if there was one.
    pub fn disconnect_status(&self) -> Option<GattStatus> {
        self.disconnect_status.get().copied()
    }

    /// Publishes `Disconnected`, fails pending operations and closes every stream.
    /// Later native events are ignored.
    pub fn teardown(&self, status: GattStatus) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.disconnect_status.set(status);
        // a handler already past the gate on another thread must not publish after
        // `Disconnected` is visible
        self.streams.close_data();
        self.streams
            .connection_state
            .publish(ConnectionState::Disconnected);
        if let Some(serializer) = self.serializer.get() {
            serializer.fail_all(ErrorKind::ConnectionClosed.into());
        }
        self.streams.connection_state.close();
        let on_teardown = self
            .on_teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(f) = on_teardown {
            f();
        }
    }

    fn ignored(&self, event: &str) -> bool {
        let torn_down = self.is_torn_down();
        if torn_down {
            debug!("{}: {event} after disconnection ignored", self.device);
        }
        torn_down
    }

    fn request_mtu_once(&self) {
        let (Some(mtu), Some(serializer)) = (self.request_mtu_on_connect, self.serializer.get())
        else {
            return;
        };
        if !self.mtu_requested.swap(true, Ordering::SeqCst) {
            serializer.submit(GattOperation::RequestMtu(mtu)).detach();
        }
    }

    fn complete(&self, key: OperationKey, result: Result<OperationOutput>) {
        if let Some(serializer) = self.serializer.get() {
            serializer.complete(key, result);
        }
    }
}

impl GattCallback for CallbackBridge {
    fn on_connection_state_change(&self, status: GattStatus, new_state: ConnectionState) {
        if self.ignored("connection state change") {
            return;
        }
        match new_state {
            ConnectionState::Disconnected => {
                info!("{} disconnected ({status})", self.device);
                self.teardown(status);
            }
            ConnectionState::Connected => {
                if !status.is_success() {
                    warn!("{} connected with {status}", self.device);
                }
                self.streams.connection_state.publish(new_state);
                self.request_mtu_once();
            }
            _ => {
                self.streams.connection_state.publish(new_state);
            }
        }
    }

    fn on_services_discovered(&self, status: GattStatus) {
        if self.ignored("service discovery") {
            return;
        }
        let result = status.check();
        self.streams.services_discovered.publish(result.clone());
        let output = result.map(|_| {
            OperationOutput::Services(
                self.serializer
                    .get()
                    .map(|s| s.gatt().services())
                    .unwrap_or_default(),
            )
        });
        self.complete(OperationKey::DiscoverServices, output);
    }

    fn on_characteristic_read(&self, id: CharacteristicId, value: Vec<u8>, status: GattStatus) {
        if self.ignored("characteristic read") {
            return;
        }
        let result = status.check().map(|_| value);
        self.streams.characteristic_read.publish(GattEvent {
            target: id,
            result: result.clone(),
        });
        self.complete(
            OperationKey::ReadCharacteristic(id),
            result.map(OperationOutput::Value),
        );
    }

    fn on_characteristic_write(&self, id: CharacteristicId, status: GattStatus) {
        if self.ignored("characteristic write") {
            return;
        }
        let result = status.check();
        self.streams.characteristic_write.publish(GattEvent {
            target: id,
            result: result.clone(),
        });
        self.complete(
            OperationKey::WriteCharacteristic(id),
            result.map(|_| OperationOutput::Written),
        );
    }

    fn on_characteristic_changed(&self, id: CharacteristicId, value: Vec<u8>) {
        if self.ignored("characteristic notification") {
            return;
        }
        self.streams
            .characteristic_changed
            .publish(CharacteristicValue { id, value });
    }

    fn on_descriptor_read(&self, id: DescriptorId, value: Vec<u8>, status: GattStatus) {
        if self.ignored("descriptor read") {
            return;
        }
        let result = status.check().map(|_| value);
        self.streams.descriptor_read.publish(GattEvent {
            target: id,
            result: result.clone(),
        });
        self.complete(
            OperationKey::ReadDescriptor(id),
            result.map(OperationOutput::Value),
        );
    }

    fn on_descriptor_write(&self, id: DescriptorId, status: GattStatus) {
        if self.ignored("descriptor write") {
            return;
        }
        let result = status.check();
        self.streams.descriptor_write.publish(GattEvent {
            target: id,
            result: result.clone(),
        });
        self.complete(
            OperationKey::WriteDescriptor(id),
            result.map(|_| OperationOutput::Written),
        );
    }

    fn on_mtu_changed(&self, mtu: u16, status: GattStatus) {
        if self.ignored("MTU change") {
            return;
        }
        let result = status.check().map(|_| mtu);
        self.streams.mtu.publish(result.clone());
        self.complete(OperationKey::RequestMtu, result.map(OperationOutput::Mtu));
    }

    fn on_read_remote_rssi(&self, rssi: i16, status: GattStatus) {
        if self.ignored("RSSI read") {
            return;
        }
        let result = status.check().map(|_| rssi);
        self.streams.rssi.publish(result.clone());
        self.complete(OperationKey::RequestRssi, result.map(OperationOutput::Rssi));
    }
}

/// Logs every native event before forwarding it, unchanged, to the wrapped callback.
pub struct LoggingCallback {
    tag: String,
    inner: Arc<dyn GattCallback>,
}

impl LoggingCallback {
    pub fn new(tag: impl Into<String>, inner: Arc<dyn GattCallback>) -> Self {
        Self {
            tag: tag.into(),
            inner,
        }
    }

    /// Wraps `inner`, ready to be registered with the native stack.
    pub fn wrap(tag: impl Into<String>, inner: Arc<dyn GattCallback>) -> Arc<dyn GattCallback> {
        Arc::new(Self::new(tag, inner))
    }
}

impl GattCallback for LoggingCallback {
    fn on_connection_state_change(&self, status: GattStatus, new_state: ConnectionState) {
        debug!("{}: onConnectionStateChange({status}, {new_state:?})", self.tag);
        self.inner.on_connection_state_change(status, new_state)
    }

    fn on_services_discovered(&self, status: GattStatus) {
        debug!("{}: onServicesDiscovered({status})", self.tag);
        self.inner.on_services_discovered(status)
    }

    fn on_characteristic_read(&self, id: CharacteristicId, value: Vec<u8>, status: GattStatus) {
        debug!(
            "{}: onCharacteristicRead({}, {} bytes, {status})",
            self.tag,
            id.characteristic,
            value.len()
        );
        self.inner.on_characteristic_read(id, value, status)
    }

    fn on_characteristic_write(&self, id: CharacteristicId, status: GattStatus) {
        debug!("{}: onCharacteristicWrite({}, {status})", self.tag, id.characteristic);
        self.inner.on_characteristic_write(id, status)
    }

    fn on_characteristic_changed(&self, id: CharacteristicId, value: Vec<u8>) {
        debug!(
            "{}: onCharacteristicChanged({}, {value:02x?})",
            self.tag, id.characteristic
        );
        self.inner.on_characteristic_changed(id, value)
    }

    fn on_descriptor_read(&self, id: DescriptorId, value: Vec<u8>, status: GattStatus) {
        debug!(
            "{}: onDescriptorRead({}, {} bytes, {status})",
            self.tag,
            id.descriptor,
            value.len()
        );
        self.inner.on_descriptor_read(id, value, status)
    }

    fn on_descriptor_write(&self, id: DescriptorId, status: GattStatus) {
        debug!("{}: onDescriptorWrite({}, {status})", self.tag, id.descriptor);
        self.inner.on_descriptor_write(id, status)
    }

    fn on_mtu_changed(&self, mtu: u16, status: GattStatus) {
        debug!("{}: onMtuChanged({mtu}, {status})", self.tag);
        self.inner.on_mtu_changed(mtu, status)
    }

    fn on_read_remote_rssi(&self, rssi: i16, status: GattStatus) {
        debug!("{}: onReadRemoteRssi({rssi}, {status})", self.tag);
        self.inner.on_read_remote_rssi(rssi, status)
    }
}
