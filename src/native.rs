//! The boundary to the platform Bluetooth stack.
//!
//! These traits mirror the shape of the Android `BluetoothAdapter`, `BluetoothGatt`,
//! `BluetoothGattCallback` and `ScanCallback` APIs: requests are fire-and-forget
//! calls returning whether they were accepted, and results arrive later on a
//! single registered callback object, possibly on an arbitrary thread.

use std::sync::Arc;

use crate::error::GattStatus;
use crate::types::{
    AdapterState, CharacteristicId, ConnectionState, DescriptorId, DeviceId, PlatformState,
    ScanResult, ServiceInfo, WriteType,
};

/// Entry points of the platform Bluetooth stack.
pub trait NativeStack: Send + Sync {
    /// Reads the current permission, capability and adapter state.
    fn platform_state(&self) -> PlatformState;

    /// Asks the host to show its permission request; the outcome is observed by
    /// reading [NativeStack::platform_state] again.
    fn request_permission(&self);

    /// Starts connecting to `device`, registering `callback` as the exclusive receiver
    /// of its events. Returns `None` if the stack could not create a GATT client.
    fn connect_gatt(
        &self,
        device: &DeviceId,
        auto_connect: bool,
        callback: Arc<dyn GattCallback>,
    ) -> Option<Arc<dyn NativeGatt>>;

    /// Registers a scan callback and starts scanning. Returns `false` if refused.
    fn start_scan(&self, callback: Arc<dyn ScanCallback>) -> bool;

    /// Stops the scan previously started with `callback`.
    fn stop_scan(&self, callback: &Arc<dyn ScanCallback>);
}

/// A native GATT client handle for one remote device.
///
/// Methods returning `bool` report whether the request was accepted; methods returning
/// `i32` report an Android `BluetoothStatusCodes` value, `0` meaning accepted.
pub trait NativeGatt: Send + Sync {
    fn disconnect(&self);
    /// Releases the client; no callback is invoked afterwards.
    fn close(&self);
    fn discover_services(&self) -> bool;
    /// The GATT database as of the last successful service discovery.
    fn services(&self) -> Vec<ServiceInfo>;
    fn read_characteristic(&self, id: &CharacteristicId) -> bool;
    fn write_characteristic(&self, id: &CharacteristicId, value: &[u8], write_type: WriteType)
        -> i32;
    fn read_descriptor(&self, id: &DescriptorId) -> bool;
    fn write_descriptor(&self, id: &DescriptorId, value: &[u8]) -> i32;
    fn request_mtu(&self, mtu: u16) -> bool;
    fn read_remote_rssi(&self) -> bool;
    /// Enables or disables local routing of notifications for a characteristic.
    fn set_characteristic_notification(&self, id: &CharacteristicId, enable: bool) -> bool;
}

/// Receiver of asynchronous GATT events for one connection.
pub trait GattCallback: Send + Sync {
    fn on_connection_state_change(&self, status: GattStatus, new_state: ConnectionState);
    fn on_services_discovered(&self, status: GattStatus);
    fn on_characteristic_read(&self, id: CharacteristicId, value: Vec<u8>, status: GattStatus);
    fn on_characteristic_write(&self, id: CharacteristicId, status: GattStatus);
    fn on_characteristic_changed(&self, id: CharacteristicId, value: Vec<u8>);
    fn on_descriptor_read(&self, id: DescriptorId, value: Vec<u8>, status: GattStatus);
    fn on_descriptor_write(&self, id: DescriptorId, status: GattStatus);
    fn on_mtu_changed(&self, mtu: u16, status: GattStatus);
    fn on_read_remote_rssi(&self, rssi: i16, status: GattStatus);
}

/// Receiver of scan events.
pub trait ScanCallback: Send + Sync {
    fn on_scan_result(&self, result: ScanResult);
    fn on_scan_failed(&self, error_code: i32);
    fn on_adapter_state_changed(&self, state: AdapterState);
}

/// The execution context the native stack requires for connection initiation and
/// callback registration (the main looper on Android).
pub trait MainDispatcher: Send + Sync {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs the task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl MainDispatcher for InlineDispatcher {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task()
    }
}
