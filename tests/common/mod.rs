//! A scriptable in-memory stand-in for the platform Bluetooth stack.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use gatt_bridge::{
    AdapterState, CharacteristicId, ConnectionState, DescriptorId, DeviceId, GattCallback,
    GattOperation, GattStatus, MainDispatcher, NativeGatt, NativeStack, PlatformState,
    ScanCallback, ScanResult, ServiceInfo, WriteType,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How a [FakeGatt] answers the requests it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    /// Only records requests; the test fires callbacks itself.
    Manual,
    /// Fires the callback from inside the native call.
    Inline,
    /// Fires the callback from another thread after the next queued delay.
    Threaded,
}

pub struct FakeStack {
    state: Mutex<PlatformState>,
    responder: Mutex<Responder>,
    refuse_connect: AtomicBool,
    connected_on_create: AtomicBool,
    refuse_scan: AtomicBool,
    gatts: Mutex<Vec<Arc<FakeGatt>>>,
    connect_threads: Mutex<Vec<Option<String>>>,
    permission_requests: AtomicUsize,
    scan_callback: Mutex<Option<Arc<dyn ScanCallback>>>,
    start_scan_calls: AtomicUsize,
    stop_scan_calls: AtomicUsize,
}

impl FakeStack {
    pub fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PlatformState::default()),
            responder: Mutex::new(responder),
            refuse_connect: AtomicBool::new(false),
            connected_on_create: AtomicBool::new(false),
            refuse_scan: AtomicBool::new(false),
            gatts: Mutex::new(Vec::new()),
            connect_threads: Mutex::new(Vec::new()),
            permission_requests: AtomicUsize::new(0),
            scan_callback: Mutex::new(None),
            start_scan_calls: AtomicUsize::new(0),
            stop_scan_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_state(&self, state: PlatformState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Reports `Connected` from inside `connect_gatt`, before the caller sees the client.
    pub fn connected_on_create(&self, enabled: bool) {
        self.connected_on_create.store(enabled, Ordering::SeqCst);
    }

    pub fn refuse_scan(&self, refuse: bool) {
        self.refuse_scan.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_threads.lock().unwrap().len()
    }

    /// Names of the threads `connect_gatt` ran on.
    pub fn connect_threads(&self) -> Vec<Option<String>> {
        self.connect_threads.lock().unwrap().clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    /// The most recently created GATT client.
    pub fn gatt(&self) -> Arc<FakeGatt> {
        self.gatts.lock().unwrap().last().cloned().unwrap()
    }

    pub fn gatt_for(&self, device: &DeviceId) -> Arc<FakeGatt> {
        let gatts = self.gatts.lock().unwrap();
        gatts.iter().rev().find(|g| &g.device == device).cloned().unwrap()
    }

    pub fn start_scan_calls(&self) -> usize {
        self.start_scan_calls.load(Ordering::SeqCst)
    }

    pub fn stop_scan_calls(&self) -> usize {
        self.stop_scan_calls.load(Ordering::SeqCst)
    }

    pub fn scan_registered(&self) -> bool {
        self.scan_callback.lock().unwrap().is_some()
    }

    fn scan_callback(&self) -> Arc<dyn ScanCallback> {
        self.scan_callback.lock().unwrap().clone().unwrap()
    }

    pub fn discover(&self, address: &str, rssi: i16) {
        let raw = vec![0x02, 0x01, 0x06, 0x05, 0x09, b'f', b'a', b'k', b'e'];
        let result = ScanResult::from_raw(DeviceId::new(address), raw, rssi, SystemTime::now());
        self.scan_callback().on_scan_result(result);
    }

    pub fn adapter_changed(&self, state: AdapterState) {
        self.state.lock().unwrap().adapter = state;
        self.scan_callback().on_adapter_state_changed(state);
    }

    pub fn scan_failed(&self, code: i32) {
        self.scan_callback().on_scan_failed(code);
    }
}

impl NativeStack for FakeStack {
    fn platform_state(&self) -> PlatformState {
        self.state.lock().unwrap().clone()
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().location_permission_granted = true;
    }

    fn connect_gatt(
        &self,
        device: &DeviceId,
        _auto_connect: bool,
        callback: Arc<dyn GattCallback>,
    ) -> Option<Arc<dyn NativeGatt>> {
        self.connect_threads
            .lock()
            .unwrap()
            .push(thread::current().name().map(str::to_owned));
        if self.refuse_connect.load(Ordering::SeqCst) {
            return None;
        }
        let responder = *self.responder.lock().unwrap();
        let gatt = FakeGatt::new(device.clone(), callback, responder);
        self.gatts.lock().unwrap().push(gatt.clone());
        if self.connected_on_create.load(Ordering::SeqCst) {
            gatt.connected();
        }
        Some(gatt)
    }

    fn start_scan(&self, callback: Arc<dyn ScanCallback>) -> bool {
        self.start_scan_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_scan.load(Ordering::SeqCst) {
            return false;
        }
        *self.scan_callback.lock().unwrap() = Some(callback);
        true
    }

    fn stop_scan(&self, callback: &Arc<dyn ScanCallback>) {
        self.stop_scan_calls.fetch_add(1, Ordering::SeqCst);
        let mut registered = self.scan_callback.lock().unwrap();
        if registered
            .as_ref()
            .is_some_and(|cb| Arc::as_ptr(cb).cast::<()>() == Arc::as_ptr(callback).cast::<()>()) {
            *registered = None;
        }
    }
}

pub struct FakeGatt {
    this: Weak<FakeGatt>,
    pub device: DeviceId,
    callback: Mutex<Option<Arc<dyn GattCallback>>>,
    responder: Responder,
    delays: Mutex<VecDeque<Duration>>,
    response_status: Mutex<GattStatus>,
    values: Mutex<HashMap<CharacteristicId, Vec<u8>>>,
    services: Mutex<Vec<ServiceInfo>>,
    operations: Mutex<Vec<GattOperation>>,
    notification_calls: Mutex<Vec<(CharacteristicId, bool)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    disconnect_calls: AtomicUsize,
    closed: AtomicBool,
}

impl FakeGatt {
    fn new(device: DeviceId, callback: Arc<dyn GattCallback>, responder: Responder) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            device,
            callback: Mutex::new(Some(callback)),
            responder,
            delays: Mutex::new(VecDeque::new()),
            response_status: Mutex::new(GattStatus::SUCCESS),
            values: Mutex::new(HashMap::new()),
            services: Mutex::new(Vec::new()),
            operations: Mutex::new(Vec::new()),
            notification_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Invokes the registered callback unless the client was closed.
    pub fn fire(&self, f: impl FnOnce(&dyn GattCallback)) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            f(&*callback);
        }
    }

    /// The registered callback, `None` once the client was closed.
    pub fn callback(&self) -> Option<Arc<dyn GattCallback>> {
        self.callback.lock().unwrap().clone()
    }

    pub fn connected(&self) {
        self.fire(|cb| cb.on_connection_state_change(GattStatus::SUCCESS, ConnectionState::Connected));
    }

    pub fn disconnected(&self, status: GattStatus) {
        self.fire(|cb| cb.on_connection_state_change(status, ConnectionState::Disconnected));
    }

    pub fn push_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.delays.lock().unwrap().extend(delays);
    }

    pub fn set_response_status(&self, status: GattStatus) {
        *self.response_status.lock().unwrap() = status;
    }

    pub fn set_value(&self, id: CharacteristicId, value: Vec<u8>) {
        self.values.lock().unwrap().insert(id, value);
    }

    pub fn set_services(&self, services: Vec<ServiceInfo>) {
        *self.services.lock().unwrap() = services;
    }

    /// Requests dispatched to this client, in order.
    pub fn operations(&self) -> Vec<GattOperation> {
        self.operations.lock().unwrap().clone()
    }

    pub fn notification_calls(&self) -> Vec<(CharacteristicId, bool)> {
        self.notification_calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn accept(&self, operation: GattOperation) {
        self.operations.lock().unwrap().push(operation.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        match self.responder {
            Responder::Manual => (),
            Responder::Inline => self.respond(operation),
            Responder::Threaded => {
                let delay = self
                    .delays
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(Duration::from_millis(1));
                let this = self.this.upgrade().unwrap();
                thread::spawn(move || {
                    thread::sleep(delay);
                    this.respond(operation);
                });
            }
        }
    }

    /// Answers `operation` through the callback, as the remote device would.
    pub fn respond(&self, operation: GattOperation) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let status = *self.response_status.lock().unwrap();
        match operation {
            GattOperation::DiscoverServices => self.fire(|cb| cb.on_services_discovered(status)),
            GattOperation::ReadCharacteristic(id) => {
                let value = self.values.lock().unwrap().get(&id).cloned().unwrap_or_default();
                self.fire(|cb| cb.on_characteristic_read(id, value, status))
            }
            GattOperation::WriteCharacteristic(id, value, _) => {
                self.values.lock().unwrap().insert(id, value);
                self.fire(|cb| cb.on_characteristic_write(id, status))
            }
            GattOperation::ReadDescriptor(id) => {
                self.fire(|cb| cb.on_descriptor_read(id, vec![0x00, 0x00], status))
            }
            GattOperation::WriteDescriptor(id, _) => {
                self.fire(|cb| cb.on_descriptor_write(id, status))
            }
            GattOperation::RequestMtu(mtu) => {
                self.fire(|cb| cb.on_mtu_changed(mtu.min(517), status))
            }
            GattOperation::RequestRssi => self.fire(|cb| cb.on_read_remote_rssi(-60, status)),
        }
    }
}

impl NativeGatt for FakeGatt {
    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.responder != Responder::Manual {
            self.disconnected(GattStatus::SUCCESS);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.callback.lock().unwrap().take();
    }

    fn discover_services(&self) -> bool {
        self.accept(GattOperation::DiscoverServices);
        true
    }

    fn services(&self) -> Vec<ServiceInfo> {
        self.services.lock().unwrap().clone()
    }

    fn read_characteristic(&self, id: &CharacteristicId) -> bool {
        self.accept(GattOperation::ReadCharacteristic(*id));
        true
    }

    fn write_characteristic(
        &self,
        id: &CharacteristicId,
        value: &[u8],
        write_type: WriteType,
    ) -> i32 {
        self.accept(GattOperation::WriteCharacteristic(*id, value.to_vec(), write_type));
        0
    }

    fn read_descriptor(&self, id: &DescriptorId) -> bool {
        self.accept(GattOperation::ReadDescriptor(*id));
        true
    }

    fn write_descriptor(&self, id: &DescriptorId, value: &[u8]) -> i32 {
        self.accept(GattOperation::WriteDescriptor(*id, value.to_vec()));
        0
    }

    fn request_mtu(&self, mtu: u16) -> bool {
        self.accept(GattOperation::RequestMtu(mtu));
        true
    }

    fn read_remote_rssi(&self) -> bool {
        self.accept(GattOperation::RequestRssi);
        true
    }

    fn set_characteristic_notification(&self, id: &CharacteristicId, enable: bool) -> bool {
        self.notification_calls.lock().unwrap().push((*id, enable));
        true
    }
}

/// Runs every task on a fresh thread named `main-looper`.
#[derive(Default)]
pub struct LooperDispatcher {
    pub dispatched: AtomicUsize,
}

impl MainDispatcher for LooperDispatcher {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        thread::Builder::new()
            .name("main-looper".into())
            .spawn(task)
            .unwrap();
    }
}

/// Holds dispatched tasks until the test runs them.
#[derive(Default)]
pub struct HeldDispatcher {
    tasks: Mutex<Vec<Box<dyn FnOnce() + Send + 'static>>>,
}

impl HeldDispatcher {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn run_pending(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task();
        }
    }
}

impl MainDispatcher for HeldDispatcher {
    fn dispatch(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.tasks.lock().unwrap().push(task);
    }
}

pub fn characteristic(n: u16) -> CharacteristicId {
    use gatt_bridge::BluetoothUuidExt;
    CharacteristicId::new(
        gatt_bridge::Uuid::from_u16(0x180d),
        gatt_bridge::Uuid::from_u16(0x2a00 + n),
    )
}
