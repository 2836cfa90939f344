use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{info, warn};

use super::callback::{CallbackBridge, LoggingCallback};
use super::connection::{Connection, ConnectionInner, HandleId};
use super::error::ErrorKind;
use super::native::{GattCallback, InlineDispatcher, MainDispatcher, NativeGatt, NativeStack};
use super::precondition::check_preconditions;
use super::scanner::{self, ScanBatches};
use super::types::{DeviceId, PlatformState, Purpose};
use super::util::defer;
use super::{Error, Result};

/// Wraps the callback before it is registered with the native stack.
pub type CallbackDecorator =
    Arc<dyn Fn(Arc<dyn GattCallback>) -> Arc<dyn GattCallback> + Send + Sync + 'static>;

/// The configuration for [Central].
#[derive(Clone)]
pub struct CentralConfig {
    /// Where connection initiation and callback registration run.
    pub dispatcher: Arc<dyn MainDispatcher>,
    /// Logs every native GATT event through [LoggingCallback].
    pub log_callbacks: bool,
    /// Requests this MTU once each connection reports `Connected`.
    pub request_mtu_on_connect: Option<u16>,
    /// How many events a slow subscriber may fall behind before losing the oldest.
    pub event_capacity: usize,
    /// Emits a batch on every flush interval even when nothing was found.
    pub emit_empty_batches: bool,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            dispatcher: Arc::new(InlineDispatcher),
            log_callbacks: false,
            request_mtu_on_connect: None,
            event_capacity: 32,
            emit_empty_batches: false,
        }
    }
}

impl CentralConfig {
    pub fn dispatcher(mut self, dispatcher: Arc<dyn MainDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn log_callbacks(mut self, enabled: bool) -> Self {
        self.log_callbacks = enabled;
        self
    }

    pub fn request_mtu_on_connect(mut self, mtu: Option<u16>) -> Self {
        self.request_mtu_on_connect = mtu;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn emit_empty_batches(mut self, enabled: bool) -> Self {
        self.emit_empty_batches = enabled;
        self
    }
}

impl std::fmt::Debug for CentralConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralConfig")
            .field("log_callbacks", &self.log_callbacks)
            .field("request_mtu_on_connect", &self.request_mtu_on_connect)
            .field("event_capacity", &self.event_capacity)
            .field("emit_empty_batches", &self.emit_empty_batches)
            .finish_non_exhaustive()
    }
}

/// Per-attempt options for [Central::connect].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Let the native stack connect whenever the device becomes available.
    pub auto_connect: bool,
    pub decorator: Option<CallbackDecorator>,
}

impl ConnectOptions {
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn decorator(mut self, decorator: CallbackDecorator) -> Self {
        self.decorator = Some(decorator);
        self
    }
}

/// The local BLE central role: scanning and connecting.
#[derive(Clone)]
pub struct Central {
    native: Arc<dyn NativeStack>,
    config: CentralConfig,
    registry: Arc<Registry>,
    scanning: Arc<AtomicBool>,
}

impl Central {
    pub fn new(native: Arc<dyn NativeStack>, config: CentralConfig) -> Self {
        Self {
            native,
            config,
            registry: Arc::new(Registry::default()),
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    /// Reads the platform state from the native stack.
    pub fn platform_state(&self) -> PlatformState {
        self.native.platform_state()
    }

    /// Checks whether a connect or scan attempt may proceed right now.
    pub fn check(&self, purpose: Purpose) -> Result<()> {
        check_preconditions(&self.native.platform_state(), purpose)
    }

    /// Asks the host to request the missing permissions; see [Central::check] for the outcome.
    pub fn request_permission(&self) {
        self.native.request_permission()
    }

    /// Starts connecting to `device`.
    ///
    /// Resolves as soon as the native stack accepted the attempt; use
    /// [Connection::wait_connected] or [Connection::connection_states] to learn when
    /// the link is up. No retries are made.
    pub async fn connect(&self, device: &DeviceId, options: ConnectOptions) -> Result<Connection> {
        self.check(Purpose::Connect)?;
        let handle = HandleId::next();
        self.registry.reserve(device, handle)?;
        let reservation = defer(|| self.registry.release(device, handle));

        let bridge = CallbackBridge::new(
            device.clone(),
            self.config.event_capacity,
            self.config.request_mtu_on_connect,
        );
        let mut callback: Arc<dyn GattCallback> = bridge.clone();
        if let Some(decorate) = &options.decorator {
            callback = decorate(callback);
        }
        if self.config.log_callbacks {
            callback = LoggingCallback::wrap(device.to_string(), callback);
        }

        info!(
            "connecting to {device} (handle {handle}, auto_connect: {})",
            options.auto_connect
        );
        let (sender, receiver) = async_channel::bounded::<Option<Arc<dyn NativeGatt>>>(1);
        let native = self.native.clone();
        let target = device.clone();
        let auto_connect = options.auto_connect;
        self.config.dispatcher.dispatch(Box::new(move || {
            let gatt = native.connect_gatt(&target, auto_connect, callback);
            if let Err(e) = sender.try_send(gatt) {
                if let Some(gatt) = e.into_inner() {
                    warn!("connect attempt to {target} was abandoned, closing its GATT client");
                    gatt.close();
                }
            }
        }));
        // if this future is dropped, an answer that already arrived is closed here and
        // a later one is closed by the task itself
        let abandoned = defer(|| {
            receiver.close();
            if let Ok(Some(gatt)) = receiver.try_recv() {
                warn!("connect attempt to {device} was abandoned, closing its GATT client");
                gatt.close();
            }
        });
        let answer = receiver.recv().await;
        abandoned.defuse();
        let gatt = answer.map_err(|_| {
            Error::new(
                ErrorKind::Internal,
                None,
                "the main dispatcher dropped the connect task",
            )
        })?;
        let Some(gatt) = gatt else {
            warn!("no GATT client for {device}");
            return Err(ErrorKind::ConnectionHandleUnavailable.into());
        };

        let connection = Connection::new(handle, device.clone(), gatt, bridge.clone());
        self.registry.promote(device, handle, &connection);
        reservation.defuse();
        let registry = Arc::downgrade(&self.registry);
        let device = device.clone();
        bridge.set_on_teardown(move || {
            if let Some(registry) = registry.upgrade() {
                registry.release(&device, handle);
            }
        });
        Ok(connection)
    }

    /// The live connection to `device`, if any.
    pub fn connection(&self, device: &DeviceId) -> Option<Connection> {
        self.registry.get(device)
    }

    /// All live connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.registry.all()
    }

    /// Starts scanning; results are delivered in batches every `flush_interval`.
    ///
    /// Only one scan may run per `Central`. Dropping the returned stream stops it.
    pub fn scan(&self, flush_interval: Duration) -> Result<ScanBatches> {
        self.check(Purpose::Scan)?;
        if flush_interval.is_zero() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                None,
                "the flush interval must not be zero",
            ));
        }
        if self.scanning.swap(true, Ordering::SeqCst) {
            return Err(ErrorKind::AlreadyScanning.into());
        }
        scanner::start_scan(
            self.native.clone(),
            self.scanning.clone(),
            flush_interval,
            self.config.emit_empty_batches,
        )
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

/// Tracks the one live handle allowed per device.
#[derive(Default)]
struct Registry {
    slots: Mutex<HashMap<DeviceId, Slot>>,
}

struct Slot {
    handle: HandleId,
    /// `None` while the connect attempt is still in progress.
    live: Option<(Weak<ConnectionInner>, Arc<CallbackBridge>)>,
}

impl Slot {
    fn is_alive(&self) -> bool {
        match &self.live {
            None => true,
            Some((conn, bridge)) => conn.strong_count() > 0 && !bridge.is_torn_down(),
        }
    }
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self, device: &DeviceId, handle: HandleId) -> Result<()> {
        let mut slots = self.lock();
        if slots.get(device).is_some_and(Slot::is_alive) {
            return Err(Error::new(
                ErrorKind::AlreadyConnected,
                None,
                format!("{device} already has a live connection"),
            ));
        }
        slots.insert(device.clone(), Slot { handle, live: None });
        Ok(())
    }

    fn promote(&self, device: &DeviceId, handle: HandleId, conn: &Connection) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(device).filter(|s| s.handle == handle) {
            slot.live = Some((Arc::downgrade(&conn.inner), conn.inner.bridge.clone()));
        }
    }

    fn release(&self, device: &DeviceId, handle: HandleId) {
        let mut slots = self.lock();
        if slots.get(device).is_some_and(|s| s.handle == handle) {
            slots.remove(device);
        }
    }

    fn get(&self, device: &DeviceId) -> Option<Connection> {
        let inner = {
            let slots = self.lock();
            let (conn, _) = slots.get(device)?.live.as_ref()?;
            conn.clone()
        };
        // upgrading outside the lock: dropping the last strong reference closes the
        // connection, which releases its slot
        let inner = inner.upgrade()?;
        let conn = Connection { inner };
        (!conn.inner.bridge.is_torn_down()).then_some(conn)
    }

    fn all(&self) -> Vec<Connection> {
        let weak: Vec<Weak<ConnectionInner>> = self
            .lock()
            .values()
            .filter_map(|slot| slot.live.as_ref().map(|(conn, _)| conn.clone()))
            .collect();
        weak.into_iter()
            .filter_map(|w| w.upgrade())
            .map(|inner| Connection { inner })
            .filter(|conn| !conn.inner.bridge.is_torn_down())
            .collect()
    }
}
