//! Keeps at most one GATT operation in flight per connection.
//!
//! The radio stack silently drops (or rejects) a request issued while another one
//! is still waiting for its callback, so every request goes through a FIFO queue
//! that is only advanced by the matching completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_channel::{Receiver, Sender};
use log::{debug, warn};

use crate::error::ErrorKind;
use crate::native::NativeGatt;
use crate::types::{CharacteristicId, DescriptorId, ServiceInfo, WriteType};
use crate::util::{BoolExt, IntExt};
use crate::{Error, Result};

/// A request to the remote GATT server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattOperation {
    DiscoverServices,
    ReadCharacteristic(CharacteristicId),
    WriteCharacteristic(CharacteristicId, Vec<u8>, WriteType),
    ReadDescriptor(DescriptorId),
    WriteDescriptor(DescriptorId, Vec<u8>),
    RequestMtu(u16),
    RequestRssi,
}

impl GattOperation {
    pub(crate) fn key(&self) -> OperationKey {
        match self {
            Self::DiscoverServices => OperationKey::DiscoverServices,
            Self::ReadCharacteristic(id) => OperationKey::ReadCharacteristic(*id),
            Self::WriteCharacteristic(id, _, _) => OperationKey::WriteCharacteristic(*id),
            Self::ReadDescriptor(id) => OperationKey::ReadDescriptor(*id),
            Self::WriteDescriptor(id, _) => OperationKey::WriteDescriptor(*id),
            Self::RequestMtu(_) => OperationKey::RequestMtu,
            Self::RequestRssi => OperationKey::RequestRssi,
        }
    }
}

/// Identifies which callback completes an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKey {
    DiscoverServices,
    ReadCharacteristic(CharacteristicId),
    WriteCharacteristic(CharacteristicId),
    ReadDescriptor(DescriptorId),
    WriteDescriptor(DescriptorId),
    RequestMtu,
    RequestRssi,
}

/// The successful result of a [GattOperation].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    Services(Vec<ServiceInfo>),
    Value(Vec<u8>),
    Written,
    Mtu(u16),
    Rssi(i16),
}

type Responder = Sender<Result<OperationOutput>>;

pub(crate) struct CommandSerializer {
    gatt: Arc<dyn NativeGatt>,
    state: Mutex<SerializerState>,
}

#[derive(Default)]
struct SerializerState {
    in_flight: Option<InFlight>,
    queue: VecDeque<Queued>,
    closed: bool,
}

struct Queued {
    id: u64,
    operation: GattOperation,
    responder: Responder,
}

struct InFlight {
    id: u64,
    key: OperationKey,
    responder: Responder,
}

impl CommandSerializer {
    pub fn new(gatt: Arc<dyn NativeGatt>) -> Arc<Self> {
        Arc::new(Self {
            gatt,
            state: Mutex::new(SerializerState::default()),
        })
    }

    pub fn gatt(&self) -> &Arc<dyn NativeGatt> {
        &self.gatt
    }

    fn lock_state(&self) -> MutexGuard<'_, SerializerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `operation`, dispatching it right away if nothing is in flight.
    pub fn submit(self: &Arc<Self>, operation: GattOperation) -> OperationTicket {
        static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(0);

        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        let (responder, receiver) = async_channel::bounded(1);
        let ticket = OperationTicket {
            id,
            receiver,
            serializer: Arc::downgrade(self),
            settled: false,
        };
        {
            let mut state = self.lock_state();
            if state.closed {
                let _ = responder.try_send(Err(ErrorKind::ConnectionClosed.into()));
                return ticket;
            }
            state.queue.push_back(Queued {
                id,
                operation,
                responder,
            });
        }
        self.pump();
        ticket
    }

    /// Dispatches queued operations until one is accepted by the native stack.
    ///
    /// Native calls are made without holding the state lock, so a callback that fires
    /// synchronously from inside the call can complete the operation.
    fn pump(&self) {
        loop {
            let next = {
                let mut state = self.lock_state();
                if state.closed || state.in_flight.is_some() {
                    return;
                }
                let Some(next) = state.queue.pop_front() else {
                    return;
                };
                state.in_flight = Some(InFlight {
                    id: next.id,
                    key: next.operation.key(),
                    responder: next.responder.clone(),
                });
                next
            };
            debug!("dispatching {:?}", next.operation);
            let Err(e) = self.dispatch(&next.operation) else {
                return;
            };
            warn!("native stack refused {:?}: {e}", next.operation);
            let refused = {
                let mut state = self.lock_state();
                let ours = state
                    .in_flight
                    .as_ref()
                    .is_some_and(|in_flight| in_flight.id == next.id);
                if ours {
                    state.in_flight = None;
                }
                ours
            };
            if refused {
                let _ = next.responder.try_send(Err(e));
            }
        }
    }

    fn dispatch(&self, operation: &GattOperation) -> Result<()> {
        let gatt = &self.gatt;
        match operation {
            GattOperation::DiscoverServices => gatt.discover_services().non_false(),
            GattOperation::ReadCharacteristic(id) => gatt.read_characteristic(id).non_false(),
            GattOperation::WriteCharacteristic(id, value, write_type) => gatt
                .write_characteristic(id, value, *write_type)
                .check_status_code(),
            GattOperation::ReadDescriptor(id) => gatt.read_descriptor(id).non_false(),
            GattOperation::WriteDescriptor(id, value) => {
                gatt.write_descriptor(id, value).check_status_code()
            }
            GattOperation::RequestMtu(mtu) => gatt.request_mtu(*mtu).non_false(),
            GattOperation::RequestRssi => gatt.read_remote_rssi().non_false(),
        }
    }

    /// Resolves the in-flight operation if it matches `key`, then advances the queue.
    ///
    /// Returns `false` for completions nobody is waiting for, e.g. an MTU change
    /// initiated by the peripheral.
    pub fn complete(&self, key: OperationKey, result: Result<OperationOutput>) -> bool {
        let in_flight = {
            let mut state = self.lock_state();
            match state.in_flight.as_ref() {
                Some(in_flight) if in_flight.key == key => state.in_flight.take(),
                _ => None,
            }
        };
        let Some(in_flight) = in_flight else {
            debug!("no pending operation for {key:?}");
            return false;
        };
        if in_flight.responder.try_send(result).is_err() {
            debug!("result of an abandoned {key:?} dropped");
        }
        self.pump();
        true
    }

    /// Fails the in-flight and all queued operations and rejects future submissions.
    pub fn fail_all(&self, error: Error) {
        let (in_flight, queue) = {
            let mut state = self.lock_state();
            state.closed = true;
            (state.in_flight.take(), std::mem::take(&mut state.queue))
        };
        let count = usize::from(in_flight.is_some()) + queue.len();
        if count > 0 {
            debug!("failing {count} pending operation(s): {error}");
        }
        let responders = in_flight
            .map(|f| f.responder)
            .into_iter()
            .chain(queue.into_iter().map(|q| q.responder));
        for responder in responders {
            let _ = responder.try_send(Err(error.clone()));
        }
    }

    /// Removes a not yet dispatched operation from the queue.
    fn cancel(&self, id: u64) {
        let mut state = self.lock_state();
        if let Some(pos) = state.queue.iter().position(|q| q.id == id) {
            let removed = state.queue.remove(pos);
            debug!("cancelled queued {:?}", removed.map(|q| q.operation));
        }
    }

    /// Number of operations in flight or queued.
    pub fn pending(&self) -> usize {
        let state = self.lock_state();
        usize::from(state.in_flight.is_some()) + state.queue.len()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }
}

/// Pending result of a submitted [GattOperation].
///
/// Dropping the ticket before the operation is dispatched removes it from the queue;
/// once dispatched, the operation runs to completion and its result is discarded.
pub struct OperationTicket {
    id: u64,
    receiver: Receiver<Result<OperationOutput>>,
    serializer: Weak<CommandSerializer>,
    settled: bool,
}

impl OperationTicket {
    /// Waits for the matching callback (or for the connection to close).
    pub async fn wait(mut self) -> Result<OperationOutput> {
        let result = self.receiver.recv().await;
        self.settled = true;
        result.unwrap_or_else(|_| Err(ErrorKind::ConnectionClosed.into()))
    }

    /// Keeps the operation queued without waiting for its result.
    pub fn detach(mut self) {
        self.settled = true;
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(serializer) = self.serializer.upgrade() {
            serializer.cancel(self.id);
        }
    }
}
