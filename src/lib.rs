//! Asynchronous bridge over a callback-driven BLE GATT client stack.
//!
//! The platform stack (modelled on Android's `BluetoothGatt` API) is reached through the
//! [NativeStack] and [NativeGatt] traits. On top of it this crate provides:
//!
//! - precondition checks run before every connect or scan attempt ([check_preconditions]);
//! - a two-phase connect: [Central::connect] resolves once the native stack accepted the
//!   attempt, the link itself is reported on [Connection::connection_states];
//! - one callback object per connection whose events are republished on
//!   multi-subscriber streams;
//! - a per-connection operation queue keeping exactly one GATT request in flight;
//! - scanning with results delivered in batches ([Central::scan]).
//!
//! Futures and streams returned here are executor-agnostic.

pub use advertisement::{AdvertisementData, ManufacturerData};
pub use btuuid::BluetoothUuidExt;
pub use callback::{CharacteristicValue, GattEvent, LoggingCallback};
pub use central::{CallbackDecorator, Central, CentralConfig, ConnectOptions};
pub use characteristic::Characteristic;
pub use connection::{Connection, HandleId, DEFAULT_MTU};
pub use descriptor::Descriptor;
pub use error::{AttError, Error, ErrorKind, GattStatus};
pub use event_stream::{EventReceiver, EventStream};
pub use native::{
    GattCallback, InlineDispatcher, MainDispatcher, NativeGatt, NativeStack, ScanCallback,
};
pub use precondition::check_preconditions;
pub use scanner::{ScanBatches, DEFAULT_FLUSH_INTERVAL};
pub use serializer::{GattOperation, OperationOutput, OperationTicket};
pub use service::Service;

/// Convenience alias for a result with [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub use uuid::Uuid;
pub mod btuuid;
pub mod error;
mod types;
pub use types::*;

mod advertisement;
mod callback;
mod central;
mod characteristic;
mod connection;
mod descriptor;
mod event_stream;
mod native;
mod precondition;
mod scanner;
mod serializer;
mod service;
mod util;
