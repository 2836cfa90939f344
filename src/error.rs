//! Defines error types.

use std::fmt::Debug;
use std::num::NonZeroI32;

/// Status code delivered by the native stack with every GATT callback.
///
/// `0` means success; Android reports the infamous `133` (`GATT_ERROR`) for most
/// link-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattStatus(pub i32);

impl GattStatus {
    /// The operation completed successfully.
    pub const SUCCESS: GattStatus = GattStatus(0);
    /// Generic failure reported by the Android stack for link-level errors.
    pub const GATT_ERROR: GattStatus = GattStatus(133);
    /// A GATT operation failed without a more specific reason.
    pub const FAILURE: GattStatus = GattStatus(257);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Converts the status into `Ok(())` or the corresponding [Error].
    pub fn check(self) -> Result<(), Error> {
        if self.is_success() {
            Ok(())
        } else {
            Err(NativeError::GattStatus(self).into())
        }
    }
}

impl std::fmt::Display for GattStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GATT status {} (0x{:x})", self.0, self.0)
    }
}

/// Internal error type describing what the native stack reported.
#[derive(Clone, Debug)]
pub enum NativeError {
    GattStatus(GattStatus),
    BluetoothStatusCode(BluetoothStatusCode),
    ScanFailed(i32),
    CallReturnedFalse,
}

impl std::error::Error for NativeError {}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GattStatus(status) => match u8::try_from(status.0) {
                Ok(code) => write!(f, "GATT error: {}", AttError::from_u8(code)),
                Err(_) => write!(f, "GATT error: {status}"),
            },
            Self::BluetoothStatusCode(st) => write!(f, "{st}"),
            Self::ScanFailed(code) => write!(f, "scan failed with native error code {code}"),
            Self::CallReturnedFalse => write!(f, "native call unexpectedly returned false"),
        }
    }
}

impl From<AttError> for NativeError {
    fn from(att_error: AttError) -> Self {
        Self::GattStatus(GattStatus(att_error.as_u8().into()))
    }
}

impl From<AttError> for crate::Error {
    fn from(e: AttError) -> Self {
        NativeError::from(e).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            source: None,
            message: String::new(),
        }
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        use BluetoothStatusCode::*;
        let kind = match &err {
            NativeError::GattStatus(status) => match u8::try_from(status.0) {
                Ok(code) => ErrorKind::Protocol(AttError::from_u8(code)),
                Err(_) => ErrorKind::Other,
            },
            NativeError::BluetoothStatusCode(code) => match code {
                NotAllowed => ErrorKind::NotAuthorized,
                NotEnabled => ErrorKind::BluetoothIsTurnedOff,
                NotBonded => ErrorKind::NotAuthorized,
                GattWriteNotAllowed => ErrorKind::NotAuthorized,
                GattWriteBusy => ErrorKind::NotReady,
                MissingBluetoothConnectPermission => ErrorKind::NotAuthorized,
                ProfileServiceNotBound => ErrorKind::Other,
                Unknown => ErrorKind::Other,
                FeatureNotSupported => ErrorKind::NotSupported,
                UnknownError(_) => ErrorKind::Other,
            },
            NativeError::ScanFailed(_) => ErrorKind::ScanFailed,
            NativeError::CallReturnedFalse => ErrorKind::Internal,
        };
        let msg = err.to_string();
        Error::new(kind, Some(err), msg)
    }
}

/// Android `BluetoothStatusCodes` constants returned by the newer write APIs.
pub mod status_codes {
    pub const SUCCESS: i32 = 0;
    pub const ERROR_BLUETOOTH_NOT_ENABLED: i32 = 1;
    pub const ERROR_BLUETOOTH_NOT_ALLOWED: i32 = 2;
    pub const ERROR_DEVICE_NOT_BONDED: i32 = 3;
    pub const ERROR_MISSING_BLUETOOTH_CONNECT_PERMISSION: i32 = 6;
    pub const ERROR_PROFILE_SERVICE_NOT_BOUND: i32 = 9;
    pub const FEATURE_NOT_SUPPORTED: i32 = 11;
    pub const ERROR_GATT_WRITE_NOT_ALLOWED: i32 = 200;
    pub const ERROR_GATT_WRITE_REQUEST_BUSY: i32 = 201;
    pub const ERROR_UNKNOWN: i32 = i32::MAX;
}

/// See <https://developer.android.com/reference/android/bluetooth/BluetoothStatusCodes>.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BluetoothStatusCode {
    NotAllowed,
    NotEnabled,
    NotBonded,
    GattWriteNotAllowed,
    GattWriteBusy,
    MissingBluetoothConnectPermission,
    ProfileServiceNotBound,
    Unknown,
    FeatureNotSupported,
    UnknownError(NonZeroI32),
}

impl std::fmt::Display for BluetoothStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAllowed => f.write_str("call not initiated by the system or the active user"),
            Self::NotEnabled => f.write_str("Bluetooth is not enabled"),
            Self::NotBonded => f.write_str("the device is not bonded"),
            Self::GattWriteNotAllowed => f.write_str("the remote device does not permit this write"),
            Self::GattWriteBusy => f.write_str("the remote device is busy with another write"),
            Self::MissingBluetoothConnectPermission => {
                f.write_str("the BLUETOOTH_CONNECT permission is missing")
            }
            Self::ProfileServiceNotBound => f.write_str("the profile service is not bound"),
            Self::Unknown => f.write_str("unknown Bluetooth error"),
            Self::FeatureNotSupported => f.write_str("the feature is not supported"),
            Self::UnknownError(code) => write!(f, "Bluetooth status code {code}"),
        }
    }
}

impl From<NonZeroI32> for BluetoothStatusCode {
    fn from(code: NonZeroI32) -> Self {
        use status_codes::*;
        match code.get() {
            ERROR_BLUETOOTH_NOT_ALLOWED => Self::NotAllowed,
            ERROR_BLUETOOTH_NOT_ENABLED => Self::NotEnabled,
            ERROR_DEVICE_NOT_BONDED => Self::NotBonded,
            ERROR_GATT_WRITE_NOT_ALLOWED => Self::GattWriteNotAllowed,
            ERROR_GATT_WRITE_REQUEST_BUSY => Self::GattWriteBusy,
            ERROR_MISSING_BLUETOOTH_CONNECT_PERMISSION => Self::MissingBluetoothConnectPermission,
            ERROR_PROFILE_SERVICE_NOT_BOUND => Self::ProfileServiceNotBound,
            ERROR_UNKNOWN => Self::Unknown,
            FEATURE_NOT_SUPPORTED => Self::FeatureNotSupported,
            _ => Self::UnknownError(code),
        }
    }
}

/// The error type for Bluetooth operations.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<NativeError>,
    message: String,
}

impl Error {
    pub(crate) fn new<S: ToString>(
        kind: ErrorKind,
        source: Option<NativeError>,
        message: S,
    ) -> Self {
        Error {
            kind,
            source,
            message: message.to_string(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns what the native stack reported, if this error came from it.
    pub fn native(&self) -> Option<&NativeError> {
        self.source.as_ref()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind),
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message),
            (_, Some(err)) => write!(f, "{}: {}", &self.kind, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = x;
            x
        })
    }
}

/// A list of general categories of Bluetooth error.
///
/// The first group is what a presentation layer is expected to match on
/// to decide which prompt to show.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// the location permission required for BLE is not granted
    NeedLocationPermission,
    /// the Bluetooth adapter is turned off
    BluetoothIsTurnedOff,
    /// the location service is disabled
    LocationServiceDisabled,
    /// the device does not support Bluetooth LE
    DeviceDoesNotSupportBluetooth,
    /// the native stack returned no GATT handle
    ConnectionHandleUnavailable,
    /// the connection was closed
    ConnectionClosed,
    /// a connection to this device is already alive
    AlreadyConnected,
    /// the Bluetooth adapter is already scanning
    AlreadyScanning,
    /// connection failed
    ConnectionFailed,
    /// the scan was aborted by the native stack
    ScanFailed,
    /// the Bluetooth operation is unsupported
    NotSupported,
    /// permission denied
    NotAuthorized,
    /// not ready
    NotReady,
    /// invalid parameter
    InvalidParameter,
    /// protocol error: {0}
    Protocol(AttError),
    /// an internal error has occurred
    Internal,
    /// error
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NeedLocationPermission => {
                f.write_str("the location permission required for BLE is not granted")
            }
            ErrorKind::BluetoothIsTurnedOff => f.write_str("the Bluetooth adapter is turned off"),
            ErrorKind::LocationServiceDisabled => f.write_str("the location service is disabled"),
            ErrorKind::DeviceDoesNotSupportBluetooth => {
                f.write_str("the device does not support Bluetooth LE")
            }
            ErrorKind::ConnectionHandleUnavailable => {
                f.write_str("the native stack returned no GATT handle")
            }
            ErrorKind::ConnectionClosed => f.write_str("the connection was closed"),
            ErrorKind::AlreadyConnected => f.write_str("a connection to this device is already alive"),
            ErrorKind::AlreadyScanning => f.write_str("the Bluetooth adapter is already scanning"),
            ErrorKind::ConnectionFailed => f.write_str("connection failed"),
            ErrorKind::ScanFailed => f.write_str("the scan was aborted by the native stack"),
            ErrorKind::NotSupported => f.write_str("the Bluetooth operation is unsupported"),
            ErrorKind::NotAuthorized => f.write_str("permission denied"),
            ErrorKind::NotReady => f.write_str("not ready"),
            ErrorKind::InvalidParameter => f.write_str("invalid parameter"),
            ErrorKind::Protocol(err) => write!(f, "protocol error: {err}"),
            ErrorKind::Internal => f.write_str("an internal error has occurred"),
            ErrorKind::Other => f.write_str("error"),
        }
    }
}

/// Bluetooth Attribute Protocol error. See the Bluetooth Core Specification, Vol 3, Part F, §3.4.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttError(u8);

impl AttError {
    pub const SUCCESS: AttError = AttError(0x00);
    pub const INVALID_HANDLE: AttError = AttError(0x01);
    pub const READ_NOT_PERMITTED: AttError = AttError(0x02);
    pub const WRITE_NOT_PERMITTED: AttError = AttError(0x03);
    pub const INVALID_PDU: AttError = AttError(0x04);
    pub const INSUFFICIENT_AUTHENTICATION: AttError = AttError(0x05);
    pub const REQUEST_NOT_SUPPORTED: AttError = AttError(0x06);
    pub const INVALID_OFFSET: AttError = AttError(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: AttError = AttError(0x08);
    pub const PREPARE_QUEUE_FULL: AttError = AttError(0x09);
    pub const ATTRIBUTE_NOT_FOUND: AttError = AttError(0x0a);
    pub const ATTRIBUTE_NOT_LONG: AttError = AttError(0x0b);
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: AttError = AttError(0x0c);
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: AttError = AttError(0x0d);
    pub const UNLIKELY_ERROR: AttError = AttError(0x0e);
    pub const INSUFFICIENT_ENCRYPTION: AttError = AttError(0x0f);
    pub const UNSUPPORTED_GROUP_TYPE: AttError = AttError(0x10);
    pub const INSUFFICIENT_RESOURCES: AttError = AttError(0x11);
    pub const DATABASE_OUT_OF_SYNC: AttError = AttError(0x12);
    pub const VALUE_NOT_ALLOWED: AttError = AttError(0x13);
    /// Android's catch-all `GATT_ERROR` (133), reported for most link-level failures.
    pub const ANDROID_GATT_ERROR: AttError = AttError(0x85);
    pub const WRITE_REQUEST_REJECTED: AttError = AttError(0xfc);
    pub const CCCD_IMPROPERLY_CONFIGURED: AttError = AttError(0xfd);
    pub const PROCEDURE_ALREADY_IN_PROGRESS: AttError = AttError(0xfe);
    pub const OUT_OF_RANGE: AttError = AttError(0xff);

    /// Converts a [`u8`] value to an [`AttError`].
    pub const fn from_u8(val: u8) -> Self {
        AttError(val)
    }

    /// Converts an [`AttError`] to a [`u8`] value.
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Checks if the error code is in the application error range.
    pub fn is_application(&self) -> bool {
        (0x80..0xa0).contains(&self.0)
    }

    /// Checks if the error code is in the common profile and service range.
    pub fn is_common_profile_or_service(&self) -> bool {
        self.0 >= 0xe0
    }
}

impl std::fmt::Display for AttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            AttError::SUCCESS => "success",
            AttError::INVALID_HANDLE => "invalid handle",
            AttError::READ_NOT_PERMITTED => "read not permitted",
            AttError::WRITE_NOT_PERMITTED => "write not permitted",
            AttError::INVALID_PDU => "invalid PDU",
            AttError::INSUFFICIENT_AUTHENTICATION => "insufficient authentication",
            AttError::REQUEST_NOT_SUPPORTED => "request not supported",
            AttError::INVALID_OFFSET => "invalid offset",
            AttError::INSUFFICIENT_AUTHORIZATION => "insufficient authorization",
            AttError::PREPARE_QUEUE_FULL => "prepare queue full",
            AttError::ATTRIBUTE_NOT_FOUND => "attribute not found",
            AttError::ATTRIBUTE_NOT_LONG => "attribute not long",
            AttError::INSUFFICIENT_ENCRYPTION_KEY_SIZE => "insufficient encryption key size",
            AttError::INVALID_ATTRIBUTE_VALUE_LENGTH => "invalid attribute value length",
            AttError::UNLIKELY_ERROR => "unlikely error",
            AttError::INSUFFICIENT_ENCRYPTION => "insufficient encryption",
            AttError::UNSUPPORTED_GROUP_TYPE => "unsupported group type",
            AttError::INSUFFICIENT_RESOURCES => "insufficient resources",
            AttError::DATABASE_OUT_OF_SYNC => "database out of sync",
            AttError::VALUE_NOT_ALLOWED => "value not allowed",
            AttError::ANDROID_GATT_ERROR => "GATT_ERROR",
            AttError::WRITE_REQUEST_REJECTED => "write request rejected",
            AttError::CCCD_IMPROPERLY_CONFIGURED => "CCCD improperly configured",
            AttError::PROCEDURE_ALREADY_IN_PROGRESS => "procedure already in progress",
            AttError::OUT_OF_RANGE => "out of range",
            _ if self.is_application() => "application error",
            _ => "unknown error",
        };
        write!(f, "{name} (0x{:02x})", self.0)
    }
}

impl From<u8> for AttError {
    fn from(number: u8) -> Self {
        AttError(number)
    }
}

impl From<AttError> for u8 {
    fn from(val: AttError) -> Self {
        val.0
    }
}
