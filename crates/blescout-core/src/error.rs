//! Error types for blescout-core.
//!
//! Propagation policy: scan-start and connect failures surface to the caller
//! and roll back any optimistic state. Catalog-retrieval and per-characteristic
//! read failures are contained to their own entity and never abort siblings.
//! Nothing here is fatal to the process; every failure is recoverable by a
//! user-retriggered retry (re-scan, re-connect, re-read).

use thiserror::Error;

/// Errors that can occur while driving BLE peripherals.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter available on this system.
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    /// A scan was requested while one is already running.
    #[error("a scan is already in progress")]
    AlreadyScanning,

    /// The adapter rejected the scan request.
    #[error("scan could not be started: {reason}")]
    ScanFailed {
        /// Description of the rejection.
        reason: String,
    },

    /// Connection failed with a structured reason.
    #[error("connection failed: {reason}")]
    ConnectFailed {
        /// The device that failed to connect, if known.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectFailureReason,
    },

    /// Operation attempted against a device that is not connected.
    #[error("not connected to device {device_id}")]
    NotConnected {
        /// The device identifier.
        device_id: String,
    },

    /// Read requested before a service catalog was attached.
    #[error("no service catalog attached for device {device_id}")]
    NoCatalog {
        /// The device identifier.
        device_id: String,
    },

    /// Read requested against a catalog with no read-eligible entries.
    #[error("no readable characteristics on device {device_id}")]
    NoReadableCharacteristics {
        /// The device identifier.
        device_id: String,
    },

    /// Service catalog retrieval failed. Non-fatal: the device stays
    /// connected without a catalog.
    #[error("service catalog retrieval failed for {device_id}: {reason}")]
    CatalogRetrievalFailed {
        /// The device identifier.
        device_id: String,
        /// Description of the failure.
        reason: String,
    },

    /// No known peripheral matches the identifier.
    #[error("device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// The requested characteristic is not present on the peripheral.
    #[error("characteristic not found: {characteristic_id} in service {service_id}")]
    CharacteristicNotFound {
        /// Service identifier.
        service_id: String,
        /// Characteristic identifier.
        characteristic_id: String,
    },

    /// A service or characteristic identifier could not be parsed.
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier {
        /// The offending identifier.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A single characteristic read failed.
    #[error("read failed for {service_id}/{characteristic_id}: {reason}")]
    ReadFailed {
        /// Service identifier.
        service_id: String,
        /// Characteristic identifier.
        characteristic_id: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// The device rejected the connection.
    Rejected,
    /// The connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(
        service_id: impl Into<String>,
        characteristic_id: impl Into<String>,
    ) -> Self {
        Self::CharacteristicNotFound {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
        }
    }

    /// Create a connection failure with a structured reason.
    pub fn connect_failed(device_id: Option<String>, reason: ConnectFailureReason) -> Self {
        Self::ConnectFailed { device_id, reason }
    }

    /// Create a per-characteristic read failure.
    pub fn read_failed(
        service_id: impl Into<String>,
        characteristic_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ReadFailed {
            service_id: service_id.into(),
            characteristic_id: characteristic_id.into(),
            reason: reason.into(),
        }
    }

    /// Normalize any error into a connect failure for the given device.
    ///
    /// Already-structured connect failures pass through unchanged.
    pub(crate) fn into_connect_failure(self, device_id: &str) -> Self {
        match self {
            Self::ConnectFailed { .. } => self,
            Self::Bluetooth(e) => Self::ConnectFailed {
                device_id: Some(device_id.to_string()),
                reason: ConnectFailureReason::BleError(e.to_string()),
            },
            other => Self::ConnectFailed {
                device_id: Some(device_id.to_string()),
                reason: ConnectFailureReason::Other(other.to_string()),
            },
        }
    }
}

/// Result type alias using blescout-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
