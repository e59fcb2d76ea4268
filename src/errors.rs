// SPDX-License-Identifier: MPL-2.0

//! Error types for the frame provider

use std::fmt;

/// Result type alias using ProviderError
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by device sessions, the acquisition loop and the
/// single-slot transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    // ===== Session construction =====
    /// The device offers no format satisfying the validity predicate
    NoCompatibleFormat,
    /// No device matches the requested identifier
    DeviceNotFound(String),
    /// The device exists but could not be opened or configured
    DeviceOpenFailed(String),

    // ===== Misuse =====
    /// Operation not valid in the current state (closed session, stop while idle)
    InvalidState(String),
    /// `start` called while the loop is already running
    AlreadyRunning,
    /// `start` called before the previous read step acknowledged a stop
    StopInProgress,

    // ===== Reads =====
    /// Read attempted while the stream is deselected
    NotActive,
    /// The device delivered no sample this time; retrying is fine
    ReadTransientFailure,
    /// The device handle is dead and must be re-opened
    DeviceInvalidated,

    // ===== Transform =====
    /// Input/output types have not been negotiated
    TypesNotSet,
    /// The transform already holds a sample
    SlotOccupied,
    /// No sample is held, submit input first
    NeedsMoreInput,
    /// Submitted sample carries more than one buffer
    TooManyBuffers,
    /// Submitted sample carries no buffer at all
    EmptySample,

    // ===== Enumeration =====
    /// No more media types for this stream or index
    NoMoreTypes,
    /// Stream index does not exist
    InvalidStream,
    /// Media type not accepted by this stage
    InvalidMediaType,

    // ===== General =====
    /// Query or control not supported by the device
    NotSupported(String),
    /// Underlying I/O error
    Io(String),
    /// Configuration could not be loaded
    Config(String),
}

impl ProviderError {
    /// Whether this error means the device handle can no longer be used
    pub fn is_device_invalidated(&self) -> bool {
        matches!(self, ProviderError::DeviceInvalidated)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NoCompatibleFormat => write!(f, "No compatible capture format"),
            ProviderError::DeviceNotFound(id) => write!(f, "Device not found: {}", id),
            ProviderError::DeviceOpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            ProviderError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            ProviderError::AlreadyRunning => write!(f, "Acquisition already running"),
            ProviderError::StopInProgress => write!(f, "Previous stop still in progress"),
            ProviderError::NotActive => write!(f, "Stream is not active"),
            ProviderError::ReadTransientFailure => write!(f, "No sample available"),
            ProviderError::DeviceInvalidated => write!(f, "Device handle invalidated"),
            ProviderError::TypesNotSet => write!(f, "Media types not set"),
            ProviderError::SlotOccupied => write!(f, "Transform already holds a sample"),
            ProviderError::NeedsMoreInput => write!(f, "Transform needs more input"),
            ProviderError::TooManyBuffers => write!(f, "Sample has more than one buffer"),
            ProviderError::EmptySample => write!(f, "Sample has no buffers"),
            ProviderError::NoMoreTypes => write!(f, "No more media types"),
            ProviderError::InvalidStream => write!(f, "Invalid stream index"),
            ProviderError::InvalidMediaType => write!(f, "Media type not accepted"),
            ProviderError::NotSupported(what) => write!(f, "Not supported: {}", what),
            ProviderError::Io(msg) => write!(f, "I/O error: {}", msg),
            ProviderError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Config(err.to_string())
    }
}
