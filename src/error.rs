//! Error types and handling for ipcbus

use crate::{connection::ConnectionError, transport::TransportError};

/// Result type alias for ipcbus operations
pub type Result<T> = std::result::Result<T, IpcBusError>;

/// Error types for the messaging layer
///
/// Overload (full queues, exhausted pools) and dead peers are not errors here:
/// they are absorbed and counted by the component that sees them.
#[derive(Debug, thiserror::Error)]
pub enum IpcBusError {
    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Envelope type signature does not match the expected type
    #[error("Signature mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SignatureMismatch { expected: u32, actual: u32 },

    /// Raw transport buffer could not be parsed as an envelope
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A completion countdown already exists for this buffer
    #[error("Buffer {buffer_id} is already tracked")]
    AlreadyTracked { buffer_id: u64 },

    /// Buffer id is not part of the pool
    #[error("Unknown buffer: {buffer_id}")]
    UnknownBuffer { buffer_id: u64 },

    /// The pool was destroyed and can no longer hand out buffers
    #[error("Buffer pool destroyed: {name}")]
    PoolDestroyed { name: String },

    /// Delivery to a single endpoint failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Binding to a remote peer failed
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl IpcBusError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a signature mismatch error
    pub fn signature_mismatch(expected: u32, actual: u32) -> Self {
        Self::SignatureMismatch { expected, actual }
    }

    /// Create a malformed frame error
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a pool destroyed error
    pub fn pool_destroyed(name: impl Into<String>) -> Self {
        Self::PoolDestroyed { name: name.into() }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for IpcBusError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for IpcBusError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}
