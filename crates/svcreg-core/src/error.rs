//! Error types for the svcreg service registry.
//!
//! Codec and address errors are recoverable: multi-node operations record them
//! and carry on with the remaining nodes, and query/watch paths skip the offending
//! record. Transport errors surface to the caller of the enclosing operation.
//! `WatcherStopped` is the defined end-of-stream of a watcher, not a failure.

use thiserror::Error;

/// Result type alias using RegistryError as the error type.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Top-level error type for all registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Service descriptor could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Node address is not a valid `host:port`
    #[error("Invalid node address '{address}': {reason}")]
    AddressParse { address: String, reason: String },

    /// The multicast transport rejected an operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Watcher has been stopped; terminal for `next()`
    #[error("watcher stopped")]
    WatcherStopped,

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RegistryError {
    /// Creates an address parse error.
    pub fn address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressParse {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for the watcher end-of-stream signal.
    pub fn is_stopped(&self) -> bool {
        matches!(self, RegistryError::WatcherStopped)
    }

    /// Returns true if the error concerns a single record or node and the
    /// surrounding operation can continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RegistryError::Codec(_) | RegistryError::AddressParse { .. }
        )
    }
}

/// Errors from the text-field codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode service descriptor: {reason}")]
    Encode { reason: String },

    #[error("failed to decode service descriptor: {reason}")]
    Decode { reason: String },
}

impl CodecError {
    pub fn encode(reason: impl ToString) -> Self {
        Self::Encode {
            reason: reason.to_string(),
        }
    }

    pub fn decode(reason: impl ToString) -> Self {
        Self::Decode {
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by the multicast transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport failed to initialize
    #[error("Failed to initialize transport: {reason}")]
    Init { reason: String },

    /// Failed to advertise a record
    #[error("Failed to advertise record '{name}': {reason}")]
    Advertise { name: String, reason: String },

    /// Failed to withdraw a record
    #[error("Failed to shut down record '{name}': {reason}")]
    Shutdown { name: String, reason: String },

    /// Failed to query for records
    #[error("Failed to browse for '{service}': {reason}")]
    Browse { service: String, reason: String },

    /// Continuous listen failed
    #[error("Listen failed: {reason}")]
    Listen { reason: String },
}

impl TransportError {
    pub fn advertise(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Advertise {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn shutdown(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Shutdown {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn browse(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Browse {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn listen(reason: impl ToString) -> Self {
        Self::Listen {
            reason: reason.to_string(),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
