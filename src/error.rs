//! Error types for the remote operation core

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio hardware errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Media channel transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Media transport already running")]
    AlreadyRunning,
}

/// Control channel errors.
///
/// Every variant except `NotConnected` is fatal to the session that
/// produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device unreachable: no connection within {0} ms")]
    Unreachable(u64),

    #[error("Authentication timed out after {0} ms")]
    AuthTimeout(u64),

    #[error("Connection rejected by device")]
    OpenRejected,

    #[error("Login rejected by device")]
    LoginRejected,

    #[error("Connection closed by peer")]
    ClosedByPeer,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Device sent {0} bytes without a frame terminator")]
    FrameTooLong(usize),
}

/// Local credential validation errors, raised before any network I/O
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("{0} must not be empty")]
    Empty(CredentialField),

    #[error("{field} is {len} bytes, maximum is {max}")]
    TooLong {
        field: CredentialField,
        len: usize,
        max: usize,
    },

    #[error("{0} contains characters outside printable ASCII")]
    NotPrintableAscii(CredentialField),
}

/// Which credential failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Account,
    Password,
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialField::Account => f.write_str("Account"),
            CredentialField::Password => f.write_str("Password"),
        }
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
