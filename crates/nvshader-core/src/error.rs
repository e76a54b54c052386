//! Error types for nvshader.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for nvshader operations.
pub type Result<T> = std::result::Result<T, NvError>;

/// Errors that can occur in nvshader operations.
///
/// This is a closed set: every failure surfaced to callers is one of these
/// kinds. Best-effort paths (scanning, discovery) swallow per-item failures
/// internally and never raise.
#[derive(Error, Debug)]
pub enum NvError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The home directory could not be determined.
    #[error("home directory is not set")]
    NoHomeDir,

    /// A typed cache file does not meet its format invariants.
    #[error("invalid cache file {path}: {reason}")]
    InvalidCacheFile { path: PathBuf, reason: String },

    /// A typed cache file's payload exceeds the in-memory size limit.
    #[error("cache file too large: {0} bytes")]
    CacheTooLarge(u64),

    /// An archive manifest is missing fields or is not valid JSON.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// An archive manifest declares a version this build cannot restore.
    #[error("unsupported manifest version {0}")]
    UnsupportedManifest(u64),

    /// A package manifest has the wrong shape.
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// No `fossilize_replay` binary could be located.
    #[error("fossilize_replay binary not found")]
    FossilizeNotFound,

    /// OS-level socket creation failed.
    #[error("failed to create socket: {0}")]
    SocketCreateFailed(#[source] std::io::Error),

    /// Binding a socket to its local address failed.
    #[error("failed to bind socket: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Putting a TCP socket into listening mode failed.
    #[error("failed to listen: {0}")]
    ListenFailed(#[source] std::io::Error),

    /// Connecting to a peer failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending on a socket failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// A peer address is not a valid dotted-quad IPv4 address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl NvError {
    /// Build an [`NvError::InvalidCacheFile`] for `path`.
    #[must_use]
    pub fn invalid_cache(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidCacheFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
