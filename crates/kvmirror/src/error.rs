//! # Mirror Error Types
//!
//! Error types for mirror and sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mirror Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Remote I/O    │  │     Caller Input        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  Validation             │ │
//! │  │  InvalidUrl     │  │  Decode         │  │                         │ │
//! │  │  ConfigLoad/Save│  │  RemoteWrite    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  repopulate / set / delete   → surface the first error to the caller   │
//! │  background_update           → never surfaces; backs off and retries   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use kvmirror_core::ValidationError;
use thiserror::Error;

/// Result type alias for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Mirror error type covering all possible failures.
///
/// No variant is fatal: the worst outcome of any of them is a stale mirror,
/// never a corrupted one.
#[derive(Debug, Error)]
pub enum MirrorError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid mirror configuration.
    #[error("Invalid mirror configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote store URL.
    #[error("Invalid remote store URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Store Errors
    // =========================================================================
    /// Could not reach the remote store, or it failed to answer a read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote store answered with a body we could not decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The remote store rejected a put or delete.
    #[error("Remote store rejected write to {key} ({status}): {message}")]
    RemoteWrite {
        key: String,
        status: u16,
        message: String,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// The caller passed an unusable key.
    #[error("Invalid key: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MirrorError::Decode(err.to_string())
        } else {
            MirrorError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for MirrorError {
    fn from(err: base64::DecodeError) -> Self {
        MirrorError::Decode(format!("invalid base64 value: {}", err))
    }
}

impl From<url::ParseError> for MirrorError {
    fn from(err: url::ParseError) -> Self {
        MirrorError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(err: toml::de::Error) -> Self {
        MirrorError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for MirrorError {
    fn from(err: toml::ser::Error) -> Self {
        MirrorError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl MirrorError {
    /// Returns true if the failure is transient (network or malformed
    /// response). The background loop backs off on every error; this only
    /// decides how loudly the failure is logged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::Transport(_) | MirrorError::Decode(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MirrorError::InvalidConfig(_)
                | MirrorError::InvalidUrl(_)
                | MirrorError::ConfigLoadFailed(_)
                | MirrorError::ConfigSaveFailed(_)
        )
    }
}
