//! # Error Types
//!
//! Validation errors for keys handed to the mirror by callers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  kvmirror-core (this file)                                              │
//! │  └── ValidationError  - Caller supplied an unusable key                 │
//! │                                                                         │
//! │  kvmirror (separate crate)                                              │
//! │  └── MirrorError      - Transport / decode / remote write failures     │
//! │                                                                         │
//! │  Flow: ValidationError → MirrorError::Validation → caller               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Key validation errors.
///
/// Raised before any remote call is made, so a rejected write never
/// touches the remote store or the local table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The key is empty.
    #[error("key must not be empty")]
    EmptyKey,

    /// The key starts with `/`; keys are always relative to the mirror prefix.
    #[error("key '{key}' must be relative to the mirror prefix")]
    AbsoluteKey { key: String },

    /// The key's trailing segment is the reserved sentinel name.
    #[error("key '{key}' uses the reserved name '{reserved}'")]
    ReservedKey { key: String, reserved: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(ValidationError::EmptyKey.to_string(), "key must not be empty");

        let err = ValidationError::ReservedKey {
            key: "a/__sync".to_string(),
            reserved: "__sync".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "key 'a/__sync' uses the reserved name '__sync'"
        );
    }
}
