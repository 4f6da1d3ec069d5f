//! # Validation Module
//!
//! Checks applied to caller-supplied keys before a local write reaches the
//! remote store.
//!
//! ## Usage
//! ```rust
//! use kvmirror_core::validation::validate_key;
//!
//! assert!(validate_key("config/timeout").is_ok());
//! assert!(validate_key("").is_err());
//! assert!(validate_key("__sync").is_err());
//! ```

use crate::error::ValidationError;
use crate::keys::{is_sentinel, SENTINEL_KEY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a relative key for `set`/`delete`.
///
/// ## Rules
/// - Must not be empty
/// - Must not start with `/` (keys are relative to the mirror prefix)
/// - Trailing segment must not be the sentinel name; writing it would
///   force every peer into a full resync
pub fn validate_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }

    if key.starts_with('/') {
        return Err(ValidationError::AbsoluteKey {
            key: key.to_string(),
        });
    }

    if is_sentinel(key) {
        return Err(ValidationError::ReservedKey {
            key: key.to_string(),
            reserved: SENTINEL_KEY.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("bar").is_ok());
        assert!(validate_key("c/bar").is_ok());
        assert!(validate_key("__synchronized").is_ok());

        assert_eq!(validate_key(""), Err(ValidationError::EmptyKey));
        assert!(matches!(
            validate_key("/bar"),
            Err(ValidationError::AbsoluteKey { .. })
        ));
        assert!(matches!(
            validate_key("c/__sync"),
            Err(ValidationError::ReservedKey { .. })
        ));
    }
}
