//! Failure taxonomy for cipher-storage operations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Shared, clonable error source.
///
/// Completion payloads are observed by any number of waiters, so the cause
/// chain is reference-counted rather than boxed.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the cipher-storage contract.
///
/// Synchronous contract methods return these directly; the asynchronous
/// decrypt path never panics across the callback boundary and instead
/// normalizes failures through [`CipherError::wrap`] before delivering them
/// via the handler's error slot.
#[derive(Debug, Clone, Error)]
pub enum CipherError {
    /// A cryptographic operation failed: key generation or retrieval, cipher
    /// initialization, the encrypt/decrypt operation itself, or an
    /// unsatisfiable security level.
    #[error("crypto operation failed: {message}")]
    CryptoFailed {
        /// Human-readable description of the failure.
        message: String,
        /// Backend-defined error code for cross-boundary reporting.
        code: Option<i32>,
        /// The underlying failure, when one was captured.
        #[source]
        source: Option<ErrorSource>,
    },

    /// The underlying key store could not be reached or mutated.
    #[error("key store access failed: {message}")]
    KeyStoreAccess {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying failure, when one was captured.
        #[source]
        source: Option<ErrorSource>,
    },

    /// The interactive authorization step was cancelled by the user.
    #[error("operation cancelled by user")]
    Cancelled,

    /// No terminal result was posted before the wait deadline elapsed.
    #[error("timed out after {waited:?} waiting for a result")]
    TimedOut {
        /// How long the caller waited before giving up.
        waited: Duration,
    },
}

impl CipherError {
    /// Creates a [`CipherError::CryptoFailed`] with a message only.
    #[must_use]
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::CryptoFailed {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Creates a [`CipherError::CryptoFailed`] with a backend error code.
    #[must_use]
    pub fn crypto_with_code(message: impl Into<String>, code: i32) -> Self {
        Self::CryptoFailed {
            message: message.into(),
            code: Some(code),
            source: None,
        }
    }

    /// Creates a [`CipherError::KeyStoreAccess`] with a message only.
    #[must_use]
    pub fn key_store(message: impl Into<String>) -> Self {
        Self::KeyStoreAccess {
            message: message.into(),
            source: None,
        }
    }

    /// Normalizes an arbitrary failure into the domain taxonomy.
    ///
    /// A failure that is already a [`CipherError`] passes through unchanged
    /// (never double-wrapped); anything else becomes a
    /// [`CipherError::CryptoFailed`] carrying the original as its cause and a
    /// message prefixed to mark it as wrapped.
    #[must_use]
    pub fn wrap<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let error = error.into();
        match error.downcast::<Self>() {
            Ok(own) => *own,
            Err(other) => Self::CryptoFailed {
                message: format!("wrapped error: {other}"),
                code: None,
                source: Some(Arc::from(other)),
            },
        }
    }

    /// Opaque small-integer code attached to this failure for cross-boundary
    /// reporting.
    ///
    /// [`CipherError::CryptoFailed`] reports the backend-supplied code when
    /// one is present; every kind otherwise falls back to a stable default.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            Self::CryptoFailed { code, .. } => code.unwrap_or(1),
            Self::KeyStoreAccess { .. } => 2,
            Self::Cancelled => 3,
            Self::TimedOut { .. } => 4,
        }
    }
}

/// Result type alias for cipher-storage operations.
pub type CipherResult<T> = Result<T, CipherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("key blob corrupt")]
    struct FakeBackendError;

    #[test]
    fn test_wrap_foreign_error() {
        let err = CipherError::wrap(FakeBackendError);
        match &err {
            CipherError::CryptoFailed { message, source, .. } => {
                assert_eq!(message, "wrapped error: key blob corrupt");
                assert!(source.is_some());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_wrap_does_not_double_wrap() {
        let original = CipherError::crypto_with_code("cipher init failed", 17);
        let rewrapped = CipherError::wrap(original);
        match rewrapped {
            CipherError::CryptoFailed { message, code, source } => {
                assert_eq!(message, "cipher init failed");
                assert_eq!(code, Some(17));
                assert!(source.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CipherError::crypto("x").error_code(), 1);
        assert_eq!(CipherError::crypto_with_code("x", 42).error_code(), 42);
        assert_eq!(CipherError::key_store("x").error_code(), 2);
        assert_eq!(CipherError::Cancelled.error_code(), 3);
        assert_eq!(
            CipherError::TimedOut { waited: Duration::from_secs(1) }.error_code(),
            4
        );
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let err = CipherError::wrap(FakeBackendError);
        let source = std::error::Error::source(&err).expect("source missing");
        assert_eq!(source.to_string(), "key blob corrupt");
    }
}
