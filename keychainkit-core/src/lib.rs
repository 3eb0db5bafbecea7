//! Pluggable credential cipher-storage core.
//!
//! This crate defines the contract between application callers, credential
//! encryption backends, and the secure key stores behind them: a
//! username/password pair is stored under an alias, encrypted with a key
//! held by a key store at a caller-required [`SecurityLevel`], and
//! decrypted later — possibly only after an out-of-band user authentication
//! step (e.g. a biometric prompt) unlocks the key.
//!
//! # Architecture
//!
//! - [`CipherStorage`] — the operation set every backend implements
//!   (encrypt, decrypt, decrypt-with-handler, remove-key) plus the
//!   capability queries an external selection facade ranks backends by.
//! - [`DecryptionResultHandler`] — the asynchronous completion protocol for
//!   operations gated on user authorization: a backend parks the in-flight
//!   operation with the handler, the handler drives the interaction through
//!   an [`AccessControl`] collaborator, and any number of threads can block
//!   on the single-shot terminal payload with a mandatory timeout.
//! - [`KeyStore`] / [`CipherOp`] — the seam to concrete key-store backends
//!   (hardware keystore, software keystore, legacy providers), which live
//!   outside this crate.
//! - [`memory`] — in-memory reference implementations for tests.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keychainkit_core::handler::NonInteractiveHandler;
//! use keychainkit_core::memory::{MemoryCipherStorage, MemoryKeyStore};
//! use keychainkit_core::storage::CipherStorage;
//! use keychainkit_core::types::SecurityLevel;
//!
//! let storage = MemoryCipherStorage::new(Arc::new(MemoryKeyStore::new()));
//! let handler = NonInteractiveHandler::new();
//!
//! let encrypted = storage
//!     .encrypt(&handler, "svc", "alice", "s3cr3t", SecurityLevel::Any)
//!     .unwrap();
//! let decrypted = storage
//!     .decrypt(
//!         "svc",
//!         encrypted.username(),
//!         encrypted.password(),
//!         SecurityLevel::Any,
//!         &encrypted.initialization_vector,
//!     )
//!     .unwrap();
//!
//! assert_eq!(decrypted.username(), "alice");
//! assert!(decrypted.security_level().satisfies(SecurityLevel::Any));
//! ```
//!
//! [`CipherStorage`]: storage::CipherStorage
//! [`DecryptionResultHandler`]: handler::DecryptionResultHandler
//! [`AccessControl`]: handler::AccessControl
//! [`KeyStore`]: keystore::KeyStore
//! [`CipherOp`]: keystore::CipherOp
//! [`SecurityLevel`]: types::SecurityLevel

pub mod error;
pub mod handler;
pub mod keystore;
pub mod memory;
pub mod storage;
pub mod types;

pub use error::{CipherError, CipherResult};
pub use handler::{
    AccessControl, AuthCallback, AuthOutcome, AuthRequest, Completion, CompletionGate,
    DecryptionResultHandler, InteractiveHandler, NonInteractiveHandler, OperationKind,
};
pub use keystore::{CipherOp, CredentialField, KeyStore};
pub use storage::{CipherStorage, DEFAULT_INTERACTION_TIMEOUT};
pub use types::{
    CredentialPair, DecryptionContext, DecryptionResult, EncryptContext, EncryptionResult,
    KeyHandle, SecurityLevel,
};
