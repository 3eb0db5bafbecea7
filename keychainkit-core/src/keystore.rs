//! Key-store collaborator traits.
//!
//! Concrete key stores (hardware-backed keystore, software keystore, legacy
//! providers) live outside this crate and are consumed through these
//! interfaces. The crate ships an in-memory implementation in
//! [`crate::memory`] for tests and reference use.

use crate::error::CipherResult;
use crate::types::{KeyHandle, SecurityLevel};

/// Which credential field a cipher call operates on.
///
/// Both fields of a record share one stored initialization vector; the field
/// label lets an implementation derive distinct per-field nonces and bind the
/// field into its associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    /// The username slot.
    Username,
    /// The password slot.
    Password,
}

impl CredentialField {
    /// Stable label for associated-data construction.
    #[must_use]
    pub fn label(self) -> &'static [u8] {
        match self {
            Self::Username => b"username",
            Self::Password => b"password",
        }
    }

    /// Stable single-byte domain-separation tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Username => 0x00,
            Self::Password => 0x01,
        }
    }
}

/// A cipher operation bound to exactly one key.
///
/// Handles are single-invocation: a backend obtains one from its key store,
/// uses it directly or hands it to a result handler for completion after
/// authorization, and drops it when the invocation ends. `Send` so the
/// handler may finish the operation on a different thread than the one that
/// started it.
pub trait CipherOp: Send {
    /// Draws a fresh initialization vector of the size this cipher expects.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] if the system randomness source fails.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn generate_iv(&self) -> CipherResult<Vec<u8>>;

    /// Encrypts one credential field under the bound key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] if the vector has the wrong size or the
    /// cipher operation fails.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn encrypt(
        &self,
        field: CredentialField,
        plaintext: &[u8],
        initialization_vector: &[u8],
    ) -> CipherResult<Vec<u8>>;

    /// Decrypts one credential field under the bound key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] if the vector is invalid or authentication
    /// of the ciphertext fails (tampering, wrong backend, wrong alias).
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn decrypt(
        &self,
        field: CredentialField,
        ciphertext: &[u8],
        initialization_vector: &[u8],
    ) -> CipherResult<Vec<u8>>;
}

/// Key generation, retrieval and deletion by alias.
///
/// Backends consume this interface; implementations decide how keys are
/// protected and which [`SecurityLevel`] they can enforce.
pub trait KeyStore: Send + Sync {
    /// Retrieves the key stored under `alias`, creating it at the store's
    /// enforced level when absent.
    ///
    /// `level` is the caller's required minimum for a *newly created* key.
    /// An existing key is returned as-is, whatever its level: reporting a
    /// weaker-than-required level is the contract's job, not this method's.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] when a new key is required and `level`
    /// exceeds what the store can enforce, or when generation fails;
    /// [`KeyStoreAccess`] when the store cannot be reached.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    /// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
    fn obtain_key(&self, alias: &str, level: SecurityLevel) -> CipherResult<KeyHandle>;

    /// Retrieves the key stored under `alias`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreAccess`] when the store cannot be reached.
    ///
    /// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
    fn lookup_key(&self, alias: &str) -> CipherResult<Option<KeyHandle>>;

    /// Starts a cipher operation bound to `key`.
    ///
    /// `domain` is an opaque byte string the operation must bind into its
    /// authenticated data (backends pass their storage name), so ciphertext
    /// produced through one domain fails authentication in any other.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] when the key is gone or cipher
    /// initialization fails.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn begin_cipher(&self, key: &KeyHandle, domain: &[u8]) -> CipherResult<Box<dyn CipherOp>>;

    /// Whether using `key` requires out-of-band user authorization first.
    fn requires_authentication(&self, key: &KeyHandle) -> bool;

    /// Deletes the key stored under `alias`. A missing alias is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreAccess`] when the store cannot be reached or the
    /// deletion is refused.
    ///
    /// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
    fn delete_key(&self, alias: &str) -> CipherResult<()>;

    /// Whether a key exists under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreAccess`] when the store cannot be reached.
    ///
    /// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
    fn contains(&self, alias: &str) -> CipherResult<bool>;
}
