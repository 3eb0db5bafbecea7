//! Core value objects for the cipher-storage contract.
//!
//! Everything here is an immutable record exchanged between application
//! callers, storage backends, and result handlers. Types that carry
//! credential material redact it from `Debug` output and zeroize plaintext
//! on drop.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{CipherError, CipherResult};
use crate::keystore::{CipherOp, CredentialField};

/// Ordered security level of a stored key.
///
/// The same type is used both as a *requested minimum* (what the caller
/// demands when encrypting) and as an *achieved value* (what the key store
/// actually enforced, reported back on decryption). The derived `Ord` makes
/// the ordering total: `Any < SecureSoftware < SecureHardware`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    /// No security guarantee on key storage.
    Any,
    /// Key material is protected by software-only means.
    SecureSoftware,
    /// Key material is held in secure hardware (TEE, StrongBox, enclave).
    SecureHardware,
}

impl SecurityLevel {
    /// Returns `true` if this level meets or exceeds `required`.
    ///
    /// Callers use this to compare the achieved level reported by
    /// [`DecryptionResult::security_level`] against the level they asked for.
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self >= required
    }
}

/// Basis for credential records in their different encodings.
///
/// The two closed instantiations used by the contract are
/// `CredentialPair<Vec<u8>>` (ciphertext) and `CredentialPair<String>`
/// (plaintext).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair<T> {
    /// The username slot.
    pub username: T,
    /// The password slot.
    pub password: T,
}

impl<T> CredentialPair<T> {
    /// Creates a new pair.
    pub fn new(username: T, password: T) -> Self {
        Self { username, password }
    }
}

impl<T: Zeroize> Zeroize for CredentialPair<T> {
    fn zeroize(&mut self) {
        self.username.zeroize();
        self.password.zeroize();
    }
}

impl<T> fmt::Debug for CredentialPair<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Encrypted credentials, the product of [`CipherStorage::encrypt`].
///
/// The caller owns this record and is responsible for persisting it together
/// with the alias it was stored under. `cipher_storage_name` identifies the
/// producing backend: only that backend may decrypt the record later, so the
/// name must be persisted alongside the ciphertext for backend selection.
///
/// [`CipherStorage::encrypt`]: crate::storage::CipherStorage::encrypt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionResult {
    /// Encrypted username and password bytes.
    pub credentials: CredentialPair<Vec<u8>>,
    /// Initialization vector the ciphertext was produced with.
    pub initialization_vector: Vec<u8>,
    /// Name of the backend that produced this record.
    pub cipher_storage_name: String,
}

impl EncryptionResult {
    /// Creates a new encryption result.
    #[must_use]
    pub fn new(
        username: Vec<u8>,
        password: Vec<u8>,
        initialization_vector: Vec<u8>,
        cipher_storage_name: impl Into<String>,
    ) -> Self {
        Self {
            credentials: CredentialPair::new(username, password),
            initialization_vector,
            cipher_storage_name: cipher_storage_name.into(),
        }
    }

    /// Creates a new encryption result labelled with the producing backend.
    #[must_use]
    pub fn for_storage(
        username: Vec<u8>,
        password: Vec<u8>,
        initialization_vector: Vec<u8>,
        storage: &dyn crate::storage::CipherStorage,
    ) -> Self {
        Self::new(
            username,
            password,
            initialization_vector,
            storage.cipher_storage_name(),
        )
    }

    /// The encrypted username bytes.
    #[must_use]
    pub fn username(&self) -> &[u8] {
        &self.credentials.username
    }

    /// The encrypted password bytes.
    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.credentials.password
    }
}

impl fmt::Debug for EncryptionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionResult")
            .field("credentials", &self.credentials)
            .field("initialization_vector", &hex::encode(&self.initialization_vector))
            .field("cipher_storage_name", &self.cipher_storage_name)
            .finish()
    }
}

/// Decrypted credentials plus the security level that was actually enforced.
///
/// `security_level` records what the key store satisfied, which may be lower
/// than what the caller required (e.g. after an OS or library migration moved
/// a key to weaker storage). The backend reports, it does not reject: callers
/// must compare the achieved level against their requirement themselves.
///
/// Plaintext is zeroized when the result is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionResult {
    credentials: CredentialPair<String>,
    security_level: SecurityLevel,
}

impl DecryptionResult {
    /// Creates a new decryption result.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        security_level: SecurityLevel,
    ) -> Self {
        Self {
            credentials: CredentialPair::new(username.into(), password.into()),
            security_level,
        }
    }

    /// The decrypted username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// The decrypted password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.credentials.password
    }

    /// The security level the key store actually enforced for this record.
    #[must_use]
    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }
}

impl Drop for DecryptionResult {
    fn drop(&mut self) {
        self.credentials.zeroize();
    }
}

impl fmt::Debug for DecryptionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionResult")
            .field("credentials", &self.credentials)
            .field("security_level", &self.security_level)
            .finish()
    }
}

/// Opaque handle to a key held by a [`KeyStore`].
///
/// Carries the owning alias and the security level the store enforces for
/// the key; never the key material itself. Exclusively owned by the backend
/// (or the handler acting on its behalf) for the duration of one invocation.
///
/// [`KeyStore`]: crate::keystore::KeyStore
#[derive(Clone, PartialEq, Eq)]
pub struct KeyHandle {
    alias: String,
    security_level: SecurityLevel,
}

impl KeyHandle {
    /// Creates a new key handle. Intended for [`KeyStore`] implementations.
    ///
    /// [`KeyStore`]: crate::keystore::KeyStore
    #[must_use]
    pub fn new(alias: impl Into<String>, security_level: SecurityLevel) -> Self {
        Self {
            alias: alias.into(),
            security_level,
        }
    }

    /// The alias this key is stored under.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The security level the key store enforces for this key.
    #[must_use]
    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.alias)
            .field("security_level", &self.security_level)
            .finish()
    }
}

/// Single-use bundle of everything needed to finish a decryption after
/// access has been authorized.
///
/// Constructed by a backend immediately before it asks a handler for access
/// permissions and discarded once the operation completes or fails.
pub struct DecryptionContext {
    /// The alias the key is stored under.
    pub key_alias: String,
    /// Handle to the key the ciphertext was produced with.
    pub key: KeyHandle,
    /// The ciphertext pair to decrypt.
    pub credentials: CredentialPair<Vec<u8>>,
    /// Initialization vector the ciphertext was produced with.
    pub initialization_vector: Vec<u8>,
}

impl DecryptionContext {
    /// Creates a new decryption context.
    #[must_use]
    pub fn new(
        key_alias: impl Into<String>,
        key: KeyHandle,
        username: &[u8],
        password: &[u8],
        initialization_vector: &[u8],
    ) -> Self {
        Self {
            key_alias: key_alias.into(),
            key,
            credentials: CredentialPair::new(username.to_vec(), password.to_vec()),
            initialization_vector: initialization_vector.to_vec(),
        }
    }

    /// Runs the decryption this context describes against an authorized
    /// cipher operation.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CryptoFailed`] if either field fails to
    /// decrypt or the plaintext is not valid UTF-8.
    pub fn finish(&self, cipher: &dyn CipherOp) -> CipherResult<DecryptionResult> {
        let username = cipher.decrypt(
            CredentialField::Username,
            &self.credentials.username,
            &self.initialization_vector,
        )?;
        let password = cipher.decrypt(
            CredentialField::Password,
            &self.credentials.password,
            &self.initialization_vector,
        )?;
        let username = String::from_utf8(username).map_err(CipherError::wrap)?;
        let password = String::from_utf8(password).map_err(CipherError::wrap)?;
        Ok(DecryptionResult::new(
            username,
            password,
            self.key.security_level(),
        ))
    }
}

impl fmt::Debug for DecryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionContext")
            .field("key_alias", &self.key_alias)
            .field("key", &self.key)
            .field("credentials", &self.credentials)
            .field("initialization_vector", &hex::encode(&self.initialization_vector))
            .finish()
    }
}

/// Single-use bundle of everything needed to finish an encryption after
/// access has been authorized.
pub struct EncryptContext {
    /// The alias the key is stored under.
    pub key_alias: String,
    /// Handle to the key to encrypt with.
    pub key: KeyHandle,
    /// The plaintext pair to encrypt.
    pub credentials: CredentialPair<String>,
    /// Name of the backend the result will be labelled with.
    pub cipher_storage_name: String,
}

impl EncryptContext {
    /// Creates a new encrypt context.
    #[must_use]
    pub fn new(
        key_alias: impl Into<String>,
        key: KeyHandle,
        username: &str,
        password: &str,
        cipher_storage_name: impl Into<String>,
    ) -> Self {
        Self {
            key_alias: key_alias.into(),
            key,
            credentials: CredentialPair::new(username.to_owned(), password.to_owned()),
            cipher_storage_name: cipher_storage_name.into(),
        }
    }

    /// Runs the encryption this context describes against an authorized
    /// cipher operation.
    ///
    /// A fresh initialization vector is drawn from the cipher operation and
    /// shared by both fields of the produced record.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CryptoFailed`] if vector generation or either
    /// field encryption fails.
    pub fn finish(&self, cipher: &dyn CipherOp) -> CipherResult<EncryptionResult> {
        let initialization_vector = cipher.generate_iv()?;
        let username = cipher.encrypt(
            CredentialField::Username,
            self.credentials.username.as_bytes(),
            &initialization_vector,
        )?;
        let password = cipher.encrypt(
            CredentialField::Password,
            self.credentials.password.as_bytes(),
            &initialization_vector,
        )?;
        Ok(EncryptionResult::new(
            username,
            password,
            initialization_vector,
            self.cipher_storage_name.clone(),
        ))
    }
}

impl Drop for EncryptContext {
    fn drop(&mut self) {
        self.credentials.zeroize();
    }
}

impl fmt::Debug for EncryptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptContext")
            .field("key_alias", &self.key_alias)
            .field("key", &self.key)
            .field("credentials", &self.credentials)
            .field("cipher_storage_name", &self.cipher_storage_name)
            .finish()
    }
}
