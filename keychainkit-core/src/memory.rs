//! In-memory implementations of the key-store collaborator and the
//! cipher-storage contract.
//!
//! These are NOT secure for production use — key material lives in process
//! memory. They exist to exercise the contract and the handler protocol in
//! tests without a platform key store, and they do perform real
//! XChaCha20-Poly1305 encryption so round-trip, tamper-rejection, and
//! level-reporting semantics hold for real.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::error::{CipherError, CipherResult};
use crate::handler::{DecryptionResultHandler, NonInteractiveHandler};
use crate::keystore::{CipherOp, CredentialField, KeyStore};
use crate::storage::{CipherStorage, DEFAULT_INTERACTION_TIMEOUT};
use crate::types::{
    DecryptionContext, DecryptionResult, EncryptContext, EncryptionResult, KeyHandle,
    SecurityLevel,
};

/// Nonce size of XChaCha20-Poly1305.
const IV_LENGTH: usize = 24;

/// One stored key.
struct KeyRecord {
    material: Zeroizing<[u8; 32]>,
    level: SecurityLevel,
    requires_authentication: bool,
}

/// In-memory key store keyed by alias.
///
/// Configurable capability ceiling, authorization requirement for new keys,
/// and an availability switch for injecting [`KeyStoreAccess`] failures.
///
/// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, KeyRecord>>,
    max_level: SecurityLevel,
    auth_required: bool,
    available: AtomicBool,
}

impl MemoryKeyStore {
    /// Creates a store enforcing [`SecurityLevel::SecureSoftware`] whose
    /// keys are usable without authorization.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            max_level: SecurityLevel::SecureSoftware,
            auth_required: false,
            available: AtomicBool::new(true),
        }
    }

    /// Sets the strongest level this store can enforce.
    #[must_use]
    pub fn with_max_level(mut self, level: SecurityLevel) -> Self {
        self.max_level = level;
        self
    }

    /// Makes every newly created key require user authorization before use.
    #[must_use]
    pub fn with_authentication_required(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// The strongest level this store can enforce.
    #[must_use]
    pub fn max_level(&self) -> SecurityLevel {
        self.max_level
    }

    /// Simulates the store becoming (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inserts a key at an explicit level, e.g. to simulate a key left at a
    /// weaker level by an earlier library version.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CryptoFailed`] if random generation fails.
    pub fn insert_key(
        &self,
        alias: &str,
        level: SecurityLevel,
        requires_authentication: bool,
    ) -> CipherResult<KeyHandle> {
        let material = generate_key_material()?;
        let mut keys = self
            .keys
            .write()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        keys.insert(
            alias.to_owned(),
            KeyRecord { material, level, requires_authentication },
        );
        Ok(KeyHandle::new(alias, level))
    }

    fn check_available(&self) -> CipherResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CipherError::key_store("key store is unreachable"))
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_key_material() -> CipherResult<Zeroizing<[u8; 32]>> {
    let mut material = Zeroizing::new([0u8; 32]);
    getrandom::getrandom(material.as_mut())
        .map_err(|e| CipherError::crypto(format!("random key generation failed: {e}")))?;
    Ok(material)
}

impl KeyStore for MemoryKeyStore {
    fn obtain_key(&self, alias: &str, level: SecurityLevel) -> CipherResult<KeyHandle> {
        self.check_available()?;
        {
            let keys = self
                .keys
                .read()
                .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
            if let Some(record) = keys.get(alias) {
                return Ok(KeyHandle::new(alias, record.level));
            }
        }
        if !self.max_level.satisfies(level) {
            return Err(CipherError::crypto(format!(
                "security level {level} cannot be enforced by this key store (provides {})",
                self.max_level
            )));
        }
        let material = generate_key_material()?;
        let mut keys = self
            .keys
            .write()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        let record = keys.entry(alias.to_owned()).or_insert(KeyRecord {
            material,
            level: self.max_level,
            requires_authentication: self.auth_required,
        });
        Ok(KeyHandle::new(alias, record.level))
    }

    fn lookup_key(&self, alias: &str) -> CipherResult<Option<KeyHandle>> {
        self.check_available()?;
        let keys = self
            .keys
            .read()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        Ok(keys.get(alias).map(|record| KeyHandle::new(alias, record.level)))
    }

    fn begin_cipher(&self, key: &KeyHandle, domain: &[u8]) -> CipherResult<Box<dyn CipherOp>> {
        self.check_available()?;
        let keys = self
            .keys
            .read()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        let record = keys.get(key.alias()).ok_or_else(|| {
            CipherError::crypto(format!("no key found under alias '{}'", key.alias()))
        })?;
        let mut aad_prefix = Vec::with_capacity(domain.len() + 1 + key.alias().len() + 1);
        aad_prefix.extend_from_slice(domain);
        aad_prefix.push(b':');
        aad_prefix.extend_from_slice(key.alias().as_bytes());
        aad_prefix.push(b':');
        Ok(Box::new(MemoryCipherOp {
            cipher: XChaCha20Poly1305::new(Key::from_slice(record.material.as_ref())),
            aad_prefix,
        }))
    }

    fn requires_authentication(&self, key: &KeyHandle) -> bool {
        self.keys
            .read()
            .ok()
            .and_then(|keys| keys.get(key.alias()).map(|r| r.requires_authentication))
            .unwrap_or(false)
    }

    fn delete_key(&self, alias: &str) -> CipherResult<()> {
        self.check_available()?;
        let mut keys = self
            .keys
            .write()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        keys.remove(alias);
        Ok(())
    }

    fn contains(&self, alias: &str) -> CipherResult<bool> {
        self.check_available()?;
        let keys = self
            .keys
            .read()
            .map_err(|_| CipherError::key_store("key store lock poisoned"))?;
        Ok(keys.contains_key(alias))
    }
}

/// XChaCha20-Poly1305 operation bound to one key and one AAD domain.
///
/// Both credential fields share the stored initialization vector; per-field
/// nonces are derived by overwriting the final vector byte with the field
/// tag, and the field label is bound into the associated data along with the
/// backend name and alias. Ciphertext therefore authenticates only for the
/// producing backend, alias, and field.
struct MemoryCipherOp {
    cipher: XChaCha20Poly1305,
    aad_prefix: Vec<u8>,
}

impl MemoryCipherOp {
    fn field_aad(&self, field: CredentialField) -> Vec<u8> {
        let mut aad = self.aad_prefix.clone();
        aad.extend_from_slice(field.label());
        aad
    }

    fn field_nonce(
        field: CredentialField,
        initialization_vector: &[u8],
    ) -> CipherResult<XNonce> {
        if initialization_vector.len() != IV_LENGTH {
            return Err(CipherError::crypto(format!(
                "initialization vector must be {IV_LENGTH} bytes, got {}",
                initialization_vector.len()
            )));
        }
        let mut nonce = [0u8; IV_LENGTH];
        nonce.copy_from_slice(initialization_vector);
        nonce[IV_LENGTH - 1] = field.tag();
        Ok(XNonce::from(nonce))
    }
}

impl CipherOp for MemoryCipherOp {
    fn generate_iv(&self) -> CipherResult<Vec<u8>> {
        let mut iv = vec![0u8; IV_LENGTH];
        getrandom::getrandom(&mut iv)
            .map_err(|e| CipherError::crypto(format!("random vector generation failed: {e}")))?;
        Ok(iv)
    }

    fn encrypt(
        &self,
        field: CredentialField,
        plaintext: &[u8],
        initialization_vector: &[u8],
    ) -> CipherResult<Vec<u8>> {
        let nonce = Self::field_nonce(field, initialization_vector)?;
        let aad = self.field_aad(field);
        self.cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CipherError::crypto("XChaCha20-Poly1305 encryption failed"))
    }

    fn decrypt(
        &self,
        field: CredentialField,
        ciphertext: &[u8],
        initialization_vector: &[u8],
    ) -> CipherResult<Vec<u8>> {
        let nonce = Self::field_nonce(field, initialization_vector)?;
        let aad = self.field_aad(field);
        self.cipher
            .decrypt(&nonce, Payload { msg: ciphertext, aad: &aad })
            .map_err(|_| {
                CipherError::crypto(
                    "XChaCha20-Poly1305 decryption failed (wrong backend, alias, or corrupted data)",
                )
            })
    }
}

/// In-memory cipher-storage backend over a [`MemoryKeyStore`].
///
/// Capability flags are configurable so selection and level-reporting
/// behavior can be exercised; the provided security level is whatever the
/// underlying key store enforces.
pub struct MemoryCipherStorage {
    key_store: Arc<MemoryKeyStore>,
    name: String,
    service_name: String,
    min_api_level: u32,
    biometry: bool,
    interaction_timeout: Duration,
}

impl MemoryCipherStorage {
    /// Default backend name.
    pub const NAME: &'static str = "MemoryXChaCha20Poly1305";

    /// Creates a backend over `key_store` with default capability flags.
    #[must_use]
    pub fn new(key_store: Arc<MemoryKeyStore>) -> Self {
        Self {
            key_store,
            name: Self::NAME.to_owned(),
            service_name: "keychainkit".to_owned(),
            min_api_level: 1,
            biometry: false,
            interaction_timeout: DEFAULT_INTERACTION_TIMEOUT,
        }
    }

    /// Overrides the backend name (distinct names make distinct AAD
    /// domains, so two differently named backends reject each other's
    /// ciphertext).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the minimal supported API level.
    #[must_use]
    pub fn with_min_api_level(mut self, level: u32) -> Self {
        self.min_api_level = level;
        self
    }

    /// Marks the backend as biometry-capable.
    #[must_use]
    pub fn with_biometry(mut self, supported: bool) -> Self {
        self.biometry = supported;
        self
    }

    /// Overrides the deadline used when a contract method blocks on a
    /// handler internally.
    #[must_use]
    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout = timeout;
        self
    }
}

impl CipherStorage for MemoryCipherStorage {
    fn encrypt(
        &self,
        handler: &dyn DecryptionResultHandler,
        alias: &str,
        username: &str,
        password: &str,
        level: SecurityLevel,
    ) -> CipherResult<EncryptionResult> {
        tracing::debug!(alias, storage = %self.name, required = %level, "encrypting credentials");
        if !self.security_level().satisfies(level) {
            return Err(CipherError::crypto(format!(
                "required security level {level} is not supported by {} (provides {})",
                self.name,
                self.security_level()
            )));
        }
        let key = self.key_store.obtain_key(alias, level)?;
        // An existing key may sit at a weaker level than required. Decryption
        // reports such a mismatch; encryption must not write fresh secrets
        // under it.
        if !key.security_level().satisfies(level) {
            return Err(CipherError::crypto(format!(
                "key under alias '{alias}' satisfies {} but {level} is required",
                key.security_level()
            )));
        }
        let cipher = self.key_store.begin_cipher(&key, self.name.as_bytes())?;
        let requires_auth = self.key_store.requires_authentication(&key);
        let context = EncryptContext::new(alias, key, username, password, &self.name);
        if requires_auth {
            handler.ask_encrypt_permissions(context, cipher);
            return handler.wait_result(self.interaction_timeout)?.into_encryption();
        }
        context.finish(cipher.as_ref())
    }

    fn decrypt(
        &self,
        alias: &str,
        username: &[u8],
        password: &[u8],
        level: SecurityLevel,
        initialization_vector: &[u8],
    ) -> CipherResult<DecryptionResult> {
        let handler = NonInteractiveHandler::new();
        self.decrypt_with_handler(
            &handler,
            alias,
            username,
            password,
            level,
            initialization_vector,
        )?;
        handler.wait_result(self.interaction_timeout)?.into_decryption()
    }

    fn decrypt_with_handler(
        &self,
        handler: &dyn DecryptionResultHandler,
        alias: &str,
        username: &[u8],
        password: &[u8],
        level: SecurityLevel,
        initialization_vector: &[u8],
    ) -> CipherResult<()> {
        tracing::debug!(alias, storage = %self.name, required = %level, "decrypting credentials");
        let key = self
            .key_store
            .lookup_key(alias)?
            .ok_or_else(|| CipherError::crypto(format!("no key found under alias '{alias}'")))?;
        if !key.security_level().satisfies(level) {
            tracing::warn!(
                alias,
                achieved = %key.security_level(),
                required = %level,
                "stored key satisfies a weaker security level than required"
            );
        }
        let cipher = self.key_store.begin_cipher(&key, self.name.as_bytes())?;
        let requires_auth = self.key_store.requires_authentication(&key);
        let context =
            DecryptionContext::new(alias, key, username, password, initialization_vector);
        if requires_auth {
            handler.ask_access_permissions(context, cipher);
        } else {
            handler.on_decrypt(context.finish(cipher.as_ref()));
        }
        Ok(())
    }

    fn remove_key(&self, alias: &str) -> CipherResult<()> {
        tracing::debug!(alias, storage = %self.name, "removing key");
        self.key_store.delete_key(alias)
    }

    fn cipher_storage_name(&self) -> &str {
        &self.name
    }

    fn min_supported_api_level(&self) -> u32 {
        self.min_api_level
    }

    fn security_level(&self) -> SecurityLevel {
        self.key_store.max_level()
    }

    fn supports_secure_hardware(&self) -> bool {
        self.security_level() >= SecurityLevel::SecureHardware
    }

    fn is_biometry_supported(&self) -> bool {
        self.biometry
    }

    fn default_alias_service_name(&self) -> &str {
        &self.service_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_store_obtain_and_lookup() {
        let store = MemoryKeyStore::new();
        assert!(store.lookup_key("svc").unwrap().is_none());

        let key = store.obtain_key("svc", SecurityLevel::Any).unwrap();
        assert_eq!(key.alias(), "svc");
        assert_eq!(key.security_level(), SecurityLevel::SecureSoftware);

        let found = store.lookup_key("svc").unwrap().expect("key should exist");
        assert_eq!(found, key);
        assert!(store.contains("svc").unwrap());
    }

    #[test]
    fn test_key_store_rejects_unsatisfiable_level() {
        let store = MemoryKeyStore::new();
        let err = store
            .obtain_key("svc", SecurityLevel::SecureHardware)
            .unwrap_err();
        assert!(matches!(err, CipherError::CryptoFailed { .. }));
    }

    #[test]
    fn test_key_store_unavailable() {
        let store = MemoryKeyStore::new();
        store.set_available(false);
        assert!(matches!(
            store.obtain_key("svc", SecurityLevel::Any).unwrap_err(),
            CipherError::KeyStoreAccess { .. }
        ));
        assert!(matches!(
            store.delete_key("svc").unwrap_err(),
            CipherError::KeyStoreAccess { .. }
        ));
        store.set_available(true);
        assert!(store.delete_key("svc").is_ok());
    }

    #[test]
    fn test_delete_missing_alias_is_noop() {
        let store = MemoryKeyStore::new();
        store.delete_key("never-created").unwrap();
    }

    #[test]
    fn test_cipher_op_roundtrip_and_field_separation() {
        let store = MemoryKeyStore::new();
        let key = store.obtain_key("svc", SecurityLevel::Any).unwrap();
        let op = store.begin_cipher(&key, b"TestStorage").unwrap();

        let iv = op.generate_iv().unwrap();
        let ct = op.encrypt(CredentialField::Username, b"alice", &iv).unwrap();
        let pt = op.decrypt(CredentialField::Username, &ct, &iv).unwrap();
        assert_eq!(pt, b"alice");

        // Same bytes under the other field label must not authenticate.
        assert!(op.decrypt(CredentialField::Password, &ct, &iv).is_err());
    }

    #[test]
    fn test_cipher_op_rejects_bad_vector() {
        let store = MemoryKeyStore::new();
        let key = store.obtain_key("svc", SecurityLevel::Any).unwrap();
        let op = store.begin_cipher(&key, b"TestStorage").unwrap();
        let err = op.encrypt(CredentialField::Username, b"x", &[0u8; 12]).unwrap_err();
        assert!(matches!(err, CipherError::CryptoFailed { .. }));
    }

    #[test]
    fn test_cross_domain_ciphertext_rejected() {
        let store = MemoryKeyStore::new();
        let key = store.obtain_key("svc", SecurityLevel::Any).unwrap();
        let op_a = store.begin_cipher(&key, b"StorageA").unwrap();
        let op_b = store.begin_cipher(&key, b"StorageB").unwrap();

        let iv = op_a.generate_iv().unwrap();
        let ct = op_a.encrypt(CredentialField::Username, b"alice", &iv).unwrap();
        assert!(op_b.decrypt(CredentialField::Username, &ct, &iv).is_err());
    }

    #[test]
    fn test_storage_capability_queries() {
        let storage = MemoryCipherStorage::new(Arc::new(MemoryKeyStore::new()))
            .with_min_api_level(23)
            .with_biometry(true);
        assert_eq!(storage.security_level(), SecurityLevel::SecureSoftware);
        assert!(!storage.supports_secure_hardware());
        assert!(storage.is_biometry_supported());
        assert_eq!(storage.capability_level(), 1023);
        assert_eq!(storage.default_alias_service_name(), "keychainkit");
    }

    #[test]
    fn test_storage_hardware_flag_follows_key_store() {
        let key_store =
            Arc::new(MemoryKeyStore::new().with_max_level(SecurityLevel::SecureHardware));
        let storage = MemoryCipherStorage::new(key_store);
        assert!(storage.supports_secure_hardware());
        assert_eq!(storage.capability_level(), 101);
    }
}
