//! The cipher-storage contract every backend implements.

use std::time::Duration;

use crate::error::CipherResult;
use crate::handler::DecryptionResultHandler;
use crate::types::{DecryptionResult, EncryptionResult, SecurityLevel};

/// Default deadline for blocking on a handler when a contract method drives
/// the interaction internally.
pub const DEFAULT_INTERACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Alias-keyed credential encryption backed by a secure key store.
///
/// A backend encrypts a username/password pair under a key stored by alias
/// and decrypts it later, possibly after an out-of-band user authorization
/// step driven through a [`DecryptionResultHandler`]. The capability queries
/// let an external selection facade rank backends without knowing their
/// internals.
pub trait CipherStorage: Send + Sync {
    /// Encrypts credentials with the key stored under `alias`, creating the
    /// key at the backend's enforced level when absent.
    ///
    /// Synchronous from the caller's view. A backend whose key use requires
    /// authorization drives `handler`'s encrypt path internally and blocks
    /// on the handler's own wait contract.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] when `level` exceeds what this backend can
    /// provide, when a key already stored under `alias` satisfies a weaker
    /// level than `level`, or when key generation/retrieval or the cipher
    /// operation fails.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn encrypt(
        &self,
        handler: &dyn DecryptionResultHandler,
        alias: &str,
        username: &str,
        password: &str,
        level: SecurityLevel,
    ) -> CipherResult<EncryptionResult>;

    /// Decrypts credentials with the key stored under `alias`.
    ///
    /// Synchronous convenience, only safe when this backend guarantees the
    /// key is usable without an interactive step; backends that require
    /// interaction implement it by driving the handler pattern internally
    /// and blocking on the handler's wait contract.
    ///
    /// The returned [`DecryptionResult::security_level`] records what the
    /// key store actually enforced. The backend reports, it does not
    /// reject: callers compare the achieved level against `level`
    /// themselves. A key stored at a weaker level than required (e.g. after
    /// an OS or library migration) is a caller-visible condition.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailed`] when the key is missing, the vector is
    /// invalid, or the achieved security level cannot be determined.
    ///
    /// [`CryptoFailed`]: crate::error::CipherError::CryptoFailed
    fn decrypt(
        &self,
        alias: &str,
        username: &[u8],
        password: &[u8],
        level: SecurityLevel,
        initialization_vector: &[u8],
    ) -> CipherResult<DecryptionResult>;

    /// Decrypts credentials, delivering the outcome exclusively through
    /// `handler`.
    ///
    /// Returns once the operation has either completed synchronously or been
    /// handed to the handler's permission flow — never blocks past the
    /// permission request. The outcome, success or failure, arrives through
    /// the handler's completion callback.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures *before* the hand-off (key lookup,
    /// cipher initialization); everything after is delivered through the
    /// handler.
    fn decrypt_with_handler(
        &self,
        handler: &dyn DecryptionResultHandler,
        alias: &str,
        username: &[u8],
        password: &[u8],
        level: SecurityLevel,
        initialization_vector: &[u8],
    ) -> CipherResult<()>;

    /// Removes the key stored under `alias`. A missing alias is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreAccess`] when the underlying store cannot be
    /// reached or the alias cannot be deleted.
    ///
    /// [`KeyStoreAccess`]: crate::error::CipherError::KeyStoreAccess
    fn remove_key(&self, alias: &str) -> CipherResult<()>;

    /// Unique name of this backend.
    ///
    /// Persisted inside every [`EncryptionResult`] it produces; decryption
    /// must be routed back to the backend carrying the same name.
    fn cipher_storage_name(&self) -> &str;

    /// Minimal platform API level this backend needs.
    fn min_supported_api_level(&self) -> u32;

    /// The security level this backend can provide for new keys.
    ///
    /// This is a capability, not the achieved level of any specific key.
    fn security_level(&self) -> SecurityLevel;

    /// Whether keys are held in secure hardware.
    fn supports_secure_hardware(&self) -> bool;

    /// Whether key use can be gated on biometric authentication.
    fn is_biometry_supported(&self) -> bool;

    /// Default alias/service name used when the caller supplies none.
    fn default_alias_service_name(&self) -> &str;

    /// Capability score used to rank backends. Higher is better.
    ///
    /// `1000 × is_biometry_supported + 100 × supports_secure_hardware +
    /// min_supported_api_level` — a deterministic total order; ties among
    /// equal biometric/hardware flags go to the higher API level.
    fn capability_level(&self) -> u32 {
        1000 * u32::from(self.is_biometry_supported())
            + 100 * u32::from(self.supports_secure_hardware())
            + self.min_supported_api_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Capability-query-only stub; the operation set is irrelevant here.
    struct Caps {
        biometry: bool,
        hardware: bool,
        api_level: u32,
    }

    impl CipherStorage for Caps {
        fn encrypt(
            &self,
            _handler: &dyn DecryptionResultHandler,
            _alias: &str,
            _username: &str,
            _password: &str,
            _level: SecurityLevel,
        ) -> CipherResult<EncryptionResult> {
            unimplemented!()
        }

        fn decrypt(
            &self,
            _alias: &str,
            _username: &[u8],
            _password: &[u8],
            _level: SecurityLevel,
            _initialization_vector: &[u8],
        ) -> CipherResult<DecryptionResult> {
            unimplemented!()
        }

        fn decrypt_with_handler(
            &self,
            _handler: &dyn DecryptionResultHandler,
            _alias: &str,
            _username: &[u8],
            _password: &[u8],
            _level: SecurityLevel,
            _initialization_vector: &[u8],
        ) -> CipherResult<()> {
            unimplemented!()
        }

        fn remove_key(&self, _alias: &str) -> CipherResult<()> {
            unimplemented!()
        }

        fn cipher_storage_name(&self) -> &str {
            "Caps"
        }

        fn min_supported_api_level(&self) -> u32 {
            self.api_level
        }

        fn security_level(&self) -> SecurityLevel {
            SecurityLevel::Any
        }

        fn supports_secure_hardware(&self) -> bool {
            self.hardware
        }

        fn is_biometry_supported(&self) -> bool {
            self.biometry
        }

        fn default_alias_service_name(&self) -> &str {
            "caps.default"
        }
    }

    #[test_case(false, false, 16 => 16)]
    #[test_case(false, true, 16 => 116)]
    #[test_case(true, false, 16 => 1016)]
    #[test_case(true, true, 23 => 1123)]
    fn test_capability_formula(biometry: bool, hardware: bool, api_level: u32) -> u32 {
        Caps { biometry, hardware, api_level }.capability_level()
    }

    #[test_case(0)]
    #[test_case(16)]
    #[test_case(999)]
    fn test_biometry_dominates_api_level(api_level: u32) {
        // API levels stay below 1000, so with the other flags held fixed
        // enabling biometry always wins, even against the highest API level.
        let with = Caps { biometry: true, hardware: false, api_level };
        let without = Caps { biometry: false, hardware: false, api_level: 999 };
        assert!(with.capability_level() > without.capability_level());
    }

    #[test]
    fn test_ties_break_on_api_level() {
        let older = Caps { biometry: true, hardware: true, api_level: 21 };
        let newer = Caps { biometry: true, hardware: true, api_level: 23 };
        assert!(newer.capability_level() > older.capability_level());
    }
}
