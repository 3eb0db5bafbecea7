//! Decryption result handler protocol.
//!
//! Backends hand an in-flight operation to a handler when using the key
//! requires out-of-band user authorization. The handler owns scheduling of
//! that interaction; the backend thread never drives UI. Each invocation
//! walks a small state machine — pending, awaiting permission, then exactly
//! one terminal result or error — and any number of threads may block on
//! [`DecryptionResultHandler::wait_result`] until the terminal payload is
//! posted.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{CipherError, CipherResult};
use crate::keystore::CipherOp;
use crate::types::{DecryptionContext, DecryptionResult, EncryptContext, EncryptionResult};

/// Terminal payload of a handler invocation.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The invocation decrypted credentials.
    Decrypted(DecryptionResult),
    /// The invocation encrypted credentials.
    Encrypted(EncryptionResult),
}

impl Completion {
    /// Extracts the decryption result.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CryptoFailed`] if the completion carried an
    /// encryption result instead.
    pub fn into_decryption(self) -> CipherResult<DecryptionResult> {
        match self {
            Self::Decrypted(result) => Ok(result),
            Self::Encrypted(_) => Err(CipherError::crypto(
                "handler completed with an encryption result, expected decryption",
            )),
        }
    }

    /// Extracts the encryption result.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::CryptoFailed`] if the completion carried a
    /// decryption result instead.
    pub fn into_encryption(self) -> CipherResult<EncryptionResult> {
        match self {
            Self::Encrypted(result) => Ok(result),
            Self::Decrypted(_) => Err(CipherError::crypto(
                "handler completed with a decryption result, expected encryption",
            )),
        }
    }
}

/// Per-invocation state.
enum GateState {
    /// No permission request seen yet.
    Pending,
    /// A permission request is out; the interactive step owns progress.
    AwaitingPermission,
    /// Terminal. Never left once entered.
    Done(CipherResult<Completion>),
}

/// One-shot completion gate: single writer, any number of waiting readers.
///
/// The terminal payload is written exactly once, under the lock, before any
/// waiter is released, so the completion callback is always sequenced-before
/// the unblocking of `wait`. A second completion attempt is a protocol
/// violation: it is ignored and logged, and can never overwrite the first
/// payload.
pub struct CompletionGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl CompletionGate {
    /// Creates a gate in the pending state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Marks the invocation as awaiting out-of-band permission.
    ///
    /// No effect once a terminal state was reached.
    pub fn mark_awaiting_permission(&self) {
        if let Ok(mut state) = self.state.lock() {
            if matches!(*state, GateState::Pending) {
                *state = GateState::AwaitingPermission;
            }
        }
    }

    /// Posts the terminal payload and releases all waiters.
    ///
    /// Returns `false` when the gate already holds a terminal payload; the
    /// attempt is dropped and logged.
    pub fn complete(&self, outcome: CipherResult<Completion>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            tracing::error!("completion gate lock poisoned, dropping completion");
            return false;
        };
        if matches!(*state, GateState::Done(_)) {
            tracing::warn!("handler completed more than once, ignoring repeated completion");
            return false;
        }
        *state = GateState::Done(outcome);
        drop(state);
        self.cond.notify_all();
        true
    }

    /// Blocks until the terminal payload is posted or `timeout` elapses.
    ///
    /// Safe under any number of concurrent waiters; all of them observe the
    /// identical payload.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::TimedOut`] when the deadline elapses before a
    /// terminal state is reached, or the posted error when the invocation
    /// failed.
    pub fn wait(&self, timeout: Duration) -> CipherResult<Completion> {
        let state = self
            .state
            .lock()
            .map_err(|_| CipherError::crypto("completion gate lock poisoned"))?;
        let (state, wait_result) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !matches!(s, GateState::Done(_)))
            .map_err(|_| CipherError::crypto("completion gate lock poisoned"))?;
        match &*state {
            GateState::Done(outcome) => outcome.clone(),
            _ => {
                debug_assert!(wait_result.timed_out());
                Err(CipherError::TimedOut { waited: timeout })
            }
        }
    }

    /// Non-blocking read of the terminal payload; `None` before completion.
    #[must_use]
    pub fn try_result(&self) -> Option<CipherResult<Completion>> {
        match &*self.state.lock().ok()? {
            GateState::Done(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.lock() {
            Ok(guard) => match &*guard {
                GateState::Pending => "Pending",
                GateState::AwaitingPermission => "AwaitingPermission",
                GateState::Done(_) => "Done",
            },
            Err(_) => "Poisoned",
        };
        f.debug_struct("CompletionGate").field("state", &state).finish()
    }
}

/// Handler driving the asynchronous, possibly user-interactive completion of
/// a cipher operation.
///
/// A backend calls one of the `ask_*` entry points when key use requires
/// authorization, or posts the outcome directly through `on_decrypt` /
/// `on_encrypt` when it does not. Exactly one completion callback fires per
/// invocation; results are read through [`wait_result`] or [`try_result`]
/// only.
///
/// [`wait_result`]: DecryptionResultHandler::wait_result
/// [`try_result`]: DecryptionResultHandler::try_result
pub trait DecryptionResultHandler: Send + Sync {
    /// Requests out-of-band authorization for a decryption.
    ///
    /// The handler takes ownership of the context and the cipher operation
    /// handle for the remainder of the invocation; neither may be retained
    /// past completion.
    fn ask_access_permissions(&self, context: DecryptionContext, cipher: Box<dyn CipherOp>);

    /// Requests out-of-band authorization for an encryption.
    fn ask_encrypt_permissions(&self, context: EncryptContext, cipher: Box<dyn CipherOp>);

    /// Posts the decryption outcome. Single completion callback per
    /// invocation; repeated calls are protocol violations and are ignored.
    fn on_decrypt(&self, result: CipherResult<DecryptionResult>);

    /// Posts the encryption outcome. Same single-shot contract as
    /// [`on_decrypt`](DecryptionResultHandler::on_decrypt).
    fn on_encrypt(&self, result: CipherResult<EncryptionResult>);

    /// Blocks until the invocation reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::TimedOut`] when `timeout` elapses first — an
    /// abandoned interactive prompt must never block a caller forever — or
    /// the posted error when the invocation failed.
    fn wait_result(&self, timeout: Duration) -> CipherResult<Completion>;

    /// Non-blocking read of the terminal payload; `None` before completion.
    fn try_result(&self) -> Option<CipherResult<Completion>>;
}

/// What an in-flight authorization request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    /// Credentials are being decrypted.
    Decrypt,
    /// Credentials are being encrypted.
    Encrypt,
}

/// Description of an authorization prompt, bound to one in-flight operation.
///
/// The cipher-operation handle itself is *not* part of the request: it stays
/// exclusively owned by the handler, which ties this request to the pending
/// operation it retained.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Alias of the key the operation runs under.
    pub key_alias: String,
    /// Whether the pending operation encrypts or decrypts.
    pub operation: OperationKind,
    /// Human-readable reason shown by the prompt.
    pub reason: String,
}

/// Outcome of an authorization prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user authorized the operation.
    Succeeded,
    /// The user dismissed the prompt.
    Cancelled,
    /// The prompt failed (lockout, sensor error, system failure).
    Failed(String),
}

/// Callback invoked exactly once with the prompt outcome.
pub type AuthCallback = Box<dyn FnOnce(AuthOutcome) + Send>;

/// Interactive-authentication collaborator: presents an out-of-band prompt
/// (biometric unlock or equivalent) and reports its outcome.
///
/// Implementations decide where the prompt runs (typically a UI thread); the
/// calling backend thread never drives it.
pub trait AccessControl: Send + Sync {
    /// Presents the prompt described by `request` and invokes `on_result`
    /// exactly once with the outcome.
    fn authenticate(&self, request: AuthRequest, on_result: AuthCallback);
}

/// Handler for contexts where no user interaction is possible.
///
/// Any permission request completes immediately with a
/// [`CipherError::CryptoFailed`]: the caller asked for an operation that
/// needs step-up authentication on a path that cannot show UI.
#[derive(Debug, Default)]
pub struct NonInteractiveHandler {
    gate: CompletionGate,
}

impl NonInteractiveHandler {
    /// Creates a new non-interactive handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecryptionResultHandler for NonInteractiveHandler {
    fn ask_access_permissions(&self, context: DecryptionContext, _cipher: Box<dyn CipherOp>) {
        tracing::debug!(alias = %context.key_alias, "refusing interactive decrypt");
        self.on_decrypt(Err(CipherError::crypto(
            "key use requires user authentication, but the handler is non-interactive",
        )));
    }

    fn ask_encrypt_permissions(&self, context: EncryptContext, _cipher: Box<dyn CipherOp>) {
        tracing::debug!(alias = %context.key_alias, "refusing interactive encrypt");
        self.on_encrypt(Err(CipherError::crypto(
            "key use requires user authentication, but the handler is non-interactive",
        )));
    }

    fn on_decrypt(&self, result: CipherResult<DecryptionResult>) {
        self.gate.complete(result.map(Completion::Decrypted));
    }

    fn on_encrypt(&self, result: CipherResult<EncryptionResult>) {
        self.gate.complete(result.map(Completion::Encrypted));
    }

    fn wait_result(&self, timeout: Duration) -> CipherResult<Completion> {
        self.gate.wait(timeout)
    }

    fn try_result(&self) -> Option<CipherResult<Completion>> {
        self.gate.try_result()
    }
}

/// Operation parked while its authorization prompt is out.
enum PendingOp {
    Decrypt(DecryptionContext, Box<dyn CipherOp>),
    Encrypt(EncryptContext, Box<dyn CipherOp>),
}

/// State shared with the prompt-outcome callback.
struct InteractiveShared {
    gate: CompletionGate,
    pending: Mutex<Option<PendingOp>>,
}

impl InteractiveShared {
    /// Finishes (or fails) the parked operation with the prompt outcome.
    ///
    /// The context and cipher handle are dropped here regardless of outcome.
    fn resolve(&self, outcome: AuthOutcome) {
        let pending = match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                self.gate
                    .complete(Err(CipherError::crypto("pending operation lock poisoned")));
                return;
            }
        };
        let Some(pending) = pending else {
            self.gate.complete(Err(CipherError::crypto(
                "authorization resolved with no pending operation",
            )));
            return;
        };
        let result = match outcome {
            AuthOutcome::Succeeded => match pending {
                PendingOp::Decrypt(context, cipher) => {
                    context.finish(cipher.as_ref()).map(Completion::Decrypted)
                }
                PendingOp::Encrypt(context, cipher) => {
                    context.finish(cipher.as_ref()).map(Completion::Encrypted)
                }
            },
            AuthOutcome::Cancelled => Err(CipherError::Cancelled),
            AuthOutcome::Failed(message) => Err(CipherError::crypto(format!(
                "user authentication failed: {message}"
            ))),
        };
        self.gate.complete(result);
    }
}

/// Handler that gates cipher operations behind an [`AccessControl`] prompt.
///
/// On a permission request the context and cipher handle are parked, the
/// prompt is dispatched, and the parked operation is finished (or failed)
/// when the outcome arrives. The parked pair lives only between request and
/// outcome.
pub struct InteractiveHandler {
    shared: Arc<InteractiveShared>,
    access_control: Arc<dyn AccessControl>,
    reason: String,
}

impl InteractiveHandler {
    /// Creates a handler that prompts through `access_control` with the
    /// given human-readable reason.
    #[must_use]
    pub fn new(access_control: Arc<dyn AccessControl>, reason: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(InteractiveShared {
                gate: CompletionGate::new(),
                pending: Mutex::new(None),
            }),
            access_control,
            reason: reason.into(),
        }
    }

    fn dispatch(&self, key_alias: String, operation: OperationKind, pending: PendingOp) {
        self.shared.gate.mark_awaiting_permission();
        if let Ok(mut guard) = self.shared.pending.lock() {
            *guard = Some(pending);
        } else {
            self.shared
                .gate
                .complete(Err(CipherError::crypto("pending operation lock poisoned")));
            return;
        }
        let request = AuthRequest {
            key_alias,
            operation,
            reason: self.reason.clone(),
        };
        tracing::debug!(alias = %request.key_alias, operation = %request.operation, "requesting access permissions");
        let shared = Arc::clone(&self.shared);
        self.access_control
            .authenticate(request, Box::new(move |outcome| shared.resolve(outcome)));
    }
}

impl fmt::Debug for InteractiveHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveHandler")
            .field("gate", &self.shared.gate)
            .field("reason", &self.reason)
            .finish()
    }
}

impl DecryptionResultHandler for InteractiveHandler {
    fn ask_access_permissions(&self, context: DecryptionContext, cipher: Box<dyn CipherOp>) {
        let alias = context.key_alias.clone();
        self.dispatch(alias, OperationKind::Decrypt, PendingOp::Decrypt(context, cipher));
    }

    fn ask_encrypt_permissions(&self, context: EncryptContext, cipher: Box<dyn CipherOp>) {
        let alias = context.key_alias.clone();
        self.dispatch(alias, OperationKind::Encrypt, PendingOp::Encrypt(context, cipher));
    }

    fn on_decrypt(&self, result: CipherResult<DecryptionResult>) {
        self.shared.gate.complete(result.map(Completion::Decrypted));
    }

    fn on_encrypt(&self, result: CipherResult<EncryptionResult>) {
        self.shared.gate.complete(result.map(Completion::Encrypted));
    }

    fn wait_result(&self, timeout: Duration) -> CipherResult<Completion> {
        self.shared.gate.wait(timeout)
    }

    fn try_result(&self) -> Option<CipherResult<Completion>> {
        self.shared.gate.try_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SecurityLevel;
    use std::thread;

    fn decrypted(username: &str) -> CipherResult<Completion> {
        Ok(Completion::Decrypted(DecryptionResult::new(
            username,
            "pw",
            SecurityLevel::Any,
        )))
    }

    #[test]
    fn test_gate_completes_once() {
        let gate = CompletionGate::new();
        assert!(gate.try_result().is_none());
        assert!(gate.complete(decrypted("first")));
        assert!(!gate.complete(decrypted("second")));

        let completion = gate.wait(Duration::from_millis(10)).unwrap();
        match completion {
            Completion::Decrypted(result) => assert_eq!(result.username(), "first"),
            Completion::Encrypted(_) => panic!("wrong completion kind"),
        }
    }

    #[test]
    fn test_gate_wait_times_out() {
        let gate = CompletionGate::new();
        gate.mark_awaiting_permission();
        let err = gate.wait(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, CipherError::TimedOut { .. }));
    }

    #[test]
    fn test_gate_releases_all_waiters_with_identical_payload() {
        let gate = Arc::new(CompletionGate::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(thread::spawn(move || {
                gate.wait(Duration::from_secs(5)).unwrap()
            }));
        }
        // Give the waiters a moment to park before completing.
        thread::sleep(Duration::from_millis(20));
        assert!(gate.complete(decrypted("shared")));

        for handle in handles {
            match handle.join().unwrap() {
                Completion::Decrypted(result) => {
                    assert_eq!(result.username(), "shared");
                    assert_eq!(result.security_level(), SecurityLevel::Any);
                }
                Completion::Encrypted(_) => panic!("wrong completion kind"),
            }
        }
    }

    #[test]
    fn test_gate_error_payload_reaches_waiters() {
        let gate = CompletionGate::new();
        gate.complete(Err(CipherError::Cancelled));
        let err = gate.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CipherError::Cancelled));
        // Repeated completion cannot overwrite the terminal error.
        gate.complete(decrypted("late"));
        let err = gate.wait(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CipherError::Cancelled));
    }

    #[test]
    fn test_non_interactive_handler_refuses_interaction() {
        use crate::memory::MemoryKeyStore;
        use crate::keystore::KeyStore;

        let store = MemoryKeyStore::new();
        let key = store.obtain_key("svc", SecurityLevel::Any).unwrap();
        let cipher = store.begin_cipher(&key, b"Test").unwrap();

        let handler = NonInteractiveHandler::new();
        let context = DecryptionContext::new("svc", key, b"u", b"p", &[0; 24]);
        handler.ask_access_permissions(context, cipher);

        let err = handler.wait_result(Duration::from_millis(10)).unwrap_err();
        match err {
            CipherError::CryptoFailed { message, .. } => {
                assert!(message.contains("non-interactive"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
