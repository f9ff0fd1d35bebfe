//! Authorization host boundary: captured login credentials and the permit signal.
//!
//! The host owns the authentication sequence. It hands the mechanism an opaque
//! bag of key-tagged buffers captured by earlier mechanisms and expects exactly
//! one result to be set before the sequence continues. Both sides are modelled
//! here as narrow traits so the decision engine never touches raw host memory.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;
use zeroize::Zeroizing;

/// Context key under which the host stores the short account name.
pub const USERNAME_KEY: &str = "username";
/// Context key under which the host stores the account password.
pub const PASSWORD_KEY: &str = "password";

/// Read-only view over the credentials captured earlier in the login sequence.
pub trait CredentialContext: Send + Sync {
    /// Account name, or `None` when the host did not provide a usable value.
    fn account(&self) -> Option<String>;
    /// Account secret, or `None` when the host did not provide a usable value.
    fn secret(&self) -> Option<Zeroizing<String>>;
}

/// Outbound signal that lets the host continue the login sequence.
pub trait LoginHost: Send + Sync {
    fn permit_login(&self);
}

/// Account name and secret held for the duration of a single rotation.
#[derive(Clone)]
pub struct Credentials {
    account: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: Zeroizing<String>) -> Self {
        Self {
            account: account.into(),
            secret,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Key-tagged byte buffers as supplied by the authorization host.
#[derive(Default)]
pub struct AuthContextValues {
    values: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl AuthContextValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful when simulating the host.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(key, bytes);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.values
            .insert(key.into(), Zeroizing::new(bytes.into()));
    }

    /// Decode a buffer as UTF-8 text with NUL padding removed.
    ///
    /// Missing, zero-length, non-UTF-8 and all-padding buffers are treated as
    /// "not available" rather than as errors.
    fn text_value(&self, key: &str) -> Option<Zeroizing<String>> {
        let Some(bytes) = self.values.get(key) else {
            debug!(key, "context value not present");
            return None;
        };
        if bytes.is_empty() {
            debug!(key, "context value has zero length");
            return None;
        }
        let Ok(text) = std::str::from_utf8(bytes.as_slice()) else {
            debug!(key, "context value is not valid utf-8");
            return None;
        };
        let stripped = Zeroizing::new(text.replace('\0', ""));
        if stripped.is_empty() {
            debug!(key, "context value contains only padding");
            return None;
        }
        Some(stripped)
    }
}

impl fmt::Debug for AuthContextValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("AuthContextValues")
            .field("keys", &keys)
            .finish()
    }
}

impl CredentialContext for AuthContextValues {
    fn account(&self) -> Option<String> {
        debug!("requesting account name from host context");
        self.text_value(USERNAME_KEY)
            .map(|value| value.as_str().to_owned())
    }

    fn secret(&self) -> Option<Zeroizing<String>> {
        debug!("requesting secret from host context");
        self.text_value(PASSWORD_KEY)
    }
}

/// Host double that counts permit signals.
#[derive(Debug, Default)]
pub struct RecordingHost {
    permits: AtomicUsize,
}

impl RecordingHost {
    /// Number of times `permit_login` has been called.
    pub fn permit_count(&self) -> usize {
        self.permits.load(Ordering::SeqCst)
    }
}

impl LoginHost for RecordingHost {
    fn permit_login(&self) {
        self.permits.fetch_add(1, Ordering::SeqCst);
    }
}
