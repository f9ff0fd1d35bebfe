//! Scoped preference storage contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PreferenceError;

/// Preference scope, listed from highest to lowest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Installed by device management; read-only.
    Managed,
    /// Local value for the user running the mechanism.
    CurrentUser,
    /// Local value shared by every user on the host.
    AnyUser,
}

impl Scope {
    /// Lookup order used to resolve the effective value of a key.
    pub const PRECEDENCE: [Scope; 3] = [Scope::Managed, Scope::CurrentUser, Scope::AnyUser];

    #[must_use]
    pub const fn is_local(self) -> bool {
        !matches!(self, Scope::Managed)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Scope::Managed => "managed",
            Scope::CurrentUser => "current-user",
            Scope::AnyUser => "any-user",
        };
        f.write_str(label)
    }
}

/// The subset of property list values this system reads or writes.
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    /// Dates, data, arrays and dictionaries; present but never interpreted.
    Other,
}

impl PreferenceValue {
    /// Boolean view. Integers `0` and `1` are accepted as written by
    /// `defaults write -int`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            Self::Integer(0) => Some(false),
            Self::Integer(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn from_plist(value: &plist::Value) -> Self {
        match value {
            plist::Value::Boolean(flag) => Self::Boolean(*flag),
            plist::Value::Integer(number) => number
                .as_signed()
                .map_or(Self::Other, Self::Integer),
            plist::Value::Real(number) => Self::Real(*number),
            plist::Value::String(text) => Self::String(text.clone()),
            _ => Self::Other,
        }
    }

    pub(crate) fn to_plist(&self) -> Option<plist::Value> {
        match self {
            Self::Boolean(flag) => Some(plist::Value::Boolean(*flag)),
            Self::Integer(number) => Some(plist::Value::Integer((*number).into())),
            Self::Real(number) => Some(plist::Value::Real(*number)),
            Self::String(text) => Some(plist::Value::String(text.clone())),
            Self::Other => None,
        }
    }
}

/// Storage for preference values, addressed by scope, domain and key.
pub trait PreferenceBackend: Send + Sync {
    /// Value stored at exactly `scope`, ignoring the other scopes.
    fn value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
    ) -> Result<Option<PreferenceValue>, PreferenceError>;

    /// Store (`Some`) or remove (`None`) a local value. Writing the managed
    /// scope fails with [`PreferenceError::ReadOnlyScope`]; removing a missing
    /// value succeeds.
    fn set_value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
        value: Option<PreferenceValue>,
    ) -> Result<(), PreferenceError>;

    /// Effective value, resolved through [`Scope::PRECEDENCE`].
    fn app_value(
        &self,
        domain: &str,
        key: &str,
    ) -> Result<Option<PreferenceValue>, PreferenceError> {
        for scope in Scope::PRECEDENCE {
            if let Some(value) = self.value(scope, domain, key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Whether device management force-sets `key`.
    fn is_forced(&self, domain: &str, key: &str) -> Result<bool, PreferenceError> {
        Ok(self.value(Scope::Managed, domain, key)?.is_some())
    }
}
