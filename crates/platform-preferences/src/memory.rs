//! In-memory preference backend for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::{PreferenceBackend, PreferenceValue, Scope};
use crate::error::PreferenceError;

/// Single access captured by [`InMemoryPreferences`].
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceAccess {
    Read {
        scope: Scope,
        domain: String,
        key: String,
    },
    Write {
        scope: Scope,
        domain: String,
        key: String,
        value: Option<PreferenceValue>,
    },
}

impl PreferenceAccess {
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

type Slot = (Scope, String, String);

/// Backend keeping values in a map and logging every access through the trait.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    values: Mutex<HashMap<Slot, PreferenceValue>>,
    accesses: Mutex<Vec<PreferenceAccess>>,
    failure: Mutex<Option<PreferenceError>>,
}

impl InMemoryPreferences {
    /// Seed a value at any scope, including `Managed`. Not logged.
    pub fn seed(&self, scope: Scope, domain: &str, key: &str, value: PreferenceValue) {
        self.values
            .lock()
            .expect("preference mutex poisoned")
            .insert((scope, domain.to_string(), key.to_string()), value);
    }

    /// Inspect a stored value without logging an access.
    pub fn peek(&self, scope: Scope, domain: &str, key: &str) -> Option<PreferenceValue> {
        self.values
            .lock()
            .expect("preference mutex poisoned")
            .get(&(scope, domain.to_string(), key.to_string()))
            .cloned()
    }

    /// Make every subsequent trait call fail with `error`.
    pub fn fail_with(&self, error: PreferenceError) {
        *self.failure.lock().expect("failure mutex poisoned") = Some(error);
    }

    pub fn accesses(&self) -> Vec<PreferenceAccess> {
        self.accesses
            .lock()
            .expect("access mutex poisoned")
            .clone()
    }

    pub fn writes(&self) -> Vec<PreferenceAccess> {
        self.accesses()
            .into_iter()
            .filter(PreferenceAccess::is_write)
            .collect()
    }

    fn record(&self, access: PreferenceAccess) -> Result<(), PreferenceError> {
        self.accesses
            .lock()
            .expect("access mutex poisoned")
            .push(access);
        match self.failure.lock().expect("failure mutex poisoned").as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl PreferenceBackend for InMemoryPreferences {
    fn value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
    ) -> Result<Option<PreferenceValue>, PreferenceError> {
        self.record(PreferenceAccess::Read {
            scope,
            domain: domain.to_string(),
            key: key.to_string(),
        })?;
        Ok(self.peek(scope, domain, key))
    }

    fn set_value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
        value: Option<PreferenceValue>,
    ) -> Result<(), PreferenceError> {
        self.record(PreferenceAccess::Write {
            scope,
            domain: domain.to_string(),
            key: key.to_string(),
            value: value.clone(),
        })?;
        if !scope.is_local() {
            return Err(PreferenceError::ReadOnlyScope(scope));
        }
        let slot = (scope, domain.to_string(), key.to_string());
        let mut values = self.values.lock().expect("preference mutex poisoned");
        match value {
            Some(value) => {
                values.insert(slot, value);
            }
            None => {
                values.remove(&slot);
            }
        }
        Ok(())
    }
}
