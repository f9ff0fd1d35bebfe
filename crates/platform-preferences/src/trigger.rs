use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{PreferenceBackend, PreferenceValue, Scope};
use crate::error::PreferenceError;
use crate::{GENERATE_NEW_KEY, TRIGGER_DOMAIN};

/// State of the one-shot rotation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerFlag {
    pub requested: bool,
    /// Set when a configuration profile force-sets the trigger, which is
    /// always a deployment mistake.
    pub centrally_managed: bool,
}

pub trait TriggerFlagSource: Send + Sync {
    fn read(&self) -> Result<TriggerFlag, PreferenceError>;

    /// Reset the trigger in the local scopes. Idempotent; never touches a
    /// managed value.
    fn clear(&self) -> Result<(), PreferenceError>;
}

/// `GenerateNewKey` in this system's own preference domain.
pub struct TriggerFlagStore {
    backend: Arc<dyn PreferenceBackend>,
    domain: String,
}

impl TriggerFlagStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        Self::with_domain(backend, TRIGGER_DOMAIN)
    }

    pub fn with_domain(backend: Arc<dyn PreferenceBackend>, domain: impl Into<String>) -> Self {
        Self {
            backend,
            domain: domain.into(),
        }
    }

    /// Ask for a rotation at the next login by setting the trigger for any user.
    pub fn request(&self) -> Result<(), PreferenceError> {
        if self.backend.is_forced(&self.domain, GENERATE_NEW_KEY)? {
            return Err(PreferenceError::CentrallyManaged {
                domain: self.domain.clone(),
                key: GENERATE_NEW_KEY.to_string(),
            });
        }
        info!(domain = %self.domain, "requesting recovery key rotation at next login");
        self.backend.set_value(
            Scope::AnyUser,
            &self.domain,
            GENERATE_NEW_KEY,
            Some(PreferenceValue::Boolean(true)),
        )
    }
}

impl TriggerFlagSource for TriggerFlagStore {
    fn read(&self) -> Result<TriggerFlag, PreferenceError> {
        let centrally_managed = self.backend.is_forced(&self.domain, GENERATE_NEW_KEY)?;
        let requested = self
            .backend
            .app_value(&self.domain, GENERATE_NEW_KEY)?
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        debug!(domain = %self.domain, requested, centrally_managed, "read rotation trigger");
        Ok(TriggerFlag {
            requested,
            centrally_managed,
        })
    }

    /// Both scopes are attempted even if one write fails; the first error wins.
    /// The current-user value shadows the any-user one, so it goes first.
    fn clear(&self) -> Result<(), PreferenceError> {
        let removed =
            self.backend
                .set_value(Scope::CurrentUser, &self.domain, GENERATE_NEW_KEY, None);
        if let Err(err) = &removed {
            warn!(domain = %self.domain, error = %err, "unable to remove current-user trigger");
        }
        let reset = self.backend.set_value(
            Scope::AnyUser,
            &self.domain,
            GENERATE_NEW_KEY,
            Some(PreferenceValue::Boolean(false)),
        );
        if let Err(err) = &reset {
            warn!(domain = %self.domain, error = %err, "unable to reset any-user trigger");
        }
        removed.and(reset)
    }
}
