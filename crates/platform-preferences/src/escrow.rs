use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::backend::PreferenceBackend;
use crate::error::PreferenceError;
use crate::{ESCROW_DOMAIN, LOCATION_KEY};

/// Location reported when the escrow payload carries no description.
pub const NO_LOCATION_DESCRIPTION: &str = "(No Location Description)";

/// Escrow destination and whether management enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowPolicy {
    pub location: String,
    /// True only when `Location` is force-set by a configuration profile.
    pub enforced: bool,
}

pub trait EscrowPolicySource: Send + Sync {
    fn policy(&self) -> Result<EscrowPolicy, PreferenceError>;
}

/// Reads the FileVault escrow payload from the preference backend.
pub struct EscrowPolicyStore {
    backend: Arc<dyn PreferenceBackend>,
    domain: String,
}

impl EscrowPolicyStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        Self::with_domain(backend, ESCROW_DOMAIN)
    }

    pub fn with_domain(backend: Arc<dyn PreferenceBackend>, domain: impl Into<String>) -> Self {
        Self {
            backend,
            domain: domain.into(),
        }
    }
}

impl EscrowPolicySource for EscrowPolicyStore {
    fn policy(&self) -> Result<EscrowPolicy, PreferenceError> {
        let enforced = self.backend.is_forced(&self.domain, LOCATION_KEY)?;
        let location = self
            .backend
            .app_value(&self.domain, LOCATION_KEY)?
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| NO_LOCATION_DESCRIPTION.to_string());
        debug!(domain = %self.domain, enforced, "read escrow policy");
        Ok(EscrowPolicy { location, enforced })
    }
}
