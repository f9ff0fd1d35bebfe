//! Operator-facing record of a single engine run.

use platform_fdesetup::RotationOutcome;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

/// Credential the host failed to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialField {
    Account,
    Secret,
}

/// Where a run left the decision chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "exit", rename_all = "kebab-case")]
pub enum RunExit {
    Decrypting,
    NotEncrypted,
    EscrowNotEnforced,
    PreferencesUnavailable { detail: String },
    TriggerCentrallyManaged,
    NotRequested,
    MissingCredentials { missing: Vec<CredentialField> },
    Rotated { outcome: RotationOutcome },
    Faulted { detail: String },
}

/// Error taxonomy a run exit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitClass {
    /// A rotation ran and succeeded.
    Completed,
    /// Nothing to do on this login.
    Benign,
    /// Deployment mistake an operator has to fix.
    Configuration,
    /// A tool or store failed.
    Operational,
}

impl RunExit {
    /// Error taxonomy this exit belongs to.
    pub fn class(&self) -> ExitClass {
        match self {
            Self::Decrypting | Self::NotEncrypted | Self::EscrowNotEnforced | Self::NotRequested => {
                ExitClass::Benign
            }
            Self::TriggerCentrallyManaged | Self::MissingCredentials { .. } => {
                ExitClass::Configuration
            }
            Self::Rotated { outcome } if outcome.succeeded => ExitClass::Completed,
            Self::Rotated { .. } | Self::PreferencesUnavailable { .. } | Self::Faulted { .. } => {
                ExitClass::Operational
            }
        }
    }

    /// Whether the rotation step was reached.
    #[must_use]
    pub fn rotation_attempted(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }
}

/// Outcome of one [`DecisionEngine::run`](crate::DecisionEngine::run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Identifier shared with the `escrow_run` tracing span.
    pub run_id: Uuid,
    /// Step at which the decision chain ended.
    pub exit: RunExit,
    /// Escrow destination, recorded once the policy check passed.
    pub escrow_location: Option<String>,
    /// Whether the local trigger was cleared during this run.
    pub flag_cleared: bool,
}

impl RunReport {
    /// Error taxonomy of [`RunReport::exit`].
    pub fn class(&self) -> ExitClass {
        self.exit.class()
    }

    pub(crate) fn log_summary(&self) {
        let class = self.class();
        match class {
            ExitClass::Configuration | ExitClass::Operational => error!(
                ?class,
                exit = ?self.exit,
                flag_cleared = self.flag_cleared,
                "escrow run finished with errors"
            ),
            ExitClass::Completed | ExitClass::Benign => info!(
                ?class,
                exit = ?self.exit,
                flag_cleared = self.flag_cleared,
                "escrow run finished"
            ),
        }
    }
}
