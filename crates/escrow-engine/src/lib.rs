//! Login-time decision engine for FileVault personal recovery key rotation.
//!
//! One run walks a fixed chain of guards: encryption state, escrow policy,
//! rotation trigger, captured credentials. Any failed guard ends the run early.
//! When every guard passes the key is rotated and the local trigger is cleared
//! whatever the outcome, so a trigger yields at most one attempt. Every path,
//! including a panicking component, ends by permitting the login exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use host_context::{CredentialContext, Credentials, LoginHost};
use platform_fdesetup::{
    CommandRunner, EncryptionStatusProbe, FdesetupRotator, FdesetupStatusProbe,
    RecoveryKeyRotator, RotationOutcome, SystemCommandRunner,
};
use platform_preferences::{
    EscrowPolicySource, EscrowPolicyStore, PlistFileBackend, PreferenceBackend,
    TriggerFlagSource, TriggerFlagStore,
};
use tracing::{error, info, info_span};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod report;

pub use config::EngineConfig;
pub use error::{ConfigError, EngineError};
pub use report::{CredentialField, ExitClass, RunExit, RunReport};

/// Rotate-or-not orchestrator invoked once per login.
pub struct DecisionEngine {
    probe: Arc<dyn EncryptionStatusProbe>,
    escrow: Arc<dyn EscrowPolicySource>,
    trigger: Arc<dyn TriggerFlagSource>,
    rotator: Arc<dyn RecoveryKeyRotator>,
}

/// Facts gathered before the run ended, kept outside the guarded section so a
/// caught panic does not lose them.
#[derive(Default)]
struct RunProgress {
    escrow_location: Option<String>,
    flag_cleared: bool,
}

impl DecisionEngine {
    /// Start assembling an engine from individual components.
    pub fn builder() -> DecisionEngineBuilder {
        DecisionEngineBuilder::default()
    }

    /// Wire the system implementations: `fdesetup` through real processes and
    /// preference files in the configured directories.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
        let backend: Arc<dyn PreferenceBackend> =
            Arc::new(PlistFileBackend::new(config.preferences.clone()));

        Self::builder()
            .with_status_probe(Arc::new(FdesetupStatusProbe::with_path(
                runner.clone(),
                &config.fdesetup_path,
            )))
            .with_escrow_policy(Arc::new(EscrowPolicyStore::with_domain(
                backend.clone(),
                &config.escrow_domain,
            )))
            .with_trigger_flag(Arc::new(TriggerFlagStore::with_domain(
                backend,
                &config.trigger_domain,
            )))
            .with_rotator(Arc::new(FdesetupRotator::with_path(
                runner,
                &config.fdesetup_path,
            )))
            .build()
    }

    /// Run the decision chain once and permit the login.
    ///
    /// `host.permit_login()` is called exactly once before this returns. Nothing
    /// that goes wrong inside the chain reaches the host; it is logged and
    /// recorded on the returned report.
    pub fn run(&self, context: &dyn CredentialContext, host: &dyn LoginHost) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("escrow_run", %run_id);
        let _entered = span.enter();
        info!("starting escrow rotation check");

        let mut progress = RunProgress::default();
        let exit = panic::catch_unwind(AssertUnwindSafe(|| {
            self.evaluate(context, &mut progress)
        }))
        .unwrap_or_else(|payload| {
            let detail = panic_detail(payload.as_ref());
            error!(%detail, "escrow check panicked");
            RunExit::Faulted { detail }
        });

        let report = RunReport {
            run_id,
            exit,
            escrow_location: progress.escrow_location,
            flag_cleared: progress.flag_cleared,
        };
        report.log_summary();

        host.permit_login();
        info!("proceeding with login");
        report
    }

    fn evaluate(&self, context: &dyn CredentialContext, progress: &mut RunProgress) -> RunExit {
        let status = self.probe.status();
        if status.is_decrypting() {
            info!("FileVault is decrypting");
            return RunExit::Decrypting;
        }
        if !status.is_encrypted() {
            info!("FileVault is not enabled");
            return RunExit::NotEncrypted;
        }

        let policy = match self.escrow.policy() {
            Ok(policy) => policy,
            Err(err) => {
                error!(error = %err, "unable to read the FileVault escrow policy");
                return RunExit::PreferencesUnavailable {
                    detail: err.to_string(),
                };
            }
        };
        // Rotating without an enforced destination would orphan the new key.
        if !policy.enforced {
            info!("no MDM profile enforcing FileVault escrow is present");
            return RunExit::EscrowNotEnforced;
        }
        info!(location = %policy.location, "FileVault configured to escrow");
        progress.escrow_location = Some(policy.location);

        let flag = match self.trigger.read() {
            Ok(flag) => flag,
            Err(err) => {
                error!(error = %err, "unable to read GenerateNewKey");
                return RunExit::PreferencesUnavailable {
                    detail: err.to_string(),
                };
            }
        };
        if flag.centrally_managed {
            error!(
                "GenerateNewKey is set by an MDM profile; this is a configuration error, \
                 set the preference locally with `defaults write` instead"
            );
            return RunExit::TriggerCentrallyManaged;
        }
        if !flag.requested {
            info!("GenerateNewKey is false");
            return RunExit::NotRequested;
        }
        info!("GenerateNewKey is true");

        let credentials = match (context.account(), context.secret()) {
            (Some(account), Some(secret)) => Credentials::new(account, secret),
            (account, secret) => {
                let mut missing = Vec::new();
                if account.is_none() {
                    missing.push(CredentialField::Account);
                }
                if secret.is_none() {
                    missing.push(CredentialField::Secret);
                }
                error!(
                    ?missing,
                    "login credentials were not provided by the authorization host"
                );
                return RunExit::MissingCredentials { missing };
            }
        };

        let outcome = self.rotate(&credentials);
        drop(credentials);
        match &outcome.error_detail {
            None if outcome.succeeded => info!("new personal recovery key generated"),
            detail => error!(
                detail = detail.as_deref().unwrap_or("unknown"),
                "caught error trying to generate a new key"
            ),
        }

        info!("setting GenerateNewKey to false to avoid multiple generations");
        match self.trigger.clear() {
            Ok(()) => progress.flag_cleared = true,
            Err(err) => error!(error = %err, "unable to clear GenerateNewKey"),
        }

        RunExit::Rotated { outcome }
    }

    /// A panicking rotator counts as a failed attempt so the trigger is still cleared.
    fn rotate(&self, credentials: &Credentials) -> RotationOutcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.rotator.rotate(credentials)))
            .unwrap_or_else(|payload| {
                RotationOutcome::failure(format!(
                    "rotation panicked: {}",
                    panic_detail(payload.as_ref())
                ))
            })
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Collects the four components of a [`DecisionEngine`]; all are required.
#[derive(Default)]
pub struct DecisionEngineBuilder {
    probe: Option<Arc<dyn EncryptionStatusProbe>>,
    escrow: Option<Arc<dyn EscrowPolicySource>>,
    trigger: Option<Arc<dyn TriggerFlagSource>>,
    rotator: Option<Arc<dyn RecoveryKeyRotator>>,
}

impl DecisionEngineBuilder {
    /// Source of the FileVault encryption state.
    pub fn with_status_probe(mut self, probe: Arc<dyn EncryptionStatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Source of the MDM escrow policy.
    pub fn with_escrow_policy(mut self, escrow: Arc<dyn EscrowPolicySource>) -> Self {
        self.escrow = Some(escrow);
        self
    }

    /// Store holding the `GenerateNewKey` trigger.
    pub fn with_trigger_flag(mut self, trigger: Arc<dyn TriggerFlagSource>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Rotator invoked once every guard passes.
    pub fn with_rotator(mut self, rotator: Arc<dyn RecoveryKeyRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Fails with [`EngineError::MissingComponent`] naming the first unset component.
    pub fn build(self) -> Result<DecisionEngine, EngineError> {
        Ok(DecisionEngine {
            probe: self
                .probe
                .ok_or(EngineError::MissingComponent("status probe"))?,
            escrow: self
                .escrow
                .ok_or(EngineError::MissingComponent("escrow policy source"))?,
            trigger: self
                .trigger
                .ok_or(EngineError::MissingComponent("trigger flag source"))?,
            rotator: self
                .rotator
                .ok_or(EngineError::MissingComponent("recovery key rotator"))?,
        })
    }
}
