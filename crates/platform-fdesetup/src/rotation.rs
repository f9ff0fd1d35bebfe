//! Personal recovery key rotation through `fdesetup changerecovery`.

use std::path::PathBuf;
use std::sync::Arc;

use host_context::Credentials;
use serde::Serialize;
use tracing::{error, info};
use zeroize::Zeroizing;

use crate::command::CommandRunner;
use crate::error::PayloadError;
use crate::DEFAULT_FDESETUP_PATH;

const ROTATE_ARGS: [&str; 3] = ["changerecovery", "-personal", "-inputplist"];

/// Result of a single rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationOutcome {
    pub succeeded: bool,
    pub error_detail: Option<String>,
}

impl RotationOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error_detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_detail: Some(detail.into()),
        }
    }
}

pub trait RecoveryKeyRotator: Send + Sync {
    /// Rotate the personal recovery key. Never panics on tool failure; the
    /// outcome carries the diagnostic instead.
    fn rotate(&self, credentials: &Credentials) -> RotationOutcome;
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RotationPayload<'a> {
    username: &'a str,
    password: &'a str,
}

/// Serialize credentials into the XML property list `fdesetup -inputplist` reads.
pub fn rotation_payload(credentials: &Credentials) -> Result<Zeroizing<Vec<u8>>, PayloadError> {
    let payload = RotationPayload {
        username: credentials.account(),
        password: credentials.secret(),
    };
    let mut buffer = Zeroizing::new(Vec::with_capacity(512));
    plist::to_writer_xml(&mut *buffer, &payload)
        .map_err(|err| PayloadError::Plist(err.to_string()))?;
    Ok(buffer)
}

/// Rotator that runs `fdesetup changerecovery -personal -inputplist`.
pub struct FdesetupRotator {
    runner: Arc<dyn CommandRunner>,
    fdesetup: PathBuf,
}

impl FdesetupRotator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_path(runner, DEFAULT_FDESETUP_PATH)
    }

    pub fn with_path(runner: Arc<dyn CommandRunner>, fdesetup: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            fdesetup: fdesetup.into(),
        }
    }
}

impl RecoveryKeyRotator for FdesetupRotator {
    fn rotate(&self, credentials: &Credentials) -> RotationOutcome {
        info!("generating a new FileVault personal recovery key");
        let payload = match rotation_payload(credentials) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "unable to build rotation input");
                return RotationOutcome::failure(err.to_string());
            }
        };

        let output = match self
            .runner
            .run(&self.fdesetup, &ROTATE_ARGS, Some(payload.as_slice()))
        {
            Ok(output) => output,
            Err(err) => {
                error!(error = %err, "fdesetup changerecovery could not be run");
                return RotationOutcome::failure(err.to_string());
            }
        };

        match output.exit_code {
            Some(0) => {
                info!("recovery key rotation succeeded");
                RotationOutcome::success()
            }
            Some(code) => {
                let stderr = output.stderr_text();
                error!(exit_code = code, "fdesetup terminated with a non-zero exit status");
                error!(stderr = %stderr, "fdesetup standard error");
                if stderr.is_empty() {
                    RotationOutcome::failure(format!("fdesetup exited with status {code}"))
                } else {
                    RotationOutcome::failure(stderr)
                }
            }
            None => {
                let stderr = output.stderr_text();
                error!(stderr = %stderr, "fdesetup terminated by a signal");
                RotationOutcome::failure("fdesetup terminated by a signal")
            }
        }
    }
}
