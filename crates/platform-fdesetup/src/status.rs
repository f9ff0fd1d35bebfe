//! FileVault status probing.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::command::CommandRunner;
use crate::DEFAULT_FDESETUP_PATH;

const MARKER_ON: &str = "FileVault is On.";
const MARKER_DECRYPTING: &str = "Decryption in progress:";
const MARKER_OFF: &str = "FileVault is Off.";

/// Point-in-time encryption state of the boot volume.
///
/// Only constructible through [`on`](Self::on), [`off`](Self::off) and
/// [`decrypting`](Self::decrypting), which keeps
/// `decrypting` from ever being set without `encrypted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncryptionStatus {
    encrypted: bool,
    decrypting: bool,
}

impl EncryptionStatus {
    pub const fn on() -> Self {
        Self {
            encrypted: true,
            decrypting: false,
        }
    }

    pub const fn decrypting() -> Self {
        Self {
            encrypted: true,
            decrypting: true,
        }
    }

    pub const fn off() -> Self {
        Self {
            encrypted: false,
            decrypting: false,
        }
    }

    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    #[must_use]
    pub const fn is_decrypting(&self) -> bool {
        self.decrypting
    }
}

/// Marker recognised in `fdesetup status` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMarker {
    On,
    Decrypting,
    Off,
    Unrecognized,
}

impl StatusMarker {
    /// Classify status output. `On` wins when several markers are present.
    pub fn parse(output: &str) -> Self {
        if output.contains(MARKER_ON) {
            Self::On
        } else if output.contains(MARKER_DECRYPTING) {
            Self::Decrypting
        } else if output.contains(MARKER_OFF) {
            Self::Off
        } else {
            Self::Unrecognized
        }
    }

    pub const fn status(self) -> EncryptionStatus {
        match self {
            Self::On => EncryptionStatus::on(),
            Self::Decrypting => EncryptionStatus::decrypting(),
            Self::Off | Self::Unrecognized => EncryptionStatus::off(),
        }
    }
}

pub trait EncryptionStatusProbe: Send + Sync {
    /// Current encryption state. Failures read as [`EncryptionStatus::off`].
    fn status(&self) -> EncryptionStatus;
}

/// Probe that runs `fdesetup status`.
pub struct FdesetupStatusProbe {
    runner: Arc<dyn CommandRunner>,
    fdesetup: PathBuf,
}

impl FdesetupStatusProbe {
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

impl EncryptionStatusProbe for FdesetupStatusProbe {
    fn status(&self) -> EncryptionStatus {
        info!("getting FileVault status");
        let output = match self.runner.run(&self.fdesetup, &["status"], None) {
            Ok(output) => output,
            Err(err) => {
                error!(error = %err, "fdesetup status could not be run");
                return EncryptionStatus::off();
            }
        };
        let Ok(text) = std::str::from_utf8(&output.stdout) else {
            error!("fdesetup status output is not valid utf-8");
            return EncryptionStatus::off();
        };

        let marker = StatusMarker::parse(text);
        match marker {
            StatusMarker::On => info!("FileVault is on"),
            StatusMarker::Decrypting => info!("FileVault is decrypting"),
            StatusMarker::Off => info!("FileVault is off"),
            StatusMarker::Unrecognized => {
                error!(output = %text.trim(), "unrecognised fdesetup status output");
            }
        }
        marker.status()
    }
}
