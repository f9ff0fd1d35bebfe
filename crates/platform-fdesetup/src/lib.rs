//! `fdesetup` integration: encryption status probing and personal recovery key rotation.
//!
//! Both operations shell out to the system tool through [`CommandRunner`], so the
//! decision engine can be exercised against [`ScriptedRunner`] without spawning
//! real processes.

pub mod command;
pub mod error;
pub mod rotation;
pub mod status;

pub use command::{CommandOutput, CommandRunner, RecordedCommand, ScriptedRunner, SystemCommandRunner};
pub use error::{CommandError, PayloadError};
pub use rotation::{rotation_payload, FdesetupRotator, RecoveryKeyRotator, RotationOutcome};
pub use status::{EncryptionStatus, EncryptionStatusProbe, FdesetupStatusProbe, StatusMarker};

/// Location of the system `fdesetup` binary.
pub const DEFAULT_FDESETUP_PATH: &str = "/usr/bin/fdesetup";
