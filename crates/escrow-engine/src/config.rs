//! Engine configuration. Defaults match a stock macOS host.

use std::fs;
use std::path::{Path, PathBuf};

use platform_fdesetup::DEFAULT_FDESETUP_PATH;
use platform_preferences::{PreferenceDirs, ESCROW_DOMAIN, TRIGGER_DOMAIN};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// `fdesetup` binary used for both status and rotation.
    pub fdesetup_path: PathBuf,
    /// Domain carrying the MDM escrow payload.
    pub escrow_domain: String,
    /// Domain holding the local `GenerateNewKey` trigger.
    pub trigger_domain: String,
    pub preferences: PreferenceDirs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fdesetup_path: PathBuf::from(DEFAULT_FDESETUP_PATH),
            escrow_domain: ESCROW_DOMAIN.to_string(),
            trigger_domain: TRIGGER_DOMAIN.to_string(),
            preferences: PreferenceDirs::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fdesetup_path.is_absolute() {
            return Err(ConfigError::Invalid(
                "fdesetup_path must be an absolute path".into(),
            ));
        }
        for (field, domain) in [
            ("escrow_domain", &self.escrow_domain),
            ("trigger_domain", &self.trigger_domain),
        ] {
            if domain.trim().is_empty() || domain.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be a non-empty reverse-DNS domain"
                )));
            }
        }
        for (field, dir) in [
            ("preferences.managed_dir", &self.preferences.managed_dir),
            ("preferences.any_user_dir", &self.preferences.any_user_dir),
            ("preferences.current_user_dir", &self.preferences.current_user_dir),
        ] {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be an absolute path"
                )));
            }
        }
        Ok(())
    }
}
