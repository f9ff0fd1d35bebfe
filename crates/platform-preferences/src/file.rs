//! Property list files under the standard preference directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{PreferenceBackend, PreferenceValue, Scope};
use crate::error::PreferenceError;

/// Directories holding `<domain>.plist` for each scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceDirs {
    pub managed_dir: PathBuf,
    pub any_user_dir: PathBuf,
    pub current_user_dir: PathBuf,
}

impl Default for PreferenceDirs {
    fn default() -> Self {
        Self {
            managed_dir: PathBuf::from("/Library/Managed Preferences"),
            any_user_dir: PathBuf::from("/Library/Preferences"),
            // The mechanism runs as root in the privileged authorization host.
            current_user_dir: PathBuf::from("/var/root/Library/Preferences"),
        }
    }
}

impl PreferenceDirs {
    /// Lay the three scopes out under a single root, as tests and staging hosts do.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            managed_dir: root.join("Managed Preferences"),
            any_user_dir: root.join("Preferences"),
            current_user_dir: root.join("User Preferences"),
        }
    }

    fn dir(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Managed => &self.managed_dir,
            Scope::AnyUser => &self.any_user_dir,
            Scope::CurrentUser => &self.current_user_dir,
        }
    }
}

/// Backend reading and writing `<dir>/<domain>.plist`.
///
/// Writes replace the whole file atomically and are emitted in binary format.
#[derive(Debug, Clone, Default)]
pub struct PlistFileBackend {
    dirs: PreferenceDirs,
}

impl PlistFileBackend {
    pub fn new(dirs: PreferenceDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &PreferenceDirs {
        &self.dirs
    }

    /// Location of the file backing `domain` at `scope`.
    pub fn path(&self, scope: Scope, domain: &str) -> PathBuf {
        self.dirs.dir(scope).join(format!("{domain}.plist"))
    }

    fn load(&self, path: &Path) -> Result<Option<plist::Dictionary>, PreferenceError> {
        match fs::metadata(path) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PreferenceError::Io(err.to_string())),
        }
        let value = plist::Value::from_file(path).map_err(|err| PreferenceError::Malformed {
            path: path.display().to_string(),
            detail: err.to_string(),
        })?;
        value
            .into_dictionary()
            .map(Some)
            .ok_or_else(|| PreferenceError::Malformed {
                path: path.display().to_string(),
                detail: "root object is not a dictionary".into(),
            })
    }

    fn store(&self, path: &Path, dict: plist::Dictionary) -> Result<(), PreferenceError> {
        let parent = path
            .parent()
            .ok_or_else(|| PreferenceError::Io(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(parent).map_err(|err| PreferenceError::Io(err.to_string()))?;

        let mut staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|err| PreferenceError::Io(err.to_string()))?;
        plist::Value::Dictionary(dict)
            .to_writer_binary(staged.as_file_mut())
            .map_err(|err| PreferenceError::Io(err.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Staged files are created 0600; preference files are world-readable.
            staged
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(|err| PreferenceError::Io(err.to_string()))?;
        }
        staged
            .as_file()
            .sync_all()
            .map_err(|err| PreferenceError::Io(err.to_string()))?;
        staged
            .persist(path)
            .map_err(|err| PreferenceError::Io(err.error.to_string()))?;
        Ok(())
    }
}

impl PreferenceBackend for PlistFileBackend {
    fn value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
    ) -> Result<Option<PreferenceValue>, PreferenceError> {
        let path = self.path(scope, domain);
        let Some(dict) = self.load(&path)? else {
            return Ok(None);
        };
        Ok(dict.get(key).map(PreferenceValue::from_plist))
    }

    fn set_value(
        &self,
        scope: Scope,
        domain: &str,
        key: &str,
        value: Option<PreferenceValue>,
    ) -> Result<(), PreferenceError> {
        if !scope.is_local() {
            return Err(PreferenceError::ReadOnlyScope(scope));
        }
        let path = self.path(scope, domain);
        let existing = self.load(&path)?;

        let dict = match (existing, value) {
            (None, None) => return Ok(()),
            (Some(mut dict), None) => {
                if dict.remove(key).is_none() {
                    return Ok(());
                }
                dict
            }
            (existing, Some(value)) => {
                let encoded = value.to_plist().ok_or_else(|| {
                    PreferenceError::Io(format!("{key} has a value type that cannot be written"))
                })?;
                let mut dict = existing.unwrap_or_default();
                dict.insert(key.to_string(), encoded);
                dict
            }
        };

        debug!(%scope, domain, key, path = %path.display(), "writing preference file");
        self.store(&path, dict)
    }
}
