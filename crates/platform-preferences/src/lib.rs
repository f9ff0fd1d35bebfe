//! Preference domains consulted at login: the escrow policy pushed by MDM and the
//! local one-shot rotation trigger.
//!
//! Values live in three scopes. `Managed` holds configuration profiles installed
//! by device management and is never written here; `CurrentUser` and `AnyUser`
//! are the local scopes an administrator (or `escrowctl`) can change. Whether a
//! value is force-set by management is returned alongside the value itself so
//! callers cannot forget to look at it.

pub mod backend;
pub mod error;
pub mod escrow;
pub mod file;
pub mod memory;
pub mod trigger;

pub use backend::{PreferenceBackend, PreferenceValue, Scope};
pub use error::PreferenceError;
pub use escrow::{EscrowPolicy, EscrowPolicySource, EscrowPolicyStore, NO_LOCATION_DESCRIPTION};
pub use file::{PlistFileBackend, PreferenceDirs};
pub use memory::{InMemoryPreferences, PreferenceAccess};
pub use trigger::{TriggerFlag, TriggerFlagSource, TriggerFlagStore};

/// Domain of the system escrow payload delivered by MDM.
pub const ESCROW_DOMAIN: &str = "com.apple.security.FDERecoveryKeyEscrow";
/// Escrow destination key within [`ESCROW_DOMAIN`].
pub const LOCATION_KEY: &str = "Location";
/// Domain owned by this system.
pub const TRIGGER_DOMAIN: &str = "com.netflix.Escrow-Buddy";
/// One-shot rotation trigger key within [`TRIGGER_DOMAIN`].
pub const GENERATE_NEW_KEY: &str = "GenerateNewKey";
