use std::sync::Arc;

use platform_preferences::{
    EscrowPolicySource, EscrowPolicyStore, InMemoryPreferences, PreferenceAccess, PreferenceError,
    PreferenceValue, Scope, TriggerFlagSource, TriggerFlagStore, GENERATE_NEW_KEY, LOCATION_KEY,
    TRIGGER_DOMAIN,
};

#[test]
fn current_user_value_overrides_any_user() {
    let prefs = Arc::new(InMemoryPreferences::default());
    prefs.seed(
        Scope::AnyUser,
        TRIGGER_DOMAIN,
        GENERATE_NEW_KEY,
        PreferenceValue::Boolean(false),
    );
    prefs.seed(
        Scope::CurrentUser,
        TRIGGER_DOMAIN,
        GENERATE_NEW_KEY,
        PreferenceValue::Integer(1),
    );

    let flag = TriggerFlagStore::new(prefs).read().unwrap();
    assert!(flag.requested);
    assert!(!flag.centrally_managed);
}

#[test]
fn non_boolean_trigger_reads_as_not_requested() {
    let prefs = Arc::new(InMemoryPreferences::default());
    prefs.seed(
        Scope::AnyUser,
        TRIGGER_DOMAIN,
        GENERATE_NEW_KEY,
        PreferenceValue::String("yes".into()),
    );

    assert!(!TriggerFlagStore::new(prefs).read().unwrap().requested);
}

#[test]
fn clear_writes_only_local_scopes() {
    let prefs = Arc::new(InMemoryPreferences::default());
    prefs.seed(
        Scope::AnyUser,
        TRIGGER_DOMAIN,
        GENERATE_NEW_KEY,
        PreferenceValue::Boolean(true),
    );

    TriggerFlagStore::new(prefs.clone()).clear().unwrap();

    let writes = prefs.writes();
    assert_eq!(writes.len(), 2);
    let scopes: Vec<Scope> = writes
        .iter()
        .map(|access| match access {
            PreferenceAccess::Write { scope, .. } => *scope,
            PreferenceAccess::Read { scope, .. } => *scope,
        })
        .collect();
    // The shadowing current-user value is removed before the any-user reset.
    assert_eq!(scopes, [Scope::CurrentUser, Scope::AnyUser]);
    assert_eq!(
        prefs.peek(Scope::AnyUser, TRIGGER_DOMAIN, GENERATE_NEW_KEY),
        Some(PreferenceValue::Boolean(false))
    );
}

#[test]
fn escrow_store_honours_custom_domain() {
    let prefs = Arc::new(InMemoryPreferences::default());
    prefs.seed(
        Scope::Managed,
        "org.example.escrow",
        LOCATION_KEY,
        PreferenceValue::String("https://mdm.example".into()),
    );

    let policy = EscrowPolicyStore::with_domain(prefs, "org.example.escrow")
        .policy()
        .unwrap();
    assert!(policy.enforced);
    assert_eq!(policy.location, "https://mdm.example");
}

#[test]
fn backend_failures_propagate() {
    let prefs = Arc::new(InMemoryPreferences::default());
    prefs.fail_with(PreferenceError::Io("cfprefsd unavailable".into()));

    let err = TriggerFlagStore::new(prefs.clone())
        .read()
        .expect_err("read fails");
    assert_eq!(err, PreferenceError::Io("cfprefsd unavailable".into()));
    assert!(EscrowPolicyStore::new(prefs).policy().is_err());
}
