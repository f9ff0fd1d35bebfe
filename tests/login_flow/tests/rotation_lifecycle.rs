use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use escrow_engine::{CredentialField, DecisionEngine, ExitClass, RunExit, RunReport};
use host_context::{AuthContextValues, RecordingHost, PASSWORD_KEY, USERNAME_KEY};
use platform_fdesetup::{CommandOutput, FdesetupRotator, FdesetupStatusProbe, ScriptedRunner};
use platform_preferences::{
    EscrowPolicyStore, PlistFileBackend, PreferenceDirs, Scope, TriggerFlagStore, ESCROW_DOMAIN,
    GENERATE_NEW_KEY, LOCATION_KEY, TRIGGER_DOMAIN,
};
use tempfile::{tempdir, TempDir};

/// A login window backed by real preference files and a scripted `fdesetup`.
struct LoginWindow {
    _root: TempDir,
    backend: Arc<PlistFileBackend>,
    runner: Arc<ScriptedRunner>,
    engine: DecisionEngine,
}

impl LoginWindow {
    fn new() -> Self {
        let root = tempdir().expect("tempdir");
        let backend = Arc::new(PlistFileBackend::new(PreferenceDirs::under(root.path())));
        let runner = Arc::new(ScriptedRunner::default());
        let engine = DecisionEngine::builder()
            .with_status_probe(Arc::new(FdesetupStatusProbe::new(runner.clone())))
            .with_escrow_policy(Arc::new(EscrowPolicyStore::new(backend.clone())))
            .with_trigger_flag(Arc::new(TriggerFlagStore::new(backend.clone())))
            .with_rotator(Arc::new(FdesetupRotator::new(runner.clone())))
            .build()
            .expect("engine builds");
        Self {
            _root: root,
            backend,
            runner,
            engine,
        }
    }

    fn path(&self, scope: Scope, domain: &str) -> PathBuf {
        self.backend.path(scope, domain)
    }

    /// Install a configuration profile payload for `domain`.
    fn install_profile(&self, domain: &str, key: &str, value: plist::Value) {
        write_plist(&self.path(Scope::Managed, domain), key, value);
    }

    fn admin_requests_rotation(&self) {
        TriggerFlagStore::new(self.backend.clone())
            .request()
            .expect("request accepted");
    }

    fn local_trigger(&self, scope: Scope) -> Option<bool> {
        read_key(&self.path(scope, TRIGGER_DOMAIN), GENERATE_NEW_KEY)
            .and_then(|value| value.as_boolean())
    }

    fn filevault_on(&self) {
        self.runner.script(
            "status",
            Ok(CommandOutput::with_stdout("FileVault is On.\n")),
        );
    }

    fn login(&self, account: &str, secret: &str) -> (RunReport, RecordingHost) {
        let host = RecordingHost::default();
        let context = AuthContextValues::new()
            .with_value(USERNAME_KEY, account)
            .with_value(PASSWORD_KEY, secret);
        let report = self.engine.run(&context, &host);
        (report, host)
    }

    fn rotations(&self) -> usize {
        self.runner.calls_for("changerecovery").len()
    }
}

fn write_plist(path: &Path, key: &str, value: plist::Value) {
    fs::create_dir_all(path.parent().expect("scope dir")).unwrap();
    let mut dict = plist::Dictionary::new();
    dict.insert(key.to_string(), value);
    plist::Value::Dictionary(dict).to_file_xml(path).unwrap();
}

fn read_key(path: &Path, key: &str) -> Option<plist::Value> {
    let value = plist::Value::from_file(path).ok()?;
    value.as_dictionary()?.get(key).cloned()
}

#[test]
fn requested_rotation_runs_once_and_clears_the_trigger() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("Key will be escrowed to https://mdm.example".into()),
    );
    window.admin_requests_rotation();
    assert_eq!(window.local_trigger(Scope::AnyUser), Some(true));

    window.filevault_on();
    let (report, host) = window.login("alice", "correct horse");
    assert_eq!(report.class(), ExitClass::Completed);
    assert_eq!(
        report.escrow_location.as_deref(),
        Some("Key will be escrowed to https://mdm.example")
    );
    assert!(report.flag_cleared);
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.local_trigger(Scope::AnyUser), Some(false));

    let rotation = &window.runner.calls_for("changerecovery")[0];
    assert_eq!(rotation.args, ["changerecovery", "-personal", "-inputplist"]);
    let payload: plist::Value =
        plist::from_bytes(rotation.stdin.as_deref().expect("payload on stdin")).unwrap();
    let payload = payload.as_dictionary().unwrap();
    assert_eq!(payload.get("Username").and_then(|v| v.as_string()), Some("alice"));
    assert_eq!(
        payload.get("Password").and_then(|v| v.as_string()),
        Some("correct horse")
    );

    window.filevault_on();
    let (second, host) = window.login("alice", "correct horse");
    assert_eq!(second.exit, RunExit::NotRequested);
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.rotations(), 1);
}

#[test]
fn failed_rotation_is_not_retried() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    window.admin_requests_rotation();

    window.filevault_on();
    window.runner.script(
        "changerecovery",
        Ok(CommandOutput::failure(
            1,
            "Error: Unable to authenticate user.\n",
        )),
    );
    let (report, host) = window.login("alice", "wrong password");
    match &report.exit {
        RunExit::Rotated { outcome } => {
            assert!(!outcome.succeeded);
            assert_eq!(
                outcome.error_detail.as_deref(),
                Some("Error: Unable to authenticate user.")
            );
        }
        other => panic!("unexpected exit {other:?}"),
    }
    assert_eq!(report.class(), ExitClass::Operational);
    assert!(report.flag_cleared);
    assert_eq!(host.permit_count(), 1);

    window.filevault_on();
    let (second, _) = window.login("alice", "correct horse");
    assert_eq!(second.exit, RunExit::NotRequested);
    assert_eq!(window.rotations(), 1);
}

#[test]
fn profile_managed_trigger_is_left_untouched() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    window.install_profile(TRIGGER_DOMAIN, GENERATE_NEW_KEY, plist::Value::Boolean(true));
    let managed = window.path(Scope::Managed, TRIGGER_DOMAIN);
    let before = fs::read(&managed).unwrap();

    window.filevault_on();
    let (report, host) = window.login("alice", "correct horse");
    assert_eq!(report.exit, RunExit::TriggerCentrallyManaged);
    assert_eq!(report.class(), ExitClass::Configuration);
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.rotations(), 0);
    assert_eq!(fs::read(&managed).unwrap(), before);
    assert!(!window.path(Scope::AnyUser, TRIGGER_DOMAIN).exists());
}

#[test]
fn rotation_waits_for_an_escrow_profile() {
    let window = LoginWindow::new();
    window.admin_requests_rotation();

    window.filevault_on();
    let (report, host) = window.login("alice", "correct horse");
    assert_eq!(report.exit, RunExit::EscrowNotEnforced);
    assert_eq!(report.class(), ExitClass::Benign);
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.rotations(), 0);
    assert_eq!(window.local_trigger(Scope::AnyUser), Some(true));

    // Once the profile arrives the pending request is honoured.
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    window.filevault_on();
    let (report, _) = window.login("alice", "correct horse");
    assert_eq!(report.class(), ExitClass::Completed);
    assert_eq!(window.rotations(), 1);
}

#[test]
fn missing_secret_keeps_the_request_pending() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    window.admin_requests_rotation();

    window.filevault_on();
    let (report, host) = window.login("alice", "");
    assert_eq!(
        report.exit,
        RunExit::MissingCredentials {
            missing: vec![CredentialField::Secret]
        }
    );
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.rotations(), 0);
    assert_eq!(window.local_trigger(Scope::AnyUser), Some(true));
}

#[test]
fn clearing_removes_a_current_user_override() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    write_plist(
        &window.path(Scope::CurrentUser, TRIGGER_DOMAIN),
        GENERATE_NEW_KEY,
        plist::Value::Boolean(true),
    );

    window.filevault_on();
    let (report, _) = window.login("alice", "correct horse");
    assert_eq!(report.class(), ExitClass::Completed);
    assert_eq!(window.local_trigger(Scope::CurrentUser), None);
    assert_eq!(window.local_trigger(Scope::AnyUser), Some(false));

    window.filevault_on();
    let (second, _) = window.login("alice", "correct horse");
    assert_eq!(second.exit, RunExit::NotRequested);
    assert_eq!(window.rotations(), 1);
}

#[test]
fn unwritable_any_user_file_still_drops_current_user_trigger() {
    let window = LoginWindow::new();
    window.install_profile(
        ESCROW_DOMAIN,
        LOCATION_KEY,
        plist::Value::String("https://mdm.example".into()),
    );
    write_plist(
        &window.path(Scope::CurrentUser, TRIGGER_DOMAIN),
        GENERATE_NEW_KEY,
        plist::Value::Boolean(true),
    );
    let any_user = window.path(Scope::AnyUser, TRIGGER_DOMAIN);
    fs::create_dir_all(any_user.parent().unwrap()).unwrap();
    fs::write(&any_user, "not a plist").unwrap();

    window.filevault_on();
    let (first, host) = window.login("alice", "correct horse");
    assert_eq!(first.class(), ExitClass::Completed);
    assert!(!first.flag_cleared);
    assert_eq!(host.permit_count(), 1);
    assert_eq!(window.local_trigger(Scope::CurrentUser), None);

    for _ in 0..2 {
        window.filevault_on();
        let (report, host) = window.login("alice", "correct horse");
        assert!(
            matches!(report.exit, RunExit::PreferencesUnavailable { .. }),
            "unexpected exit {:?}",
            report.exit
        );
        assert_eq!(host.permit_count(), 1);
    }
    assert_eq!(window.rotations(), 1);
}
