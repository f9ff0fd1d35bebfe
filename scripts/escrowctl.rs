//! Operator tool for the login-time recovery key rotation check.
//!
//! `request-rotation` and `clear` manage the local `GenerateNewKey` trigger the
//! way `defaults write` would; `status` shows what the next login will see; and
//! `invoke` runs the check once outside the authorization host, reading the
//! account name and secret as two lines on standard input.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use escrow_engine::{DecisionEngine, EngineConfig, RunReport};
use host_context::{AuthContextValues, LoginHost, PASSWORD_KEY, USERNAME_KEY};
use platform_fdesetup::{EncryptionStatusProbe, FdesetupStatusProbe, SystemCommandRunner};
use platform_preferences::{
    EscrowPolicySource, EscrowPolicyStore, PlistFileBackend, TriggerFlagSource, TriggerFlagStore,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "escrowctl",
    author,
    version,
    about = "Inspect and drive FileVault personal recovery key rotation"
)]
struct Args {
    /// Engine configuration file (TOML); stock macOS locations when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show encryption state, escrow policy and the rotation trigger.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Rotate the recovery key at the next login.
    RequestRotation,
    /// Withdraw a pending rotation request.
    Clear,
    /// Run the login-time check once with credentials read from stdin.
    Invoke {
        /// Emit the run report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Stand-in for the authorization host when invoked from a shell.
struct ConsoleHost;

impl LoginHost for ConsoleHost {
    fn permit_login(&self) {
        info!("login permitted");
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading engine config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn trigger_store(config: &EngineConfig) -> TriggerFlagStore {
    TriggerFlagStore::with_domain(
        Arc::new(PlistFileBackend::new(config.preferences.clone())),
        &config.trigger_domain,
    )
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    match args.command {
        Command::Status { json } => print_status(&config, json),
        Command::RequestRotation => {
            trigger_store(&config)
                .request()
                .context("requesting recovery key rotation")?;
            println!("Recovery key rotation requested for next login.");
            Ok(())
        }
        Command::Clear => {
            trigger_store(&config)
                .clear()
                .context("clearing rotation request")?;
            println!("Rotation request cleared.");
            Ok(())
        }
        Command::Invoke { json } => {
            let engine = DecisionEngine::from_config(&config).context("building decision engine")?;
            let context = read_credentials(io::stdin().lock())?;
            let report = engine.run(&context, &ConsoleHost);
            print_report(&report, json)
        }
    }
}

fn print_status(config: &EngineConfig, json: bool) -> Result<()> {
    let backend = Arc::new(PlistFileBackend::new(config.preferences.clone()));
    let probe =
        FdesetupStatusProbe::with_path(Arc::new(SystemCommandRunner), &config.fdesetup_path);
    let escrow = EscrowPolicyStore::with_domain(backend.clone(), &config.escrow_domain);
    let trigger = TriggerFlagStore::with_domain(backend, &config.trigger_domain);

    let status = probe.status();
    let policy = escrow.policy().context("reading escrow policy")?;
    let flag = trigger.read().context("reading rotation trigger")?;

    if json {
        let document = json!({
            "encryption": status,
            "escrow": policy,
            "trigger": flag,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let encryption = if status.is_decrypting() {
        "decrypting"
    } else if status.is_encrypted() {
        "on"
    } else {
        "off"
    };
    println!("FileVault:        {encryption}");
    println!(
        "Escrow location:  {} ({})",
        policy.location,
        if policy.enforced {
            "enforced by MDM"
        } else {
            "not enforced"
        }
    );
    println!(
        "GenerateNewKey:   {}",
        if flag.requested { "true" } else { "false" }
    );
    if flag.centrally_managed {
        println!("warning: GenerateNewKey is set by an MDM profile; rotation will not run");
    }
    Ok(())
}

/// First line is the account name, second line the secret.
fn read_credentials(mut input: impl Read) -> Result<AuthContextValues> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("reading credentials from stdin")?;
    let mut lines = raw.lines();
    let mut context = AuthContextValues::new();
    if let Some(account) = lines.next() {
        context.insert(USERNAME_KEY, account);
    }
    if let Some(secret) = lines.next() {
        context.insert(PASSWORD_KEY, secret);
    }
    Ok(context)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("run:      {}", report.run_id);
        println!("result:   {:?}", report.exit);
        println!("class:    {:?}", report.class());
        if let Some(location) = &report.escrow_location {
            println!("escrow:   {location}");
        }
        println!("cleared:  {}", report.flag_cleared);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    if let Err(err) = run(Args::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
