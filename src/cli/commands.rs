//! CLI command definitions for ctfd-challenge-sync.
//!
//! Each subcommand works on one challenge: a YAML manifest describes the desired
//! state and a JSON state file remembers the remote id between runs.

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ClientConfig, DEFAULT_TIMEOUT_SECS};
use crate::ctfd::CtfdClient;
use crate::diagnostics::Severity;
use crate::drift::{self, Drift};
use crate::error::ReconcileError;
use crate::model::{Behavior, Challenge, DecayFunction};
use crate::policy::FieldPolicy;
use crate::reconciler::{ReadOutcome, Reconciler};
use crate::state::StateFile;

/// Default location of the state file.
const DEFAULT_STATE_FILE: &str = "./challenge.state.json";

/// Declarative CTFd challenge reconciler.
#[derive(Parser)]
#[command(name = "ctfd-challenge-sync")]
#[command(about = "Converge a CTFd challenge to the state described in a manifest")]
#[command(version)]
#[command(
    long_about = "ctfd-challenge-sync creates, updates, reads and deletes a CTFd challenge so that it matches a YAML manifest.\n\nThe remote id is kept in a local state file between runs.\n\nExample usage:\n  ctfd-challenge-sync --url https://ctf.example.org apply -f challenge.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// CTFd base URL.
    #[arg(long, env = "CTFD_URL", global = true)]
    pub url: Option<String>,

    /// CTFd admin API token.
    #[arg(long, env = "CTFD_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Timeout of a single CTFd request, in seconds.
    #[arg(long, env = "CTFD_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub timeout_secs: u64,

    /// Path to the state file.
    #[arg(short, long, default_value = DEFAULT_STATE_FILE, global = true)]
    pub state: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create or update the challenge described by a manifest.
    #[command(alias = "up")]
    Apply(ApplyArgs),

    /// Show how the remote challenge differs from a manifest.
    #[command(alias = "diff")]
    Plan(PlanArgs),

    /// Read the remote challenge back into the state file.
    Refresh(RefreshArgs),

    /// Adopt an existing remote challenge into the state file.
    Import(ImportArgs),

    /// Delete the challenge recorded in the state file.
    #[command(alias = "rm")]
    Destroy,
}

/// Arguments for the apply command.
#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Path to the challenge manifest (YAML).
    #[arg(short = 'f', long)]
    pub file: String,

    /// Destroy and recreate the challenge when its type changes.
    #[arg(long)]
    pub replace: bool,

    /// Decay function used when a dynamic challenge does not name one.
    #[arg(long, default_value = "logarithmic")]
    pub default_function: DecayFunction,

    /// Locked-state behavior used when requirements do not name one.
    #[arg(long, default_value = "hidden")]
    pub default_behavior: Behavior,

    /// Print the resulting challenge as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the plan command.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Path to the challenge manifest (YAML).
    #[arg(short = 'f', long)]
    pub file: String,

    /// Decay function used when a dynamic challenge does not name one.
    #[arg(long, default_value = "logarithmic")]
    pub default_function: DecayFunction,

    /// Locked-state behavior used when requirements do not name one.
    #[arg(long, default_value = "hidden")]
    pub default_behavior: Behavior,

    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the refresh command.
#[derive(Parser, Debug)]
pub struct RefreshArgs {
    /// Print the refreshed challenge as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the import command.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Remote id of the challenge to adopt.
    #[arg(long)]
    pub id: String,

    /// Overwrite an existing state file.
    #[arg(long)]
    pub force: bool,
}

/// Machine-readable plan.
#[derive(Debug, Serialize)]
struct PlanOutput {
    action: &'static str,
    id: Option<String>,
    drifts: Vec<Drift>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// Call this first so the log level is known before tracing is initialized.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Ctrl-C cancels the running reconciliation; calls already sent stay applied.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let state = StateFile::new(&cli.state);
    match &cli.command {
        Commands::Apply(args) => {
            let reconciler = build_reconciler(&cli, cancel)?
                .with_policy(field_policy(args.default_function, args.default_behavior));
            run_apply_command(&reconciler, &state, args).await
        }
        Commands::Plan(args) => {
            let reconciler = build_reconciler(&cli, cancel)?
                .with_policy(field_policy(args.default_function, args.default_behavior));
            run_plan_command(&reconciler, &state, args).await
        }
        Commands::Refresh(args) => {
            run_refresh_command(&build_reconciler(&cli, cancel)?, &state, args).await
        }
        Commands::Import(args) => {
            run_import_command(&build_reconciler(&cli, cancel)?, &state, args).await
        }
        Commands::Destroy => run_destroy_command(&build_reconciler(&cli, cancel)?, &state).await,
    }
}

fn field_policy(function: DecayFunction, behavior: Behavior) -> FieldPolicy {
    FieldPolicy::new()
        .with_default_function(function)
        .with_default_behavior(behavior)
}

fn build_reconciler(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<Reconciler> {
    let url = match &cli.url {
        Some(url) => url.clone(),
        None => bail!("No CTFd URL configured. Pass --url or set CTFD_URL."),
    };
    let config = ClientConfig::new(url, cli.api_key.clone())
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    config.validate().context("Invalid CTFd client configuration")?;

    if config.api_key.is_none() {
        warn!("No CTFd API key configured; admin endpoints will reject requests");
    }

    let client = CtfdClient::new(&config);
    info!(api_base = %client.api_base(), "Using CTFd instance");
    Ok(Reconciler::new(Arc::new(client)).with_cancellation(cancel))
}

fn load_manifest(path: &str) -> anyhow::Result<Challenge> {
    let content = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read manifest '{}'", path))?;
    Challenge::from_manifest(&content).with_context(|| format!("Invalid manifest '{}'", path))
}

/// Log every diagnostic of `err` and turn it into an anyhow error.
fn report(err: ReconcileError) -> anyhow::Error {
    for diagnostic in err.to_diagnostics() {
        match diagnostic.severity {
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Error | Severity::Fatal => error!("{}", diagnostic),
        }
    }
    if Severity::from(&err) == Severity::Fatal {
        eprintln!("FATAL: {}", err);
        eprintln!("This is a bug in the reconciler or an inconsistent CTFd instance.");
    }
    anyhow::Error::new(err)
}

fn print_challenge(challenge: &Challenge, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(challenge)?);
        return Ok(());
    }
    println!("Challenge {} ({})", challenge.id, challenge.name);
    println!("  type:     {}", challenge.challenge_type);
    println!("  state:    {}", challenge.state);
    println!("  category: {}", challenge.category);
    println!("  value:    {}", challenge.value);
    if let (Some(decay), Some(minimum)) = (challenge.decay, challenge.minimum) {
        let function = challenge
            .function
            .map(|f| f.to_string())
            .unwrap_or_default();
        println!("  decay:    {} ({}), minimum {}", decay, function, minimum);
    }
    if !challenge.tags.is_empty() {
        println!("  tags:     {}", challenge.tags.join(", "));
    }
    if !challenge.topics.is_empty() {
        println!("  topics:   {}", challenge.topics.join(", "));
    }
    Ok(())
}

async fn create_and_save(
    reconciler: &Reconciler,
    state: &StateFile,
    desired: Challenge,
) -> anyhow::Result<Challenge> {
    match reconciler.create(desired.clone()).await {
        Ok(created) => {
            state.save(&created, false)?;
            Ok(created)
        }
        Err(err) => {
            if let Some(id) = err.created_id() {
                let mut partial = desired;
                partial.id = id.to_string();
                state
                    .save(&partial, true)
                    .context("Failed to record partially created challenge")?;
                warn!(challenge_id = %id, "Recorded partially created challenge as tainted");
            }
            Err(report(err))
        }
    }
}

async fn run_apply_command(
    reconciler: &Reconciler,
    state: &StateFile,
    args: &ApplyArgs,
) -> anyhow::Result<()> {
    let desired = load_manifest(&args.file)?;
    let previous = state.load()?.filter(|s| s.challenge.is_created());

    let converged = match previous {
        None => {
            info!(name = %desired.name, "No recorded challenge, creating");
            create_and_save(reconciler, state, desired).await?
        }
        Some(snapshot) if snapshot.challenge.challenge_type != desired.challenge_type => {
            let prior = snapshot.challenge;
            if !args.replace {
                bail!(
                    "Challenge {} changes type from {} to {}, which needs a replacement. \
                     Re-run with --replace to destroy and recreate it.",
                    prior.id,
                    prior.challenge_type,
                    desired.challenge_type
                );
            }
            info!(challenge_id = %prior.id, "Replacing challenge");
            reconciler.delete(&prior.id).await.map_err(report)?;
            state.remove()?;
            create_and_save(reconciler, state, desired).await?
        }
        Some(snapshot) => {
            let id = snapshot.challenge.id.clone();
            match reconciler.read(&id).await.map_err(report)? {
                ReadOutcome::Missing => {
                    warn!(challenge_id = %id, "Recorded challenge no longer exists, recreating");
                    state.remove()?;
                    create_and_save(reconciler, state, desired).await?
                }
                ReadOutcome::Found(_) => {
                    if snapshot.tainted {
                        info!(challenge_id = %id, "Converging tainted challenge");
                    }
                    let updated = reconciler
                        .update(desired, &snapshot.challenge)
                        .await
                        .map_err(report)?;
                    state.save(&updated, false)?;
                    updated
                }
            }
        }
    };

    info!(challenge_id = %converged.id, state = %state.path().display(), "Apply complete");
    print_challenge(&converged, args.json)
}

async fn run_plan_command(
    reconciler: &Reconciler,
    state: &StateFile,
    args: &PlanArgs,
) -> anyhow::Result<()> {
    let manifest = load_manifest(&args.file)?;
    let (desired, diags) = reconciler.policy().validate(manifest);
    if diags.has_error() {
        return Err(report(ReconcileError::Configuration(diags)));
    }
    for warning in diags.warnings() {
        warn!("{}", warning);
    }

    let recorded = state.load()?.map(|s| s.challenge).filter(Challenge::is_created);
    let plan = match recorded {
        None => PlanOutput {
            action: "create",
            id: None,
            drifts: Vec::new(),
        },
        Some(recorded) => match reconciler.read(&recorded.id).await.map_err(report)? {
            ReadOutcome::Missing => PlanOutput {
                action: "create",
                id: None,
                drifts: Vec::new(),
            },
            ReadOutcome::Found(observed) => {
                let drifts = drift::detect(&desired, &observed);
                let action = if drifts.is_empty() {
                    "none"
                } else if drifts.iter().any(|d| d.requires_replace) {
                    "replace"
                } else {
                    "update"
                };
                PlanOutput {
                    action,
                    id: Some(observed.id),
                    drifts,
                }
            }
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    match (&plan.id, plan.action) {
        (_, "create") => println!("Challenge '{}' will be created.", desired.name),
        (Some(id), "none") => println!("Challenge {} is up to date.", id),
        (Some(id), action) => {
            println!("Challenge {} will be {}d:", id, action);
            for drift in &plan.drifts {
                println!("  ~ {}", drift);
            }
        }
        (None, _) => {}
    }
    Ok(())
}

async fn run_refresh_command(
    reconciler: &Reconciler,
    state: &StateFile,
    args: &RefreshArgs,
) -> anyhow::Result<()> {
    let Some(snapshot) = state.load()? else {
        bail!("No state file at '{}'", state.path().display());
    };
    let id = snapshot.challenge.id;

    match reconciler.read(&id).await.map_err(report)? {
        ReadOutcome::Found(observed) => {
            state.save(&observed, snapshot.tainted)?;
            print_challenge(&observed, args.json)
        }
        ReadOutcome::Missing => {
            warn!(challenge_id = %id, "Challenge no longer exists, dropping state");
            state.remove()?;
            Ok(())
        }
    }
}

async fn run_import_command(
    reconciler: &Reconciler,
    state: &StateFile,
    args: &ImportArgs,
) -> anyhow::Result<()> {
    if !args.force {
        if let Some(existing) = state.load()? {
            bail!(
                "State file '{}' already tracks challenge {}. Use --force to overwrite it.",
                state.path().display(),
                existing.challenge.id
            );
        }
    }

    let imported = reconciler.import(&args.id).await.map_err(report)?;
    state.save(&imported, false)?;
    info!(challenge_id = %imported.id, "Imported challenge");
    print_challenge(&imported, false)
}

async fn run_destroy_command(reconciler: &Reconciler, state: &StateFile) -> anyhow::Result<()> {
    let Some(snapshot) = state.load()? else {
        info!("No state file, nothing to destroy");
        return Ok(());
    };

    reconciler
        .delete(&snapshot.challenge.id)
        .await
        .map_err(report)?;
    state.remove()?;
    println!("Challenge {} destroyed.", snapshot.challenge.id);
    Ok(())
}
