//! cherrysync CLI entrypoint.
//!
//! This is the main entrypoint for the cherrysync command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cherrysync::cherry::{CherryClient, Inventory, ServerFilter};
use cherrysync::cli::{Cli, Commands, LogFormat, OutputFormat, OutputFormatter};
use cherrysync::config::{find_manifest_file, ConfigParser, EngineConfig, Manifest, ManifestValidator};
use cherrysync::error::{CherryError, ConfigError, Result};
use cherrysync::reconciler::{PlanReport, Reconciler};
use cherrysync::resource::{ResourceKind, ResourceStatus, Scope};

use serde_json::Value;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Validate { offline, warnings } => {
            cmd_validate(cli.file.as_ref(), offline, warnings, &formatter).await
        }
        Commands::Plan => cmd_plan(cli.file.as_ref(), &formatter).await,
        Commands::Apply { yes } => cmd_apply(cli.file.as_ref(), yes, cli.output, &formatter).await,
        Commands::List {
            kind,
            project_id,
            team_id,
            region,
            status,
            hostname,
            plan,
            image,
            tags,
        } => {
            let filter = ServerFilter {
                region,
                status: status.as_deref().map(ResourceStatus::from_provider),
                hostname,
                plan,
                image,
                tags: tags.into_iter().collect(),
            };
            cmd_list(cli.file.as_ref(), kind, project_id, team_id, &filter, &formatter).await
        }
        Commands::Get { kind, id } => cmd_get(cli.file.as_ref(), kind, &id, &formatter).await,
    }
}

/// Validate the manifest.
async fn cmd_validate(
    manifest_path: Option<&PathBuf>,
    offline: bool,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (parser, manifest) = load_manifest(manifest_path)?;

    let validator = ManifestValidator::new();
    let result = validator.check(&manifest);
    emit(formatter, &formatter.format_validation(&result, show_warnings));
    validator.validate(&manifest)?;

    if offline {
        return Ok(());
    }

    let config = parser.engine_config(&manifest)?;
    let client = CherryClient::new(&config)?;
    client.validate_token().await?;
    eprintln!("API token accepted by {}", client.base_url());

    Ok(())
}

/// Show the operations apply would run.
async fn cmd_plan(manifest_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<()> {
    let (reconciler, manifest) = load_reconciler(manifest_path)?;

    let (plans, failures) = split_plans(&manifest, reconciler.plan_each(&manifest.resources).await, formatter);
    emit(formatter, &formatter.format_plan(&plans));

    if failures > 0 {
        return Err(CherryError::internal(format!(
            "{failures} of {} resources could not be planned",
            manifest.len()
        )));
    }
    Ok(())
}

/// Reconcile every resource in manifest order.
///
/// Entries that fail to plan are reported and skipped; the rest are still
/// reconciled.
async fn cmd_apply(
    manifest_path: Option<&PathBuf>,
    auto_approve: bool,
    output: OutputFormat,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (reconciler, manifest) = load_reconciler(manifest_path)?;

    let planned = reconciler.plan_each(&manifest.resources).await;
    let runnable: Vec<bool> = planned
        .iter()
        .map(|p| p.as_ref().is_ok_and(|p| p.needs_apply()))
        .collect();
    let (plans, mut failures) = split_plans(&manifest, planned, formatter);

    if !runnable.contains(&true) {
        emit(formatter, &formatter.format_plan(&plans));
        return apply_outcome(failures, manifest.len());
    }

    if output == OutputFormat::Text {
        emit(formatter, &formatter.format_plan(&plans));
    }

    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    for (desired, run) in manifest.resources.iter().zip(runnable) {
        if !run {
            continue;
        }
        let label = desired.label();
        match reconciler.reconcile_any(desired).await {
            Ok(result) => emit(formatter, &formatter.format_result(&label, &result)),
            Err(e) => {
                error!("{} {label} failed: {e}", desired.kind());
                failures += 1;
                emit(formatter, &formatter.format_failure(desired.kind(), &label, &e));
            }
        }
    }

    apply_outcome(failures, manifest.len())
}

/// Separates successful plans from failures, reporting each failure.
fn split_plans(
    manifest: &Manifest,
    planned: Vec<Result<PlanReport>>,
    formatter: &OutputFormatter,
) -> (Vec<PlanReport>, usize) {
    let mut plans = Vec::with_capacity(planned.len());
    let mut failures = 0usize;
    for (desired, plan) in manifest.resources.iter().zip(planned) {
        match plan {
            Ok(plan) => plans.push(plan),
            Err(e) => {
                failures += 1;
                emit(formatter, &formatter.format_failure(desired.kind(), &desired.label(), &e));
            }
        }
    }
    (plans, failures)
}

fn apply_outcome(failures: usize, total: usize) -> Result<()> {
    if failures > 0 {
        return Err(CherryError::internal(format!(
            "{failures} of {total} resources failed to reconcile"
        )));
    }
    info!("Reconciled {total} resources");
    Ok(())
}

/// List resources of one kind.
async fn cmd_list(
    manifest_path: Option<&PathBuf>,
    kind: ResourceKind,
    project_id: Option<u64>,
    team_id: Option<u64>,
    filter: &ServerFilter,
    formatter: &OutputFormatter,
) -> Result<()> {
    let inventory = load_inventory(manifest_path)?;

    let items: Vec<Value> = match kind {
        ResourceKind::Server => {
            let project_id = require_scope_id(project_id, kind)?;
            to_values(inventory.servers(project_id, filter).await?)?
        }
        ResourceKind::SshKey => inventory.list(kind, Scope::Account).await?,
        ResourceKind::Project => {
            inventory
                .list(kind, Scope::Team(require_scope_id(team_id, kind)?))
                .await?
        }
        ResourceKind::FloatingIp | ResourceKind::Volume => {
            inventory
                .list(kind, Scope::Project(require_scope_id(project_id, kind)?))
                .await?
        }
    };

    emit(formatter, &formatter.format_inventory(kind, &items));
    Ok(())
}

/// Show one resource.
async fn cmd_get(
    manifest_path: Option<&PathBuf>,
    kind: ResourceKind,
    id: &str,
    formatter: &OutputFormatter,
) -> Result<()> {
    let inventory = load_inventory(manifest_path)?;
    let item = inventory.get(kind, id).await?;
    emit(formatter, &formatter.format_resource(&item));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output: JSON to stdout, text to stderr.
fn emit(formatter: &OutputFormatter, output: &str) {
    if formatter.is_json() {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{output}");
    } else {
        eprint!("{output}");
    }
}

/// Resolves the manifest path.
fn resolve_manifest_path(manifest_path: Option<&PathBuf>) -> Result<PathBuf> {
    manifest_path.map_or_else(|| find_manifest_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` next to the manifest, then the manifest itself.
fn load_manifest(manifest_path: Option<&PathBuf>) -> Result<(ConfigParser, Manifest)> {
    let manifest_file = resolve_manifest_path(manifest_path)?;
    debug!("Loading manifest from: {}", manifest_file.display());

    let parser = ConfigParser::new().with_base_path(manifest_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    let manifest = parser.load_file(&manifest_file)?;
    Ok((parser, manifest))
}

/// Loads and validates the manifest, then builds a reconciler.
fn load_reconciler(manifest_path: Option<&PathBuf>) -> Result<(Reconciler, Manifest)> {
    let (parser, manifest) = load_manifest(manifest_path)?;
    ManifestValidator::new().validate(&manifest)?;

    let config = parser.engine_config(&manifest)?;
    let client = CherryClient::new(&config)?;
    Ok((Reconciler::new(client, config), manifest))
}

/// Builds an inventory. The manifest is optional here; without one only the
/// environment is read.
fn load_inventory(manifest_path: Option<&PathBuf>) -> Result<Inventory> {
    let config = match resolve_manifest_path(manifest_path) {
        Ok(_) => {
            let (parser, manifest) = load_manifest(manifest_path)?;
            parser.engine_config(&manifest)?
        }
        Err(_) => {
            ConfigParser::new().load_dotenv()?;
            EngineConfig::from_env()?
        }
    };

    let client = CherryClient::new(&config)?;
    Ok(Inventory::new(client, config))
}

/// Requires the scope ID a listing of `kind` needs.
fn require_scope_id(id: Option<u64>, kind: ResourceKind) -> Result<u64> {
    id.ok_or_else(|| {
        let scope = kind.scope_hint();
        CherryError::Config(ConfigError::ValidationError {
            message: format!("--{scope}-id is required to list {kind} resources"),
            field: Some(format!("{scope}_id")),
        })
    })
}

/// Serializes typed listings for output.
fn to_values<T: serde::Serialize>(items: Vec<T>) -> Result<Vec<Value>> {
    items
        .into_iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CherryError::internal(format!("Failed to serialize listing: {e}")))
}
