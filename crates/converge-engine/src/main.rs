//! converge: converge IAM roles, IAM policies and S3 buckets toward a
//! desired-state JSON file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use converge_common::ResourceKind;
use converge_common::defaults::{
    DEFAULT_LIST_CONCURRENCY, DEFAULT_MANAGER, DEFAULT_REGION, DEFAULT_WAIT_TIMEOUT_SECS,
};
use converge_engine::aws::{AwsCloud, AwsContext, FromAwsContext};
use converge_engine::{
    ConvergenceEngine, DescriptorSpec, EngineSettings, ListerConfig, PollingWaiter, PutOutcome,
    ResourceDescriptor, WaitConfig,
};
use futures::TryStreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(about = "Converge tagged AWS resources toward a desired state")]
#[command(version)]
struct Args {
    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// AWS profile to use
    #[arg(long, global = true, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Identity written to and checked against the ownership tag
    #[arg(long, global = true, env = "CONVERGE_MANAGER", default_value = DEFAULT_MANAGER)]
    manager: String,

    /// Concurrent tag fetches while listing (0 or 1 = sequential)
    #[arg(long, global = true, default_value_t = DEFAULT_LIST_CONCURRENCY)]
    concurrency: usize,

    /// Timeout in seconds when waiting for a resource to appear or disappear
    #[arg(long, global = true, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    wait_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update every resource in a desired-state file
    Put {
        /// JSON file with one descriptor or a list of descriptors
        file: PathBuf,

        /// Don't wait for created resources to become visible
        #[arg(long)]
        no_wait: bool,

        /// Take over resources owned by another manager
        #[arg(long)]
        force: bool,
    },

    /// Print the remote identifier of every resource in a desired-state file
    Resolve {
        file: PathBuf,
    },

    /// List managed resources of one kind
    List {
        /// Resource kind (role, policy, bucket)
        kind: ResourceKind,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Delete every resource in a desired-state file
    Delete {
        file: PathBuf,

        /// Don't wait for deleted resources to disappear
        #[arg(long)]
        no_wait: bool,

        /// Delete resources owned by another manager
        #[arg(long)]
        force: bool,
    },
}

/// A desired-state file holds one descriptor or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    One(DescriptorSpec),
    Many(Vec<DescriptorSpec>),
}

fn load_descriptors(path: &Path) -> Result<Vec<ResourceDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let specs = match manifest {
        Manifest::One(spec) => vec![spec],
        Manifest::Many(specs) => specs,
    };
    specs
        .into_iter()
        .map(|spec| spec.into_descriptor().map_err(anyhow::Error::from))
        .collect()
}

type Engine = ConvergenceEngine<AwsCloud, PollingWaiter<AwsCloud>>;

async fn build_engine(args: &Args) -> Engine {
    if let Some(profile) = &args.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let aws = AwsContext::new(&args.region, args.aws_profile.as_deref()).await;
    let cloud = Arc::new(AwsCloud::from_context(&aws));
    let wait = WaitConfig::default().with_timeout(Duration::from_secs(args.wait_timeout_secs));
    let waiter = Arc::new(PollingWaiter::new(Arc::clone(&cloud), wait));
    let settings = EngineSettings::default()
        .with_manager(args.manager.clone())
        .with_lister(ListerConfig::with_concurrency(args.concurrency))
        .with_region(args.region.clone());
    ConvergenceEngine::new(cloud, waiter, settings)
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = build_engine(&args).await;

    match &args.command {
        Command::Put {
            file,
            no_wait,
            force,
        } => handle_put(&engine, file, !no_wait, *force).await,
        Command::Resolve { file } => handle_resolve(&engine, file).await,
        Command::List { kind, format } => handle_list(&engine, *kind, *format).await,
        Command::Delete {
            file,
            no_wait,
            force,
        } => handle_delete(&engine, file, !no_wait, *force).await,
    }
}

/// Handle the put command
async fn handle_put(engine: &Engine, file: &Path, wait: bool, force: bool) -> Result<()> {
    for mut descriptor in load_descriptors(file)? {
        let outcome = engine
            .put(&mut descriptor, wait, force)
            .await
            .with_context(|| {
                format!("Failed to converge {} {}", descriptor.kind(), descriptor.label())
            })?;
        let line = summary(&descriptor, Some(outcome_label(&outcome)));
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn outcome_label(outcome: &PutOutcome) -> String {
    match outcome {
        PutOutcome::Created { .. } => "created".to_string(),
        PutOutcome::Updated { changes, .. } => format!("updated ({changes} changes)"),
        PutOutcome::Unchanged { .. } => "unchanged".to_string(),
    }
}

fn summary(descriptor: &ResourceDescriptor, result: Option<String>) -> serde_json::Value {
    serde_json::json!({
        "kind": descriptor.kind(),
        "name": descriptor.name(),
        "identifier": descriptor.resolved_identifier(),
        "stable_id": descriptor.stable_id(),
        "exists": descriptor.exists(),
        "result": result,
    })
}

/// Handle the resolve command
async fn handle_resolve(engine: &Engine, file: &Path) -> Result<()> {
    for mut descriptor in load_descriptors(file)? {
        let result = match engine.resolver().resolve(&mut descriptor).await {
            Ok(_) => {
                engine.oracle().exists(&mut descriptor).await?;
                None
            }
            Err(e) if e.is_not_found() => Some("not found".to_string()),
            Err(e) => return Err(e.into()),
        };
        println!("{}", serde_json::to_string(&summary(&descriptor, result))?);
    }
    Ok(())
}

/// Handle the list command
async fn handle_list(engine: &Engine, kind: ResourceKind, format: OutputFormat) -> Result<()> {
    info!(kind = %kind, "Listing managed resources");
    let descriptors: Vec<ResourceDescriptor> = engine.lister().list(kind).try_collect().await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("No managed {kind} resources found.");
        return Ok(());
    }

    println!("{:<40} {:<20} {:<38}", "IDENTIFIER", "MANAGER", "STABLE_ID");
    println!("{}", "-".repeat(98));
    for d in &descriptors {
        let manager = d
            .remote_tags()
            .and_then(converge_common::tags::owner)
            .unwrap_or("-");
        println!(
            "{:<40} {:<20} {:<38}",
            d.resolved_identifier().unwrap_or("-"),
            manager,
            d.stable_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    println!("\nTotal: {} resources", descriptors.len());
    Ok(())
}

/// Handle the delete command
async fn handle_delete(engine: &Engine, file: &Path, wait: bool, force: bool) -> Result<()> {
    // Reverse order, so dependents listed after their dependencies go first
    for mut descriptor in load_descriptors(file)?.into_iter().rev() {
        let deleted = engine
            .destroy(&mut descriptor, wait, force)
            .await
            .with_context(|| {
                format!("Failed to delete {} {}", descriptor.kind(), descriptor.label())
            })?;
        let result = if deleted { "deleted" } else { "already absent" };
        let line = summary(&descriptor, Some(result.to_string()));
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}
