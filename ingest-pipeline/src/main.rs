//! ingest-pipeline - Vendor delivery ingest
//!
//! Collects the given files, directories and manifests, conforms and
//! validates every item, publishes the ones that pass and registers them in
//! the local tracking store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_common::config::{ConfigResolver, IngestConfig};
use ingest_common::events::EventBus;
use ingest_common::EntityRef;
use ingest_pipeline::models::Context;
use ingest_pipeline::tracking::{entity_id, queries, Entity, Filter, SqliteTrackingClient, TrackingClient};
use ingest_pipeline::{BatchReport, ItemStatus, Pipeline, PipelineOptions};

/// Command-line arguments for ingest-pipeline
#[derive(Parser, Debug)]
#[command(name = "ingest-pipeline")]
#[command(about = "Ingest vendor deliveries into the project")]
#[command(version)]
struct Args {
    /// Config file (overrides INGEST_CONFIG and the user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tracking store (overrides the configured database)
    #[arg(long, env = "INGEST_DATABASE")]
    database: Option<PathBuf>,

    /// Project name
    #[arg(short, long)]
    project: String,

    /// Context entity type
    #[arg(long, default_value = "Shot", value_parser = ["Shot", "Sequence", "Asset"])]
    entity_type: String,

    /// Context entity code, e.g. sh010
    #[arg(short, long)]
    entity: String,

    /// Sequence owning a Shot entity
    #[arg(long)]
    sequence: Option<String>,

    /// Existing task on the entity; without it a Vendor task may be created
    #[arg(short, long)]
    task: Option<String>,

    /// Validate only; nothing is copied or registered
    #[arg(long)]
    validate_only: bool,

    /// Stop at the first publish or tracking error
    #[arg(long)]
    stop_on_error: bool,

    /// Files, directories or manifests to ingest
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) = ConfigResolver::new(args.config.clone())
        .load()
        .context("Failed to load configuration")?;
    if let Some(database) = &args.database {
        config.database = Some(database.clone());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ingest-pipeline {} ({} {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!(source = ?source, project_root = %config.project_root.display(), "Configuration");

    let db_path = config.database_path();
    let pool = ingest_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open tracking store {}", db_path.display()))?;
    let tracking: Arc<dyn TrackingClient> = Arc::new(SqliteTrackingClient::new(pool));

    let context = resolve_context(&args, &config, tracking.as_ref()).await?;
    info!(context = %context, "Context resolved");

    let config = Arc::new(config);
    let event_bus = EventBus::new(config.event_capacity);
    let options = PipelineOptions {
        stop_on_error: args.stop_on_error,
        validate_only: args.validate_only,
    };
    let pipeline = Pipeline::new(config, tracking, event_bus, options)?;

    let report = pipeline.ingest(&args.paths, &context).await;
    print_summary(&report);

    if report.outcomes.is_empty() {
        bail!("Nothing to ingest");
    }
    if report.has_problems() {
        std::process::exit(1);
    }
    Ok(())
}

fn link_data(pairs: &[(&str, Value)]) -> Entity {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn entity_ref(entity: &Entity, entity_type: &str, name: &str) -> Result<EntityRef> {
    let id = entity_id(entity).with_context(|| format!("{} '{}' has no id", entity_type, name))?;
    Ok(EntityRef::new(entity_type, id, name))
}

/// Find or create the project, entity and step named on the command line
async fn resolve_context(args: &Args, config: &IngestConfig, tracking: &dyn TrackingClient) -> Result<Context> {
    let (project, _) = queries::find_or_create(
        tracking,
        "Project",
        &[Filter::is("name", args.project.as_str())],
        link_data(&[("name", Value::from(args.project.as_str()))]),
    )
    .await?;
    let project = entity_ref(&project, "Project", &args.project)?;
    let mut context = Context::new(project.clone());

    if let Some(sequence) = &args.sequence {
        let (found, _) = queries::find_or_create(
            tracking,
            "Sequence",
            &[Filter::is("project", project.to_link()), Filter::is("code", sequence.as_str())],
            link_data(&[("code", Value::from(sequence.as_str())), ("project", project.to_link())]),
        )
        .await?;
        context = context.with_parent_sequence(entity_ref(&found, "Sequence", sequence)?);
    }

    let mut entity_fields = vec![("code", Value::from(args.entity.as_str())), ("project", project.to_link())];
    if let (Some(sequence), "Shot") = (&context.parent_sequence, args.entity_type.as_str()) {
        entity_fields.push(("sg_sequence", sequence.to_link()));
    }
    let (entity, _) = queries::find_or_create(
        tracking,
        &args.entity_type,
        &[Filter::is("project", project.to_link()), Filter::is("code", args.entity.as_str())],
        link_data(&entity_fields),
    )
    .await?;
    let entity = entity_ref(&entity, &args.entity_type, &args.entity)?;
    context = context.with_entity(entity.clone());

    // The local store carries the pipeline steps itself
    let step_name = config.step_for_entity_type(&args.entity_type);
    let (step, _) = queries::find_or_create(
        tracking,
        "Step",
        &[
            Filter::is("short_name", step_name),
            Filter::is("entity_type", args.entity_type.as_str()),
        ],
        link_data(&[
            ("short_name", Value::from(step_name)),
            ("entity_type", Value::from(args.entity_type.as_str())),
        ]),
    )
    .await?;
    context = context.with_step(entity_ref(&step, "Step", step_name)?);

    if let Some(task_name) = &args.task {
        let task = tracking
            .find_one(
                "Task",
                &[Filter::is("entity", entity.to_link()), Filter::is("content", task_name.as_str())],
                &[],
            )
            .await?
            .with_context(|| format!("No task '{}' on {} {}", task_name, args.entity_type, args.entity))?;
        context = context.with_task(entity_ref(&task, "Task", task_name)?);
    }

    Ok(context)
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("Session {} ({:?}, {} ms)", report.session_id, report.state, report.duration_ms);
    for outcome in &report.outcomes {
        let status = match outcome.status {
            ItemStatus::Published => "published",
            ItemStatus::Validated => "valid",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "FAILED",
        };
        let detail = match (&outcome.publish_path, &outcome.message) {
            (_, Some(message)) => message.clone(),
            (Some(path), None) => format!("v{} {}", outcome.version.unwrap_or_default(), path.display()),
            (None, None) => String::new(),
        };
        println!("  [{:>9}] {} ({}) {}", status, outcome.item_name, outcome.kind, detail);
        for warning in &outcome.warnings {
            println!("              warning: {}", warning);
        }
    }
    println!(
        "{} published, {} validated, {} skipped, {} failed",
        report.published(),
        report.validated(),
        report.skipped(),
        report.failed()
    );
}
