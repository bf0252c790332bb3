//! CLI command definitions for the workflow engine.
//!
//! Pipelines are looked up by name in the configuration directory, which
//! defaults to `WORKFLOW_CONF_PATH` (or `./conf`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde_json::{Map, Value};
use tracing::info;

use crate::config::{ExecutionOrder, Runtime, WorkflowConfig};
use crate::pipeline::{Loader, Pipeline};
use crate::registry::TaskCatalog;

/// Runs YAML-defined pipelines of shell, code and task stages.
#[derive(Parser, Debug)]
#[command(name = "workflow")]
#[command(about = "Run YAML-defined data pipelines")]
#[command(version)]
#[command(
    long_about = "workflow loads pipeline definitions from a directory of YAML files and runs their jobs.\n\nExample usage:\n  workflow run ingest-daily -p run-date=2024-01-01 --conf-path ./conf"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List the pipelines found in the configuration directory.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show the parameters and job order of a pipeline.
    Show(ShowArgs),

    /// Run a pipeline and print the final context as JSON.
    Run(RunArgs),

    /// List the registered task modules and their `name@tag` entries.
    Tasks,
}

/// Arguments for `workflow list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Directory holding the YAML definitions.
    #[arg(long, env = "WORKFLOW_CONF_PATH")]
    pub conf_path: Option<PathBuf>,
}

/// Arguments for `workflow show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Pipeline name.
    pub name: String,

    /// Directory holding the YAML definitions.
    #[arg(long, env = "WORKFLOW_CONF_PATH")]
    pub conf_path: Option<PathBuf>,

    /// Job order to display.
    #[arg(long, value_enum)]
    pub order: Option<ExecutionOrder>,
}

/// Arguments for `workflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline name.
    pub name: String,

    /// Directory holding the YAML definitions.
    #[arg(long, env = "WORKFLOW_CONF_PATH")]
    pub conf_path: Option<PathBuf>,

    /// Parameter as key=value; may be repeated.
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Parameters as a JSON object; `--param` entries override its keys.
    #[arg(long)]
    pub params_json: Option<String>,

    /// Job execution order.
    #[arg(long, value_enum)]
    pub order: Option<ExecutionOrder>,

    /// Abort the run when a shell stage exits non-zero.
    #[arg(long)]
    pub fail_on_shell_error: bool,
}

/// Parses a `key=value` parameter.
fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Merges `--params-json` and `--param` entries into one map.
fn collect_params(args: &RunArgs) -> anyhow::Result<Map<String, Value>> {
    let mut params = match &args.params_json {
        Some(raw) => match serde_json::from_str(raw).context("Invalid --params-json")? {
            Value::Object(map) => map,
            other => anyhow::bail!("--params-json must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };

    for (key, value) in &args.params {
        params.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(params)
}

/// Builds the engine configuration from the environment and CLI overrides.
fn build_config(
    conf_path: Option<PathBuf>,
    order: Option<ExecutionOrder>,
    fail_on_shell_error: bool,
) -> anyhow::Result<WorkflowConfig> {
    let mut config = WorkflowConfig::from_env()?;
    if let Some(path) = conf_path {
        config = config.with_conf_path(path);
    }
    if let Some(order) = order {
        config = config.with_execution_order(order);
    }
    if fail_on_shell_error {
        config = config.with_fail_on_shell_error(true);
    }
    config.validate()?;
    Ok(config)
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::List(args) => run_list_command(args),
        Commands::Show(args) => run_show_command(args),
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Tasks => run_tasks_command(),
    }
}

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let config = build_config(args.conf_path, None, false)?;
    let loader = Loader::new(config.conf_path.clone());

    let names = loader
        .pipeline_names()
        .with_context(|| format!("Failed to scan {}", config.conf_path.display()))?;

    if names.is_empty() {
        println!("No pipelines found in {}", config.conf_path.display());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let config = build_config(args.conf_path, args.order, false)?;
    let loader = Loader::new(config.conf_path.clone());
    let pipeline = Pipeline::from_loader(&loader, &args.name, &Map::new())?;

    println!("Pipeline: {}", pipeline.name);

    println!("\nParameters:");
    if pipeline.params.is_empty() {
        println!("  (none)");
    }
    for (name, spec) in &pipeline.params {
        let required = if spec.required() { " (required)" } else { "" };
        match spec.desc() {
            Some(desc) => println!("  {}: {}{} - {}", name, spec.type_name(), required, desc),
            None => println!("  {}: {}{}", name, spec.type_name(), required),
        }
    }

    println!("\nJobs ({} order):", config.execution_order);
    for (index, name) in pipeline
        .job_order(config.execution_order)?
        .into_iter()
        .enumerate()
    {
        let job = pipeline.job(name)?;
        if job.needs.is_empty() {
            println!("  {}. {}", index + 1, name);
        } else {
            println!("  {}. {} (needs: {})", index + 1, name, job.needs.join(", "));
        }

        for stage in &job.stages {
            match stage.id() {
                Some(id) => println!("     - [{}] {} (id: {})", stage.kind(), stage.name(), id),
                None => println!("     - [{}] {}", stage.kind(), stage.name()),
            }
        }
    }
    Ok(())
}

/// One line per module followed by its indented `name@tag` entries.
fn task_listing(catalog: &TaskCatalog) -> anyhow::Result<Vec<String>> {
    let mut lines = Vec::new();
    for module in catalog.modules() {
        let registry = catalog
            .build_registry(module)
            .with_context(|| format!("Failed to build task module {}", module))?;
        lines.push(format!("{} ({} tasks)", module, registry.len()));
        lines.extend(registry.entries().into_iter().map(|entry| format!("  {}", entry)));
    }
    Ok(lines)
}

fn run_tasks_command() -> anyhow::Result<()> {
    for line in task_listing(&TaskCatalog::with_builtin_tasks())? {
        println!("{}", line);
    }
    Ok(())
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let params = collect_params(&args)?;
    let config = build_config(args.conf_path, args.order, args.fail_on_shell_error)?;

    let loader = Loader::new(config.conf_path.clone());
    let pipeline = Pipeline::from_loader(&loader, &args.name, &Map::new())?;
    info!(pipeline = %pipeline.name, params = params.len(), "Running pipeline");

    let runtime = Runtime::new(config, Arc::new(TaskCatalog::with_builtin_tasks()));
    let context = pipeline
        .execute(params, &runtime)
        .await
        .with_context(|| format!("Pipeline '{}' failed", args.name))?;

    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}
