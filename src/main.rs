//! bulk-analysis CLI - map/reduce LLM analysis over a project's documents

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use bulk_analysis::config::{mask_api_key, EngineConfig};
use bulk_analysis::coordinator::Coordinator;
use bulk_analysis::error::{AnalysisError, FixSuggestion};
use bulk_analysis::event::{Event, EventKind, RunStatus};
use bulk_analysis::group::{
    AnalysisGroup, CombineOrder, GroupStore, MapInputs, OperationMode, ReduceInputs,
};
use bulk_analysis::planner::{RunMode, RunPlan, RunScope};
use bulk_analysis::project::Project;
use bulk_analysis::prompt::{placeholders, PromptSpecRegistry};
use bulk_analysis::provider::{FixedProvider, ProviderResolver};

#[derive(Parser)]
#[command(name = "bulk-analysis")]
#[command(about = "Bulk analysis - map/reduce LLM passes over converted documents")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage analysis groups
    Groups {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Show which inputs are pending and which are done
    Plan {
        /// Project directory
        #[arg(short, long)]
        project: PathBuf,

        /// Group slug
        slug: String,
    },

    /// Run a group (Ctrl-C cancels after the current call)
    Run {
        /// Project directory
        #[arg(short, long)]
        project: PathBuf,

        /// Group slug
        slug: String,

        /// Re-run every input, overwriting existing outputs
        #[arg(long)]
        all: bool,

        /// Override the group's provider (anthropic, openai, mock)
        #[arg(long)]
        provider: Option<String>,

        /// Static placeholder value, e.g. --value client_name=Doe
        #[arg(long = "value", value_parser = parse_key_value)]
        values: Vec<(String, String)>,
    },

    /// Prompt template tools
    Prompt {
        #[command(subcommand)]
        command: PromptCommands,
    },

    /// Engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration (API keys masked)
    Show,
}

#[derive(Subcommand)]
enum GroupCommands {
    /// List the project's groups
    List {
        #[arg(short, long)]
        project: PathBuf,
    },

    /// Create a group
    Create {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, value_enum, default_value_t = Operation::PerDocument)]
        operation: Operation,

        #[arg(long, default_value = "anthropic")]
        provider: String,

        #[arg(long)]
        model: String,

        /// Context window override for models the engine does not know
        #[arg(long)]
        context_window: Option<u32>,

        /// Converted file to include (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Converted directory to include recursively (repeatable)
        #[arg(long = "dir")]
        directories: Vec<String>,

        /// Combined only: every output of another group (repeatable)
        #[arg(long = "map-group")]
        map_groups: Vec<String>,

        /// Combined only: source ordering
        #[arg(long, value_enum, default_value_t = Order::ByPath)]
        order: Order,

        /// Combined only: output file name template
        #[arg(long)]
        output_template: Option<String>,

        /// Combined only: request extended thinking
        #[arg(long)]
        reasoning: bool,

        #[arg(long)]
        system_prompt: Option<String>,

        #[arg(long)]
        user_prompt: Option<String>,
    },

    /// Delete a group and all of its outputs
    Delete {
        #[arg(short, long)]
        project: PathBuf,

        slug: String,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// Validate a template against a prompt role
    Check {
        /// Prompt role, e.g. document_analysis_user_prompt
        #[arg(long)]
        key: String,

        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Operation {
    PerDocument,
    Combined,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    ByPath,
    ByMtime,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Groups { command } => groups(command),
        Commands::Plan { project, slug } => plan(cli.config, &project, &slug),
        Commands::Run {
            project,
            slug,
            all,
            provider,
            values,
        } => run(cli.config, &project, &slug, all, provider, values).await,
        Commands::Prompt {
            command: PromptCommands::Check { key, file },
        } => check_prompt(&key, &file),
        Commands::Config { command } => config_command(cli.config, command),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e
            .downcast_ref::<AnalysisError>()
            .and_then(|err| err.fix_suggestion())
        {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from(&path)?,
        None => EngineConfig::load()?,
    };
    Ok(config.with_env())
}

fn config_command(path: Option<PathBuf>, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let target = path.clone().unwrap_or_else(EngineConfig::config_path);
            if target.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                );
            }
            let config = EngineConfig::default();
            match path {
                Some(path) => config.save_to(&path)?,
                None => config.save()?,
            }
            println!("{} Wrote {}", "✓".green(), target.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let target = path.clone().unwrap_or_else(EngineConfig::config_path);
            let config = load_config(path)?;
            let show_key = |key: Option<&str>| match key {
                Some(key) => mask_api_key(key, 8),
                None => "(not set)".dimmed().to_string(),
            };

            println!("{} {}", "config:".bold(), target.display());
            println!("  anthropic key: {}", show_key(config.anthropic_key()));
            println!("  openai key:    {}", show_key(config.openai_key()));
            for (name, endpoint) in [
                ("anthropic", &config.endpoints.anthropic),
                ("openai", &config.endpoints.openai),
            ] {
                if let Some(endpoint) = endpoint {
                    println!("  {} endpoint: {}", name, endpoint);
                }
            }
            println!(
                "  run: max_output_tokens={} output_reserve_tokens={} chunk_overlap_tokens={} timeout={}s",
                config.run.max_output_tokens,
                config.run.output_reserve_tokens,
                config.run.chunk_overlap_tokens,
                config.run.request_timeout_secs
            );
            println!(
                "  corpus: extensions={} exclude={}",
                config.corpus.allowed_extensions.join(","),
                config.corpus.exclude.join(",")
            );
            Ok(())
        }
    }
}

fn groups(command: GroupCommands) -> anyhow::Result<()> {
    match command {
        GroupCommands::List { project } => {
            let report = GroupStore::new(Project::new(project)).load_all()?;
            if report.groups.is_empty() {
                println!("No analysis groups");
            }
            for group in &report.groups {
                println!(
                    "{} {} ({}, {} / {})",
                    "•".cyan(),
                    group.label().bold(),
                    group.operation.kind(),
                    group.provider_id,
                    group.model
                );
            }
            for skipped in &report.skipped {
                println!(
                    "{} skipped {}: {}",
                    "!".yellow(),
                    skipped.path.display(),
                    skipped.error
                );
            }
            Ok(())
        }
        GroupCommands::Create {
            project,
            name,
            description,
            operation,
            provider,
            model,
            context_window,
            files,
            directories,
            map_groups,
            order,
            output_template,
            reasoning,
            system_prompt,
            user_prompt,
        } => {
            let operation = match operation {
                Operation::PerDocument => OperationMode::Map(MapInputs { files, directories }),
                Operation::Combined => {
                    let mut inputs = ReduceInputs {
                        converted_files: files,
                        converted_directories: directories,
                        map_groups,
                        order: match order {
                            Order::ByPath => CombineOrder::ByPath,
                            Order::ByMtime => CombineOrder::ByMtime,
                        },
                        use_reasoning: reasoning,
                        ..ReduceInputs::default()
                    };
                    if let Some(template) = output_template {
                        inputs.output_template = template;
                    }
                    OperationMode::Reduce(inputs)
                }
            };

            let mut group = AnalysisGroup::new(name, provider, model, operation)
                .with_description(description)
                .with_prompts(system_prompt, user_prompt);
            if let Some(tokens) = context_window {
                group = group.with_context_window(tokens);
            }

            let saved = GroupStore::new(Project::new(project)).save(&group)?;
            println!("{} Created group '{}'", "✓".green(), saved.label().bold());
            Ok(())
        }
        GroupCommands::Delete { project, slug } => {
            let store = GroupStore::new(Project::new(project));
            let group = store.load(&slug)?;
            store.delete(&group)?;
            println!("{} Deleted group '{}'", "✓".green(), slug);
            Ok(())
        }
    }
}

fn plan(config: Option<PathBuf>, project: &Path, slug: &str) -> anyhow::Result<()> {
    let project = Project::new(project);
    let coordinator = Coordinator::from_config(load_config(config)?);
    let group = GroupStore::new(project.clone()).load(slug)?;

    let (_, analysis) = coordinator.check_prompts(&project, &group)?;
    for name in &analysis.missing_optional {
        println!("{} no value for {{{}}}", "!".yellow(), name);
    }

    match coordinator.plan(&project, &group, RunScope::Pending)? {
        RunPlan::Map { items, skipped } => {
            println!(
                "{} {} pending, {} done",
                "→".cyan(),
                items.len().to_string().bold(),
                skipped.len()
            );
            for item in &items {
                println!("  {} {}", "pending".yellow(), item.relative);
            }
            for relative in &skipped {
                println!("  {} {}", "done".green(), relative);
            }
        }
        RunPlan::Reduce {
            sources,
            output,
            has_output,
        } => {
            println!("{} {} source(s)", "→".cyan(), sources.len().to_string().bold());
            for source in &sources {
                println!("  {}", source.label);
            }
            let state = if has_output { "exists".green() } else { "missing".yellow() };
            println!("  output: {} ({})", output.display(), state);
        }
    }
    Ok(())
}

async fn run(
    config: Option<PathBuf>,
    project: &Path,
    slug: &str,
    all: bool,
    provider_override: Option<String>,
    values: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let project = Project::new(project);
    let config = load_config(config)?;
    let group = GroupStore::new(project.clone())
        .load(slug)
        .with_context(|| format!("loading group '{}'", slug))?;

    let settings = config.run.clone();
    let corpus = config.corpus.clone();
    let resolver: Arc<dyn ProviderResolver> = match provider_override {
        Some(id) => Arc::new(FixedProvider(config.resolve(&id)?)),
        None => Arc::new(config),
    };
    let coordinator = Coordinator::new(resolver)
        .with_settings(settings)
        .with_corpus(corpus)
        .with_placeholder_values(values.into_iter().collect::<HashMap<_, _>>());

    let scope = if all { RunScope::All } else { RunScope::Pending };
    let mode = RunMode::for_operation(&group.operation);

    let mut events = coordinator.subscribe();
    let handle = coordinator.start(&project, group.group_id, mode, scope)?;
    println!(
        "{} Running '{}' ({}, {:?} scope)",
        "→".cyan(),
        group.label().bold(),
        mode,
        scope
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    print_event(&event);
                    if event.kind.is_terminal() {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if coordinator.cancel(handle.group_id()) {
                    println!("{} Cancelling after the current call...", "!".yellow());
                }
            }
        }
    }

    let result = handle.wait().await?;
    match result.status {
        RunStatus::Failed => bail!(
            "run failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        _ if result.failure_count > 0 => bail!("{} item(s) failed", result.failure_count),
        _ => Ok(()),
    }
}

fn print_event(event: &Event) {
    match &event.kind {
        EventKind::RunStarted { total, .. } => {
            println!("  {} item(s) to process", total);
        }
        EventKind::Progress {
            completed,
            total,
            current_label,
            artifact,
            ..
        } => {
            let mark = if artifact.is_some() { "✓".green() } else { "✗".red() };
            println!("  {} [{}/{}] {}", mark, completed, total, current_label);
        }
        EventKind::ItemFailed { path, error, .. } => {
            println!("  {} {}: {}", "✗".red(), path, error);
        }
        EventKind::Log { message, .. } => {
            println!("  {} {}", "·".dimmed(), message);
        }
        EventKind::Finished {
            success_count,
            failure_count,
            status,
            ..
        } => {
            let status = match status {
                RunStatus::Completed => "completed".green(),
                RunStatus::Cancelled => "cancelled".yellow(),
                RunStatus::Failed => "failed".red(),
            };
            println!(
                "{} Run {}: {} succeeded, {} failed",
                "→".cyan(),
                status,
                success_count,
                failure_count
            );
        }
    }
}

fn check_prompt(key: &str, file: &Path) -> anyhow::Result<()> {
    let template = std::fs::read_to_string(file)
        .with_context(|| format!("reading prompt '{}'", file.display()))?;
    let registry = PromptSpecRegistry::with_defaults();
    if registry.get(key).is_none() {
        println!("{} '{}' is not a registered prompt role", "!".yellow(), key);
    }
    registry.validate(key, &template)?;

    let used = placeholders(&template);
    println!(
        "{} {} is valid for {}",
        "✓".green(),
        file.display(),
        key.bold()
    );
    if !used.is_empty() {
        let names: Vec<_> = used.iter().map(|n| format!("{{{}}}", n)).collect();
        println!("  placeholders: {}", names.join(", "));
    }
    Ok(())
}
