use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use quarry_core::{Config, ModelRegistry};
use quarry_ops::{default_registry, ServiceContext};
use quarry_rpc::{Access, Envelope, OperationRegistry};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Build document indexes and ask questions against them", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Model management commands")]
    Model {
        #[command(subcommand)]
        command: ModelCommands,
    },

    #[command(about = "List the operations this deployment exposes")]
    Ops,

    #[command(about = "Build or refresh an index (the embedding operation)")]
    Build {
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        prefix: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        metadata: String,
        #[arg(short, long)]
        region: Option<String>,
    },

    #[command(about = "Ask a question against an index (the ragChat operation)")]
    Ask {
        #[arg(help = "The question")]
        query: String,
        #[arg(short, long)]
        bucket: String,
        #[arg(short, long)]
        index: String,
        #[arg(short, long)]
        metadata: String,
        #[arg(short = 'k', long)]
        top_k: Option<u64>,
        #[arg(short, long, help = "Prompt template with {retrieved_docs} and {user_query}")]
        template: Option<String>,
        #[arg(short, long)]
        region: Option<String>,
    },

    #[command(about = "Invoke an operation with raw JSON arguments")]
    Invoke {
        operation: String,
        #[arg(help = "Arguments, flat or as {\"arguments\": {...}}")]
        args: String,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    #[command(about = "Show configured models")]
    Show,

    #[command(about = "Set the embedding or generation model")]
    Set {
        #[arg(value_enum)]
        kind: ModelKind,
        #[arg(help = "Model id (e.g., 'nomic-embed-text' or 'llama3.2')")]
        model: String,
    },

    #[command(about = "List known models")]
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelKind {
    Embedding,
    Generation,
}

impl ModelKind {
    fn section(self) -> &'static str {
        match self {
            ModelKind::Embedding => "embedding",
            ModelKind::Generation => "generation",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show => show_config(&cli.config),
        Commands::Model { command } => match command {
            ModelCommands::Show => show_model(&cli.config),
            ModelCommands::Set { kind, model } => set_model(&cli.config, kind, &model),
            ModelCommands::List => list_models(),
        },
        Commands::Ops => list_operations(&cli.config),
        Commands::Build {
            bucket,
            prefix,
            index,
            metadata,
            region,
        } => {
            let mut args = json!({
                "s3_bucket": bucket,
                "s3_folder_prefix": prefix,
                "s3_index_key": index,
                "metadata_key": metadata,
            });
            if let Some(region) = region {
                args["bedrock_region"] = json!(region);
            }
            invoke(&cli.config, "embedding", args).await
        }
        Commands::Ask {
            query,
            bucket,
            index,
            metadata,
            top_k,
            template,
            region,
        } => {
            let mut args = json!({
                "s3_bucket": bucket,
                "s3_index_key": index,
                "metadata_key": metadata,
                "query": query,
            });
            if let Some(top_k) = top_k {
                args["top_k"] = json!(top_k);
            }
            if let Some(template) = template {
                args["prompt_template"] = json!(template);
            }
            if let Some(region) = region {
                args["bedrock_region"] = json!(region);
            }
            invoke(&cli.config, "ragChat", args).await
        }
        Commands::Invoke { operation, args } => {
            let args: Value =
                serde_json::from_str(&args).context("Arguments are not valid JSON")?;
            invoke(&cli.config, &operation, args).await
        }
    }
}

/// Loads the config file, or the defaults when it does not exist.
fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    Config::load(config_path).context("Failed to load config")
}

fn build_registry(config_path: &Path) -> Result<OperationRegistry> {
    let config = load_config(config_path)?;
    let context = ServiceContext::from_config(config).context("Failed to set up buckets and regions")?;
    Ok(default_registry(Arc::new(context), Access::ALL))
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "Models:".bold());
    println!("  Embedding:      {}", config.embedding.model.cyan());
    println!("  Generation:     {}", config.generation.model.cyan());
    println!("  Temperature:    {}", config.generation.temperature);
    println!();
    println!("{}", "Regions:".bold());
    for (region, url) in &config.provider.regions {
        let marker = if *region == config.provider.default_region {
            " (default)"
        } else {
            ""
        };
        println!("  {}{}: {}", region.cyan(), marker, url);
    }
    println!("  Timeout:        {}s", config.provider.timeout_secs);
    println!();
    println!("{}", "Indexing:".bold());
    println!("  Chunk Size:     {}", config.chunking.chunk_size);
    println!("  Chunk Overlap:  {}", config.chunking.chunk_overlap);
    println!("  Batch Size:     {}", config.build.batch_size);
    println!("  Failure Policy: {:?}", config.build.failure_policy);
    println!();
    println!("{}", "Query:".bold());
    println!("  Top K:          {}", config.query.default_top_k);
    println!("  Max Doc Chars:  {}", config.query.max_document_chars);
    println!();
    println!("{}", "Buckets:".bold());
    if config.storage.buckets.is_empty() {
        println!("  {}", "none configured".yellow());
    }
    for (name, mode) in &config.storage.buckets {
        println!("  {}: {:?}", name.cyan(), mode);
    }

    Ok(())
}

fn show_model(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}: {}", "Embedding model".bold(), config.embedding.model.cyan());
    println!("{}: {}", "Generation model".bold(), config.generation.model.cyan());
    Ok(())
}

fn set_model(config_path: &Path, kind: ModelKind, model: &str) -> Result<()> {
    let content = std::fs::read_to_string(config_path).context("Failed to read config file")?;

    let mut config: serde_yaml::Value =
        serde_yaml::from_str(&content).context("Failed to parse config")?;

    set_model_in(&mut config, kind, model)?;

    let updated_content = serde_yaml::to_string(&config).context("Failed to serialize config")?;

    std::fs::write(config_path, updated_content).context("Failed to write config file")?;

    println!(
        "{} {} model updated to: {}",
        "✓".green().bold(),
        kind.section(),
        model.cyan()
    );

    Ok(())
}

fn set_model_in(config: &mut serde_yaml::Value, kind: ModelKind, model: &str) -> Result<()> {
    let root = config
        .as_mapping_mut()
        .context("Config file is not a mapping")?;

    let section = root
        .entry(serde_yaml::Value::String(kind.section().to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));

    let section = section
        .as_mapping_mut()
        .with_context(|| format!("'{}' is not a mapping", kind.section()))?;

    section.insert(
        serde_yaml::Value::String("model".to_string()),
        serde_yaml::Value::String(model.to_string()),
    );
    Ok(())
}

fn list_models() -> Result<()> {
    let registry = ModelRegistry::new();

    println!("{}", "Embedding models:".bold().green());
    for model in registry.embedding_models() {
        println!(
            "  {} {} ({} dims) {}",
            "•".cyan(),
            model.id.bold(),
            model.embedding_dim,
            model.description.dimmed()
        );
    }
    println!();
    println!("{}", "Chat models:".bold().green());
    for model in registry.chat_models() {
        println!(
            "  {} {} ({} tokens) {}",
            "•".cyan(),
            model.id.bold(),
            model.context_length,
            model.description.dimmed()
        );
    }
    println!();
    println!(
        "Use {} to pick one",
        "quarry -c config.yaml model set <embedding|generation> <model>".bold()
    );

    Ok(())
}

fn list_operations(config_path: &Path) -> Result<()> {
    let registry = build_registry(config_path)?;

    println!("{}", "Operations:".bold().green());
    for spec in registry.specs() {
        println!(
            "  {} {}: {}",
            "•".cyan(),
            spec["name"].as_str().unwrap_or_default().bold(),
            spec["description"].as_str().unwrap_or_default()
        );
        let required = spec["parameters"]["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!("      required: {}", required);
    }
    Ok(())
}

async fn invoke(config_path: &Path, operation: &str, args: Value) -> Result<()> {
    let registry = build_registry(config_path)?;
    let envelope = registry.invoke(operation, args).await;
    print_envelope(&envelope)
}

fn print_envelope(envelope: &Envelope) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(envelope).context("Failed to serialize result")?
    );

    if let Some(error) = &envelope.error {
        anyhow::bail!("{} {}", error.code.red().bold(), error.message);
    }
    Ok(())
}
