use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use specsmith_catalog::{CacheStatus, CatalogFetcher};
use specsmith_core::config::{dirs_home, AppConfig, ModelConfig};
use specsmith_core::traits::Oracle;
use specsmith_core::types::Specification;
use specsmith_editor::{
    apply, validate, validate_patch, EditOrchestrator, EditOutcome, RawPatch, ValidationResult,
};

#[derive(Parser)]
#[command(name = "specsmith", version, about = "Patch-based editor for agent specifications")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "specsmith.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit a specification with a natural-language request
    Edit {
        /// Specification JSON file
        #[arg(long)]
        spec: PathBuf,
        /// Where to write the edited specification (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Bypass a fresh catalog cache
        #[arg(long)]
        refresh_catalog: bool,
        /// The change request. Read from stdin when empty.
        #[arg(trailing_var_arg = true)]
        request: Vec<String>,
    },
    /// Validate a specification against the block catalog
    Validate {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Validate a patch file against a specification without calling the oracle
    CheckPatch {
        #[arg(long)]
        spec: PathBuf,
        /// Patch JSON file (`{"operations": [...]}`)
        #[arg(long)]
        patch: PathBuf,
        /// Write the patched specification here when the patch is valid
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show block catalog and cache status
    Catalog {
        /// Refetch from the API even if the cache is fresh
        #[arg(long)]
        refresh: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("specsmith=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "specsmith", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Edit {
            spec,
            out,
            refresh_catalog,
            request,
        } => {
            let request = if request.is_empty() {
                let mut input = String::new();
                io::stdin().read_to_string(&mut input)?;
                input.trim().to_string()
            } else {
                request.join(" ")
            };
            if request.is_empty() {
                bail!("empty change request");
            }

            let base = read_spec(&spec)?;
            let loaded = CatalogFetcher::new(config.catalog.clone())
                .load(refresh_catalog)
                .await?;
            info!(blocks = loaded.catalog.len(), source = %loaded.source, "Block catalog ready");

            let oracle: Arc<dyn Oracle> =
                Arc::from(specsmith_llm::build_oracle(&config.model, &config.fallback_models));
            let orchestrator = EditOrchestrator::new(oracle, config.editor.clone());
            let cycle = orchestrator.edit(&base, &request, &loaded.catalog).await?;

            match cycle.outcome {
                EditOutcome::Done(applied) => {
                    eprintln!(
                        "Applied after {} attempt(s): {}",
                        cycle.attempts,
                        applied.report.summary()
                    );
                    write_spec(&applied.spec, out.as_deref())?;
                }
                EditOutcome::NeedsClarification(questions) => {
                    eprintln!("The request needs clarification:");
                    for q in questions {
                        if q.example.is_empty() {
                            eprintln!("  - {}", q.question);
                        } else {
                            eprintln!("  - {} (e.g. {})", q.question, q.example);
                        }
                    }
                    std::process::exit(2);
                }
                EditOutcome::Rejected {
                    reason,
                    last_failure,
                } => {
                    bail!(
                        "edit rejected after {} attempts ({:?}): {}",
                        cycle.attempts,
                        reason,
                        last_failure
                    );
                }
            }
        }
        Commands::Validate { spec } => {
            let spec = read_spec(&spec)?;
            let loaded = CatalogFetcher::new(config.catalog.clone()).load(false).await?;
            match validate(&spec, &loaded.catalog) {
                ValidationResult::Valid => println!("valid"),
                ValidationResult::Invalid { violations } => {
                    for v in &violations {
                        println!("{}", v);
                    }
                    bail!("{} violation(s)", violations.len());
                }
            }
        }
        Commands::CheckPatch { spec, patch, out } => {
            let base = read_spec(&spec)?;
            let text = std::fs::read_to_string(&patch)
                .with_context(|| format!("cannot read {}", patch.display()))?;
            let raw: RawPatch = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a valid patch", patch.display()))?;
            let patch = raw.into_patch();

            let loaded = CatalogFetcher::new(config.catalog.clone()).load(false).await?;
            if let Err(violation) = validate_patch(&base, &patch, &loaded.catalog) {
                bail!("{}", violation);
            }
            let applied = apply(&base, &patch);
            eprintln!("Patch is valid: {}", applied.report.summary());
            if out.is_some() {
                write_spec(&applied.spec, out.as_deref())?;
            }
        }
        Commands::Catalog { refresh } => {
            let fetcher = CatalogFetcher::new(config.catalog.clone());
            let loaded = fetcher.load(refresh).await?;
            println!("Blocks: {} (from {})", loaded.catalog.len(), loaded.source);

            let info = fetcher.cache_info().await?;
            match info.status {
                CacheStatus::Missing => println!("Cache:  none"),
                status => println!(
                    "Cache:  {:?}, {} blocks, {:.1}h old (max {}h)",
                    status,
                    info.blocks_count,
                    info.age_hours.unwrap_or_default(),
                    info.max_age_hours
                ),
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in common locations
    if let Some(home_config) = dirs_home().map(|h| h.join(".specsmith").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    warn!("No config file found, using environment defaults");
    Ok(create_env_config())
}

fn create_env_config() -> AppConfig {
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    let (provider, model_id, api_key) = if let Some(key) = anthropic_key {
        ("anthropic", "claude-sonnet-4-20250514", Some(key))
    } else if let Some(key) = openai_key {
        ("openai", "gpt-4o", Some(key))
    } else {
        ("anthropic", "claude-sonnet-4-20250514", None)
    };

    AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            api_key,
            base_url: None,
            max_tokens: 8192,
            temperature: 0.0,
            retry: None,
        },
        fallback_models: vec![],
        editor: Default::default(),
        catalog: Default::default(),
    }
}

fn read_spec(path: &Path) -> anyhow::Result<Specification> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Specification::from_json_str(&text)
        .with_context(|| format!("{} is not a valid specification", path.display()))
}

fn write_spec(spec: &Specification, out: Option<&Path>) -> anyhow::Result<()> {
    let json = spec.to_json_pretty()?;
    match out {
        Some(path) => {
            std::fs::write(path, json + "\n")
                .with_context(|| format!("cannot write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
