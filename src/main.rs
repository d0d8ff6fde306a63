//! Ghidra Agent - drive Ghidra from a chat with a local LLM
//!
//! A CLI tool that connects an Ollama-served model to the Ghidra HTTP
//! plugin through tool calling, either interactively or for a single prompt.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (invalid arguments, config, backend failure, etc.)

mod agent;
mod cli;
mod config;
mod error;
mod models;
mod repl;
mod tools;

use agent::{Agent, AgentConfig, OllamaTransport};
use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE};
use repl::Repl;
use std::path::Path;
use std::sync::Arc;
use tools::{GhidraProvider, ToolProvider};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up OLLAMA_MODEL and friends from a local .env before clap reads the environment
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, config.general.verbose);

    info!("Ghidra Agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args, config).await {
        error!("Session failed: {:#}", e);
        eprintln!("\nError: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .ghidra-agent.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("Created {} with default settings.", CONFIG_FILE);
    println!("   Set [model] name, then adjust the Ollama and Ghidra URLs if needed.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so the prompt and answers on stdout stay clean.
/// `RUST_LOG` takes precedence over the verbosity flags when set.
fn init_logging(args: &Args, verbose: bool) {
    let level = match args.log_level() {
        tracing::Level::INFO if verbose => tracing::Level::DEBUG,
        level => level,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Build the agent from the merged configuration and run the session.
async fn run(args: Args, config: Config) -> Result<()> {
    config.validate()?;

    println!("Ghidra Agent");
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!("   Ghidra: {}", config.ghidra.url);

    let ghidra = GhidraProvider::new(&config.ghidra.url, config.ghidra.timeout_seconds)
        .context("Failed to create Ghidra client")?;
    let transport = OllamaTransport::new(&config.model.ollama_url, config.model.timeout_seconds)
        .context("Failed to create Ollama client")?;

    let agent_config = AgentConfig {
        model_name: config.model.name.clone(),
        max_rounds: config.model.max_rounds,
        system_prompt: config.model.system_prompt.clone(),
        parallel_tools: config.ghidra.parallel_tools,
    };

    let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(ghidra)];
    let agent = Agent::new(agent_config, Arc::new(transport), providers);

    let show_progress = !args.quiet;
    let mut repl = Repl::new(agent, config.general.transcript_dir.clone(), show_progress);

    match args.prompt {
        Some(ref prompt) => {
            let answer = repl.ask_once(prompt).await?;
            println!("\nResponse:\n{}", answer);
            Ok(())
        }
        None => repl.run().await,
    }
}

/// Load configuration from file or use defaults, with a note on where it
/// came from. Runs before logging is set up.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, format!("loaded from {}", config_path.display())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, format!("loaded from {}", CONFIG_FILE))),
        Ok(None) => Ok((Config::default(), "defaults".to_string())),
        Err(e) => {
            eprintln!("Warning: failed to load config: {:#}", e);
            Ok((Config::default(), "defaults".to_string()))
        }
    }
}
