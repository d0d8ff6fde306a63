//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Every setting is optional here so that values
//! from `.ghidra-agent.toml` survive unless a flag overrides them.

use clap::Parser;
use std::path::PathBuf;

/// Ghidra Agent - chat with an LLM that drives Ghidra for you
///
/// The model (served by Ollama) can list, decompile, rename and comment
/// functions through the Ghidra HTTP plugin while answering your questions.
///
/// Examples:
///   ghidra-agent --ollama-model qwen3:14b
///   ghidra-agent --om qwen3:14b --gh 10.0.0.5 --gp 8080
///   ghidra-agent --om qwen3:14b "What does the entry point do?"
///   ghidra-agent --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Run a single prompt and exit instead of starting the interactive session
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Hostname or IP address of the Ghidra HTTP plugin
    #[arg(long = "ghidra-host", visible_alias = "gh", env = "GHIDRA_SERVER_HOST")]
    pub ghidra_host: Option<String>,

    /// Port number of the Ghidra HTTP plugin
    #[arg(long = "ghidra-port", visible_alias = "gp", env = "GHIDRA_SERVER_PORT")]
    pub ghidra_port: Option<u16>,

    /// Hostname or IP address of the Ollama server
    #[arg(long = "ollama-host", visible_alias = "oh", env = "OLLAMA_SERVER_HOST")]
    pub ollama_host: Option<String>,

    /// Port number of the Ollama server
    #[arg(long = "ollama-port", visible_alias = "op", env = "OLLAMA_SERVER_PORT")]
    pub ollama_port: Option<u16>,

    /// Model to run on the Ollama server
    #[arg(long = "ollama-model", visible_alias = "om", env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ghidra-agent.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum model rounds per prompt before giving up
    #[arg(long, value_name = "COUNT")]
    pub max_rounds: Option<usize>,

    /// Ollama request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Run the tool calls of one model turn concurrently
    #[arg(long)]
    pub parallel_tools: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .ghidra-agent.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.ghidra_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err("Host and port to Ghidra plugin are both required".to_string());
        }

        if self.ollama_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err("Host and port to Ollama server are both required".to_string());
        }

        if self.ghidra_port == Some(0) || self.ollama_port == Some(0) {
            return Err("Port must be between 1 and 65535".to_string());
        }

        if self.max_rounds == Some(0) {
            return Err("Max rounds must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.prompt.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err("Prompt must not be empty".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
