//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.ghidra-agent.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".ghidra-agent.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Ghidra plugin settings.
    #[serde(default)]
    pub ghidra: GhidraConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Directory where `/save` writes transcripts.
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            transcript_dir: default_transcript_dir(),
        }
    }
}

fn default_transcript_dir() -> PathBuf {
    PathBuf::from(".")
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name on the Ollama server.
    #[serde(default)]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,

    /// Maximum backend rounds per prompt.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Optional system prompt recorded at the start of the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ollama_url: default_ollama_url(),
            timeout_seconds: default_model_timeout(),
            max_rounds: default_max_rounds(),
            system_prompt: None,
        }
    }
}

pub const DEFAULT_OLLAMA_HOST: &str = "127.0.0.1";
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_GHIDRA_HOST: &str = "127.0.0.1";
pub const DEFAULT_GHIDRA_PORT: u16 = 8080;

fn default_ollama_url() -> String {
    format!("http://{}:{}", DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_PORT)
}

fn default_model_timeout() -> u64 {
    60
}

fn default_max_rounds() -> usize {
    25
}

/// Ghidra HTTP plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhidraConfig {
    /// Plugin base URL.
    #[serde(default = "default_ghidra_url")]
    pub url: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_ghidra_timeout")]
    pub timeout_seconds: u64,

    /// Run the tool calls of one round concurrently.
    #[serde(default)]
    pub parallel_tools: bool,
}

impl Default for GhidraConfig {
    fn default() -> Self {
        Self {
            url: default_ghidra_url(),
            timeout_seconds: default_ghidra_timeout(),
            parallel_tools: false,
        }
    }
}

fn default_ghidra_url() -> String {
    format!("http://{}:{}", DEFAULT_GHIDRA_HOST, DEFAULT_GHIDRA_PORT)
}

fn default_ghidra_timeout() -> u64 {
    5
}

/// Build an `http://host:port` URL, trimming both parts.
pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host.trim(), port)
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.ollama_model {
            self.model.name = model.trim().to_string();
        }

        // A host or a port alone still rebuilds the URL, filling in the default for the other.
        if args.ollama_host.is_some() || args.ollama_port.is_some() {
            self.model.ollama_url = endpoint_url(
                args.ollama_host.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST),
                args.ollama_port.unwrap_or(DEFAULT_OLLAMA_PORT),
            );
        }

        if args.ghidra_host.is_some() || args.ghidra_port.is_some() {
            self.ghidra.url = endpoint_url(
                args.ghidra_host.as_deref().unwrap_or(DEFAULT_GHIDRA_HOST),
                args.ghidra_port.unwrap_or(DEFAULT_GHIDRA_PORT),
            );
        }

        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if let Some(max_rounds) = args.max_rounds {
            self.model.max_rounds = max_rounds;
        }

        // Flags always override
        if args.parallel_tools {
            self.ghidra.parallel_tools = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check the merged configuration before a session starts.
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() || self.model.name.trim() == "(None)" {
            bail!("Must specify the model to run on Ollama (--ollama-model or OLLAMA_MODEL)");
        }

        for (label, url) in [("Ollama", &self.model.ollama_url), ("Ghidra", &self.ghidra.url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{} URL must start with 'http://' or 'https://': {}", label, url);
            }
        }

        if self.model.max_rounds == 0 {
            bail!("max_rounds must be at least 1");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.ollama_url, "http://127.0.0.1:11434");
        assert_eq!(config.ghidra.url, "http://127.0.0.1:8080");
        assert_eq!(config.model.timeout_seconds, 60);
        assert_eq!(config.ghidra.timeout_seconds, 5);
        assert_eq!(config.model.max_rounds, 25);
        assert!(!config.ghidra.parallel_tools);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
verbose = true

[model]
name = "qwen3:14b"
ollama_url = "http://gpu-box:11434"
max_rounds = 40
system_prompt = "You are a reverse engineer."

[ghidra]
url = "http://10.0.0.5:8080"
parallel_tools = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.model.name, "qwen3:14b");
        assert_eq!(config.model.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.model.max_rounds, 40);
        assert_eq!(config.model.timeout_seconds, 60);
        assert_eq!(
            config.model.system_prompt.as_deref(),
            Some("You are a reverse engineer.")
        );
        assert_eq!(config.ghidra.url, "http://10.0.0.5:8080");
        assert!(config.ghidra.parallel_tools);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[model]\nname = \"llama3.1\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.model.name, "llama3.1");
        assert_eq!(config.ghidra.url, "http://127.0.0.1:8080");

        std::fs::write(&path, "[model\nname = ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut args = make_args();
        args.ollama_model = Some(" qwen3 ".to_string());
        args.ollama_port = Some(11500);
        args.ghidra_host = Some("10.1.1.1".to_string());
        args.max_rounds = Some(5);
        args.parallel_tools = true;

        let mut config = Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.model.name, "qwen3");
        assert_eq!(config.model.ollama_url, "http://127.0.0.1:11500");
        assert_eq!(config.ghidra.url, "http://10.1.1.1:8080");
        assert_eq!(config.model.max_rounds, 5);
        assert!(config.ghidra.parallel_tools);
    }

    #[test]
    fn test_merge_keeps_file_urls_without_flags() {
        let mut config = Config::default();
        config.model.ollama_url = "http://gpu-box:11434".to_string();
        config.merge_with_args(&make_args());
        assert_eq!(config.model.ollama_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.model.name = "qwen3".to_string();
        assert!(config.validate().is_ok());

        config.ghidra.url = "localhost:8080".to_string();
        assert!(config.validate().is_err());

        config.ghidra.url = "http://localhost:8080".to_string();
        config.model.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[ghidra]"));
    }
}
