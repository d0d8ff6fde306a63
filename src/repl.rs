//! Interactive prompt.
//!
//! Reads lines from stdin and routes each one: slash commands and macros
//! are handled locally, a bare tool name calls that tool directly, and
//! everything else goes to the agent loop.

use crate::agent::Agent;
use crate::error::AgentError;
use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Built-in slash commands and macros: (name, description).
pub const BUILTIN_COMMANDS: &[(&str, &str)] = &[
    ("help", "Show help and available commands"),
    (
        "useful_function_names",
        "Macro to identify main, analyze its callees, and rename functions and variables to friendly, descriptive names",
    ),
    ("save", "Save the conversation transcript as JSON: /save [path]"),
    ("quit", "Leave the session"),
];

const USEFUL_FUNCTION_NAMES_PROMPT: &str = "You are assisting with reverse engineering in Ghidra.
Using the available tools, perform the following steps:
1. Identify the program's main entry function (for example by searching for functions with names containing \"main\" and/or by inspecting the entry point).
2. Decompile the main function and analyze which other functions it calls.
3. For each called function that still has an autogenerated name (for example names like FUN_1400... or similar),
   choose a short, descriptive, and human-friendly name that reflects its purpose
   and rename the function using the appropriate tool.
4. Where helpful, also rename key local variables and parameters in these functions
   to descriptive names that clarify their roles.
5. As you go, set decompiler or disassembly comments in particularly important locations
   to briefly describe non-obvious behavior.
You MUST call the tools directly to carry out these steps instead of only suggesting JSON.
After you have finished, summarize the most important renames and changes you made.
";

/// What a line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Quit,
    Help,
    /// A macro expanded to its full prompt.
    Macro { name: &'static str, prompt: &'static str },
    Save(Option<PathBuf>),
    /// Direct call of a catalogue tool with no arguments.
    DirectTool(String),
    Prompt(String),
}

/// Classify one line of user input against the known tool names.
pub fn parse_input(line: &str, tool_names: &[String]) -> Input {
    let text = line.trim();
    if text.is_empty() {
        return Input::Empty;
    }

    if text == "help" {
        return Input::Help;
    }

    if let Some(command) = text.strip_prefix('/') {
        let mut parts = command.split_whitespace();
        match parts.next().unwrap_or_default() {
            "help" => return Input::Help,
            "quit" | "exit" => return Input::Quit,
            "useful_function_names" => {
                return Input::Macro {
                    name: "useful_function_names",
                    prompt: USEFUL_FUNCTION_NAMES_PROMPT,
                }
            }
            "save" => return Input::Save(parts.next().map(PathBuf::from)),
            // unknown commands fall through to the model
            _ => {}
        }
    }

    let base = text.strip_suffix("()").map(str::trim).unwrap_or(text);
    if tool_names.iter().any(|name| name == base) {
        return Input::DirectTool(base.to_string());
    }

    Input::Prompt(text.to_string())
}

/// Default transcript path: `transcript-<timestamp>.json` in `dir`.
pub fn default_transcript_path(dir: &Path) -> PathBuf {
    dir.join(format!("transcript-{}.json", Utc::now().format("%Y%m%d-%H%M%S")))
}

/// The interactive session.
pub struct Repl {
    agent: Agent,
    transcript_dir: PathBuf,
    show_progress: bool,
}

impl Repl {
    pub fn new(agent: Agent, transcript_dir: PathBuf, show_progress: bool) -> Self {
        Self {
            agent,
            transcript_dir,
            show_progress,
        }
    }

    /// Print the greeting, then read and handle lines until EOF or `/quit`.
    ///
    /// Fails if the tool catalogue cannot be built.
    pub async fn run(&mut self) -> Result<()> {
        // A provider that cannot list its tools ends the session
        let catalogue = self.agent.catalogue().await?;
        if catalogue.is_empty() {
            println!("\nNo tools reported by the Ghidra plugin.");
        } else {
            println!("\nLoaded {} Ghidra tools (callable by the LLM).", catalogue.len());
        }
        let tool_names = catalogue.names();
        println!("\nType \"/help\" for available commands or chat freely with the LLM.\n");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match parse_input(&line, &tool_names) {
                Input::Empty => continue,
                Input::Quit => break,
                Input::Help => self.print_help(&tool_names),
                Input::Macro { name, prompt } => {
                    println!("\n[Macro '/{}' expanded to prompt:]\n", name);
                    println!("{}", prompt);
                    self.ask(prompt).await;
                }
                Input::Save(path) => self.save(path),
                Input::DirectTool(name) => self.call_direct(&name).await,
                Input::Prompt(text) => self.ask(&text).await,
            }
        }

        Ok(())
    }

    /// Run one prompt and print the answer. Errors are reported, not fatal.
    pub async fn ask(&mut self, prompt: &str) {
        match self.ask_once(prompt).await {
            Ok(answer) => println!("\nResponse:\n{}\n", answer),
            Err(AgentError::Cancelled) => println!("\nRequest cancelled.\n"),
            Err(e) => {
                error!("Prompt failed: {}", e);
                println!("\nError: {}\n", e);
            }
        }
    }

    /// Run one prompt with Ctrl-C bound to cancellation of the model call.
    pub async fn ask_once(&mut self, prompt: &str) -> Result<String, AgentError> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let spinner = self.spinner();
        let result = self.agent.run(prompt, &cancel).await;
        watcher.abort();
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        result
    }

    fn spinner(&self) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let spinner = ProgressBar::new_spinner();
        match ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
            Ok(style) => spinner.set_style(style),
            Err(e) => debug!("Spinner template rejected: {}", e),
        }
        spinner.set_message("Waiting for the model (Ctrl-C to cancel)...");
        spinner.enable_steady_tick(Duration::from_millis(120));
        Some(spinner)
    }

    async fn call_direct(&mut self, name: &str) {
        println!("Processing tool '{}' via direct call...", name);
        match self.agent.call_tool(name, Default::default()).await {
            Ok(result) if result.content.is_empty() => {
                println!("\nTool returned no textual output.\n")
            }
            Ok(result) => println!("\nTool output:\n{}\n", result.content),
            Err(e) => println!("\nError: {}\n", e),
        }
    }

    fn save(&self, path: Option<PathBuf>) {
        let path = path.unwrap_or_else(|| default_transcript_path(&self.transcript_dir));
        let model = &self.agent.config().model_name;
        match self.agent.conversation().save_transcript(&path, model) {
            Ok(()) => println!("\nTranscript saved to {}\n", path.display()),
            Err(e) => {
                warn!("Failed to save transcript: {:#}", e);
                println!("\nError: {:#}\n", e);
            }
        }
    }

    fn print_help(&self, tool_names: &[String]) {
        println!("\n=== Ghidra Agent ===");

        if tool_names.is_empty() {
            println!("\nNo tools reported by the Ghidra plugin.");
        } else {
            println!("\nTools available (callable by the LLM, or directly by typing the name):");
            for name in tool_names {
                println!("  - {}", name);
            }
        }

        println!("\nSlash commands:");
        for (name, description) in BUILTIN_COMMANDS {
            println!("  /{} - {}", name, description);
        }

        println!("\nAnything else you type is sent as a natural language prompt to the LLM.\n");
    }
}
