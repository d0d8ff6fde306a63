//! Append-only conversation log.
//!
//! The full log is sent to the backend on every round, so turns are never
//! edited or removed once recorded.

use crate::models::{Role, ToolResult, Turn};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Ordered log of turns.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::system(content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, turn: Turn) {
        debug_assert_eq!(turn.role, Role::Assistant);
        self.turns.push(turn);
    }

    /// Record tool output in request order. Must directly follow the
    /// assistant turn that requested the tools.
    pub fn push_tool_results(&mut self, results: &[ToolResult]) {
        debug_assert!(self
            .turns
            .last()
            .is_some_and(|t| t.role == Role::Assistant && t.has_tool_calls()));
        self.turns.extend(results.iter().map(Turn::tool));
    }

    /// Write the transcript as pretty JSON.
    pub fn save_transcript(&self, path: &Path, model: &str) -> Result<()> {
        let transcript = Transcript {
            model,
            saved_at: Utc::now(),
            turns: &self.turns,
        };

        let json = serde_json::to_string_pretty(&transcript)
            .context("Failed to serialize transcript")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;

        Ok(())
    }
}

#[derive(Serialize)]
struct Transcript<'a> {
    model: &'a str,
    saved_at: DateTime<Utc>,
    turns: &'a [Turn],
}
