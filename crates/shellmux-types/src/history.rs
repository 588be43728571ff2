//! Command history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a recorded command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    /// Reconstructed from keystrokes.
    #[default]
    User,
    /// Sent from the command bar or a snippet.
    Snippet,
}

impl CommandSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandSource::User => "user",
            CommandSource::Snippet => "snippet",
        }
    }
}

/// One recorded command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub target_id: String,
    pub command: String,
    #[serde(default)]
    pub source: CommandSource,
    pub recorded_at: DateTime<Utc>,
}

impl CommandRecord {
    pub fn new(target_id: impl Into<String>, command: impl Into<String>, source: CommandSource) -> Self {
        Self {
            target_id: target_id.into(),
            command: command.into(),
            source,
            recorded_at: Utc::now(),
        }
    }
}
