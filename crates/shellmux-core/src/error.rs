//! Error types for Shellmux.

use shellmux_types::{InvalidTransition, SessionStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ShellmuxError {
    #[error("Tab not found: {0}")]
    TabNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Invalid session state: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// An ephemeral target has no pending secret. Needs re-authentication,
    /// not a retry.
    #[error("Credential expired for target {0}")]
    CredentialExpired(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid highlight pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<InvalidTransition> for ShellmuxError {
    fn from(err: InvalidTransition) -> Self {
        ShellmuxError::InvalidTransition {
            from: err.from,
            to: err.to,
        }
    }
}

impl ShellmuxError {
    /// Transport messages that mean the remote rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ShellmuxError::Transport(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("auth failed") || lower.contains("denied")
            }
            _ => false,
        }
    }

    /// Message without the variant prefix, for banners shown in the terminal.
    pub fn detail(&self) -> String {
        match self {
            ShellmuxError::Transport(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
