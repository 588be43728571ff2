//! Tab and session types and the session status state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Connection status of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// The remote session is live.
    Connected,
    /// The session was closed or torn down.
    Disconnected,
    /// The last connection attempt failed.
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        }
    }

    /// Whether `self -> next` is an allowed edge.
    ///
    /// Staying in the same state is always allowed and treated as a no-op.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Connecting)
                | (Connected, Disconnected)
                | (Error, Connecting)
                | (Disconnected, Connecting)
        )
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: SessionStatus) -> Result<SessionStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One remote session shown inside a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Remote endpoint this session connects to.
    pub target_id: String,
    pub display_name: String,
    pub status: SessionStatus,
    /// Re-synchronization key. Bumped on every reconnect so observers keyed
    /// on `(id, connect_epoch)` rebuild their subscriptions.
    pub connect_epoch: u64,
    /// Raw message of the last transport failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What a tab shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabKind {
    /// Empty landing tab with no sessions.
    Placeholder,
    /// Tab owning one or more sessions.
    Session,
}

/// A tab in the tab strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: Uuid,
    pub title: String,
    pub kind: TabKind,
    /// Owned sessions in display order. More than one only under split view.
    pub session_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Tab {
    pub const PLACEHOLDER_TITLE: &'static str = "Home";

    /// Fresh placeholder tab.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: Self::PLACEHOLDER_TITLE.to_string(),
            kind: TabKind::Placeholder,
            session_ids: Vec::new(),
            host: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == TabKind::Placeholder
    }

    pub fn is_split(&self) -> bool {
        self.session_ids.len() > 1
    }

    pub fn owns(&self, session_id: Uuid) -> bool {
        self.session_ids.contains(&session_id)
    }
}

/// Reference to a target used when opening a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    pub target_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl ServerRef {
    pub fn new(target_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}
