//! Remote targets and connection parameters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a target obtains its credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Stored server entry. The transport resolves its auth itself.
    #[default]
    Saved,
    /// Ephemeral target whose password is handed over once, out of band.
    QuickConnect,
}

/// A remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

fn default_port() -> u16 {
    22
}

impl Target {
    pub fn is_ephemeral(&self) -> bool {
        self.kind == TargetKind::QuickConnect
    }
}

/// A plaintext secret that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Parameters handed to the transport's `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectParams {
    /// Connect a saved target by reference.
    Saved { session_id: Uuid, target_id: String },
    /// Connect with inline parameters.
    Inline {
        session_id: Uuid,
        host: String,
        port: u16,
        username: String,
        password: Option<Secret>,
        private_key: Option<String>,
        passphrase: Option<String>,
    },
}

impl ConnectParams {
    /// Build parameters for `target`, attaching `password` for ephemeral targets.
    pub fn for_target(session_id: Uuid, target: &Target, password: Option<Secret>) -> Self {
        match target.kind {
            TargetKind::Saved => ConnectParams::Saved {
                session_id,
                target_id: target.id.clone(),
            },
            TargetKind::QuickConnect => ConnectParams::Inline {
                session_id,
                host: target.host.clone(),
                port: target.port,
                username: target.username.clone(),
                password,
                private_key: target.private_key.clone(),
                passphrase: target.passphrase.clone(),
            },
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            ConnectParams::Saved { session_id, .. } | ConnectParams::Inline { session_id, .. } => {
                *session_id
            }
        }
    }
}
