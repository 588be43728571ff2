//! Events broadcast to observers of the multiplexer.

use crate::SessionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A session changed status.
    StatusChanged {
        session_id: Uuid,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// An ephemeral target has no usable secret; the user must re-authenticate.
    CredentialRequired { session_id: Uuid, target_id: String },
    /// The remote session finished its grace period and accepts resizes.
    Ready { session_id: Uuid },
    /// Tracked working directory changed.
    DirectoryChanged { session_id: Uuid, path: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::StatusChanged { session_id, .. }
            | SessionEvent::CredentialRequired { session_id, .. }
            | SessionEvent::Ready { session_id }
            | SessionEvent::DirectoryChanged { session_id, .. } => *session_id,
        }
    }
}
