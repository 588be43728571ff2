//! Seams to the remote transport, the inbound event stream and the render surface.

use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use shellmux_types::ConnectParams;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Capability surface of the native connection layer.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn connect(&self, params: ConnectParams) -> Result<()>;

    async fn write(&self, session_id: Uuid, data: &[u8]) -> Result<()>;

    async fn resize(&self, session_id: Uuid, rows: u16, cols: u16) -> Result<()>;

    async fn disconnect(&self, session_id: Uuid) -> Result<()>;

    async fn check_is_directory(&self, session_id: Uuid, path: &str) -> Result<bool>;
}

/// Where highlighted output ends up (a terminal view).
pub trait RenderSurface: Send + Sync {
    fn write(&self, text: &str);
}

/// Keyed stream of raw output chunks, fed by the transport.
///
/// One subscriber per session. Chunks are delivered in publish order.
#[derive(Default)]
pub struct OutputBus {
    routes: Arc<DashMap<Uuid, Route>>,
    next_token: AtomicU64,
}

struct Route {
    token: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutputBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a session's output, replacing any previous subscriber.
    pub fn subscribe(&self, session_id: Uuid) -> OutputSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.routes.insert(session_id, Route { token, tx });
        OutputSubscription {
            session_id,
            token,
            rx,
            routes: self.routes.clone(),
        }
    }

    /// Push a chunk for `session_id`. Returns false if nobody is listening.
    pub fn publish(&self, session_id: Uuid, data: impl Into<Vec<u8>>) -> bool {
        let delivered = self
            .routes
            .get(&session_id)
            .map(|route| route.tx.send(data.into()).is_ok())
            .unwrap_or(false);
        if !delivered {
            trace!(target: "shellmux::connector", "Dropped output for unsubscribed session {}", session_id);
        }
        delivered
    }

    pub fn is_subscribed(&self, session_id: Uuid) -> bool {
        self.routes.contains_key(&session_id)
    }
}

/// Receiving end of an [`OutputBus`] route. Unsubscribes on drop.
pub struct OutputSubscription {
    session_id: Uuid,
    token: u64,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    routes: Arc<DashMap<Uuid, Route>>,
}

impl OutputSubscription {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Drop for OutputSubscription {
    fn drop(&mut self) {
        // A newer subscription for the same session must survive.
        self.routes
            .remove_if(&self.session_id, |_, route| route.token == self.token);
    }
}
