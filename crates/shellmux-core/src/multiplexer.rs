//! Facade binding the tab/session store to live connections.

use crate::capture::CommandCapture;
use crate::connector::{ConnectorDeps, SessionConnector, SharedStore};
use crate::highlight::{HighlightRegistry, RuleSource};
use crate::history::HistorySink;
use crate::sizing::{FontMetrics, ResizeCoordinator};
use crate::store::{OpenedSession, TabSessionStore};
use crate::targets::TargetDirectory;
use crate::transport::{OutputBus, RenderSurface, SessionTransport};
use crate::vault::CredentialVault;
use crate::{Result, ShellmuxError};
use shellmux_types::{CommandSource, Secret, ServerRef, Session, SessionEvent, SessionStatus, Tab};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the multiplexer.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Delay between a successful connect and the session counting as ready
    pub ready_grace: Duration,
    pub resize_debounce: Duration,
    pub tracking_debounce: Duration,
    /// Record typed commands to the history sink
    pub capture_commands: bool,
    /// Follow the shell's working directory through window titles
    pub track_directory: bool,
    pub font: FontMetrics,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            ready_grace: Duration::from_millis(300),
            resize_debounce: Duration::from_millis(100),
            tracking_debounce: Duration::from_millis(600),
            capture_commands: true,
            track_directory: false,
            font: FontMetrics::default(),
        }
    }
}

/// Owns the tab/session table and keeps one connection per session in step
/// with it.
///
/// Every mutating operation updates the store first and then reconciles
/// connections, so callers never touch connectors directly.
pub struct Multiplexer {
    store: SharedStore,
    connector: SessionConnector,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Multiplexer {
    pub fn new(
        config: MultiplexerConfig,
        transport: Arc<dyn SessionTransport>,
        bus: Arc<OutputBus>,
        targets: Arc<dyn TargetDirectory>,
        rules: Arc<dyn RuleSource>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let store: SharedStore = Arc::new(RwLock::new(TabSessionStore::new()));

        let deps = ConnectorDeps {
            transport,
            bus,
            vault: Arc::new(CredentialVault::new()),
            capture: Arc::new(CommandCapture::new(history, config.capture_commands)),
            highlights: Arc::new(HighlightRegistry::new(rules)),
            targets,
        };
        let connector = SessionConnector::new(deps, config, store.clone(), event_tx.clone());

        Self {
            store,
            connector,
            event_tx,
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.connector.deps().vault
    }

    pub fn output_bus(&self) -> &Arc<OutputBus> {
        &self.connector.deps().bus
    }

    pub fn highlights(&self) -> &Arc<HighlightRegistry> {
        &self.connector.deps().highlights
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Run `f` against the store under its read lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&TabSessionStore) -> R) -> R {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        f(&store)
    }

    pub fn tabs(&self) -> Vec<Tab> {
        self.with_store(|s| s.tabs().to_vec())
    }

    pub fn active_tab(&self) -> Option<Tab> {
        self.with_store(|s| s.active_tab().cloned())
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.with_store(|s| s.session(session_id).cloned())
    }

    pub fn is_broadcast(&self) -> bool {
        self.with_store(|s| s.is_broadcast())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut TabSessionStore) -> R) -> R {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        f(&mut store)
    }

    // ------------------------------------------------------------------
    // Tab lifecycle
    // ------------------------------------------------------------------

    pub async fn create_connection(&self, server: ServerRef) -> OpenedSession {
        let opened = self.mutate(|s| s.create_connection(server));
        self.connector.reconcile().await;
        opened
    }

    pub fn new_tab(&self) -> Uuid {
        self.mutate(|s| s.new_tab())
    }

    pub async fn close(&self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let removed = self.mutate(|s| s.close(tab_id))?;
        self.connector.reconcile().await;
        Ok(removed)
    }

    pub async fn close_others(&self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let removed = self.mutate(|s| s.close_others(tab_id))?;
        self.connector.reconcile().await;
        Ok(removed)
    }

    pub async fn close_all(&self) -> Vec<Uuid> {
        let removed = self.mutate(|s| s.close_all());
        self.connector.reconcile().await;
        removed
    }

    pub fn set_active(&self, tab_id: Uuid) -> Result<()> {
        self.mutate(|s| s.set_active(tab_id))
    }

    pub fn rename(&self, tab_id: Uuid, title: impl Into<String>) -> Result<()> {
        self.mutate(|s| s.rename(tab_id, title))
    }

    pub fn toggle_broadcast(&self) -> bool {
        let enabled = self.mutate(|s| s.toggle_broadcast());
        info!(target: "shellmux::store", "Broadcast mode {}", if enabled { "on" } else { "off" });
        enabled
    }

    pub async fn split(&self, tab_id: Uuid) -> Result<Option<Uuid>> {
        let added = self.mutate(|s| s.split(tab_id))?;
        self.connector.reconcile().await;
        Ok(added)
    }

    pub async fn unsplit(&self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let removed = self.mutate(|s| s.unsplit(tab_id))?;
        self.connector.reconcile().await;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Session status
    // ------------------------------------------------------------------

    pub async fn reconnect(&self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let sessions = self.mutate(|s| s.reconnect(tab_id))?;
        self.connector.reconcile().await;
        Ok(sessions)
    }

    pub async fn reconnect_session(&self, session_id: Uuid) -> Result<()> {
        self.mutate(|s| s.reconnect_session(session_id))?;
        self.connector.reconcile().await;
        Ok(())
    }

    /// Apply a status reported from outside the connector, e.g. the remote
    /// side closing the connection. Use [`reconnect_session`](Self::reconnect_session)
    /// to go back to `Connecting`.
    pub fn update_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        self.mutate(|s| s.update_status(session_id, status))?;
        let _ = self.event_tx.send(SessionEvent::StatusChanged {
            session_id,
            status,
            message: None,
        });
        Ok(())
    }

    /// Hand a secret to a session that asked for one and reconnect it.
    pub async fn provide_credential(&self, session_id: Uuid, secret: Secret) -> Result<()> {
        let target_id = self
            .session(session_id)
            .map(|s| s.target_id)
            .ok_or(ShellmuxError::SessionNotFound(session_id))?;
        self.vault().store(target_id, secret);
        self.reconnect_session(session_id).await
    }

    // ------------------------------------------------------------------
    // Rendering and input
    // ------------------------------------------------------------------

    pub fn attach_surface(&self, session_id: Uuid, surface: Arc<dyn RenderSurface>) -> Result<()> {
        self.connector.attach_surface(session_id, surface)
    }

    pub fn detach_surface(&self, session_id: Uuid) {
        self.connector.detach_surface(session_id)
    }

    pub fn resize_coordinator(&self, session_id: Uuid) -> Result<Arc<ResizeCoordinator>> {
        self.connector.resize_coordinator(session_id)
    }

    pub fn is_ready(&self, session_id: Uuid) -> bool {
        self.connector.is_ready(session_id)
    }

    pub fn current_directory(&self, session_id: Uuid) -> Option<String> {
        self.connector.current_directory(session_id)
    }

    /// Forward typed input to one session.
    pub async fn send_input(&self, session_id: Uuid, data: &str) -> Result<()> {
        self.connector.send_input(session_id, data).await
    }

    /// Send a whole command line to the active tab.
    ///
    /// Goes to the tab's first session, or to all of its sessions in
    /// broadcast mode. Returns how many sessions were written to.
    pub async fn send_command(&self, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(0);
        }

        let targets: Vec<(Uuid, String)> = self.with_store(|s| {
            let Some(tab) = s.active_tab() else {
                return Vec::new();
            };
            let count = if s.is_broadcast() { tab.session_ids.len() } else { 1 };
            tab.session_ids
                .iter()
                .take(count)
                .filter_map(|id| s.session(*id).map(|session| (*id, session.target_id.clone())))
                .collect()
        });

        let payload = format!("{}\r", text);
        let transport = &self.connector.deps().transport;
        let capture = &self.connector.deps().capture;

        let mut written = 0;
        let mut first_error = None;
        let mut recorded = HashSet::new();
        for (session_id, target_id) in targets {
            match transport.write(session_id, payload.as_bytes()).await {
                Ok(()) => {
                    written += 1;
                    if recorded.insert(target_id.clone()) {
                        capture.record(&target_id, text, CommandSource::Snippet).await;
                    }
                }
                Err(e) => {
                    warn!(target: "shellmux::connector", "Failed to send command to session {}: {}", session_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    pub async fn check_is_directory(&self, session_id: Uuid, path: &str) -> Result<bool> {
        self.connector
            .deps()
            .transport
            .check_is_directory(session_id, path)
            .await
    }

    /// Close every tab and disconnect all sessions.
    pub async fn shutdown(&self) {
        let removed = self.close_all().await;
        info!(target: "shellmux::store", "Shut down {} sessions", removed.len());
    }
}
