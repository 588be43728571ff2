//! Tab and session table.
//!
//! The single source of truth for which tabs exist, which sessions they own
//! and what state each session is in. All mutation goes through the methods
//! here; connectors observe the result by `(session id, connect epoch)`.

use crate::{Result, ShellmuxError};
use shellmux_types::{ServerRef, Session, SessionStatus, Tab, TabKind};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

/// Millisecond timestamps that never repeat or go backwards.
#[derive(Debug, Default)]
struct EpochClock {
    last: u64,
}

impl EpochClock {
    fn next(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last = now.max(self.last + 1);
        self.last
    }
}

/// Result of opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedSession {
    pub tab_id: Uuid,
    pub session_id: Uuid,
}

/// Owns all tabs and sessions.
#[derive(Debug)]
pub struct TabSessionStore {
    tabs: Vec<Tab>,
    sessions: HashMap<Uuid, Session>,
    active_tab: Uuid,
    broadcast: bool,
    clock: EpochClock,
}

impl Default for TabSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TabSessionStore {
    /// A store holding a single active placeholder tab.
    pub fn new() -> Self {
        let placeholder = Tab::placeholder();
        Self {
            active_tab: placeholder.id,
            tabs: vec![placeholder],
            sessions: HashMap::new(),
            broadcast: false,
            clock: EpochClock::default(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, tab_id: Uuid) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    pub fn active_tab_id(&self) -> Uuid {
        self.active_tab
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.tab(self.active_tab)
    }

    pub fn session(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Whether any tab still owns `session_id`.
    pub fn is_referenced(&self, session_id: Uuid) -> bool {
        self.tabs.iter().any(|t| t.owns(session_id))
    }

    pub fn tab_of(&self, session_id: Uuid) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.owns(session_id))
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    fn tab_index(&self, tab_id: Uuid) -> Result<usize> {
        self.tabs
            .iter()
            .position(|t| t.id == tab_id)
            .ok_or(ShellmuxError::TabNotFound(tab_id))
    }

    // ------------------------------------------------------------------
    // Tab lifecycle
    // ------------------------------------------------------------------

    /// Append an empty placeholder tab and activate it.
    pub fn new_tab(&mut self) -> Uuid {
        let tab = Tab::placeholder();
        let id = tab.id;
        self.tabs.push(tab);
        self.active_tab = id;
        id
    }

    /// Open a session to `server`.
    ///
    /// If the active tab is a placeholder it is replaced in place (same id,
    /// still active). Otherwise a new tab is appended and activated.
    pub fn create_connection(&mut self, server: ServerRef) -> OpenedSession {
        let session_id = Uuid::new_v4();
        let session = Session {
            id: session_id,
            target_id: server.target_id.clone(),
            display_name: server.name.clone(),
            status: SessionStatus::Connecting,
            connect_epoch: self.clock.next(),
            last_error: None,
        };
        self.sessions.insert(session_id, session);

        let title = if server.name.is_empty() {
            server.target_id.clone()
        } else {
            server.name.clone()
        };

        let replace_at = self
            .tabs
            .iter()
            .position(|t| t.id == self.active_tab && t.is_placeholder());

        let tab_id = match replace_at {
            Some(index) => {
                let tab = &mut self.tabs[index];
                tab.title = title;
                tab.kind = TabKind::Session;
                tab.session_ids = vec![session_id];
                tab.host = server.host;
                tab.id
            }
            None => {
                let tab = Tab {
                    id: Uuid::new_v4(),
                    title,
                    kind: TabKind::Session,
                    session_ids: vec![session_id],
                    host: server.host,
                };
                let id = tab.id;
                self.tabs.push(tab);
                self.active_tab = id;
                id
            }
        };

        info!(
            target: "shellmux::store",
            "Opened session {} to target {} in tab {}",
            session_id, server.target_id, tab_id
        );
        OpenedSession { tab_id, session_id }
    }

    /// Close a tab and dispose its sessions. Returns the removed session ids.
    ///
    /// If the closed tab was active, its left neighbour (or the first tab)
    /// becomes active. Closing the last tab leaves a fresh placeholder.
    pub fn close(&mut self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let index = self.tab_index(tab_id)?;
        let tab = self.tabs.remove(index);
        let removed = self.dispose(&tab.session_ids);

        if self.tabs.is_empty() {
            let placeholder = Tab::placeholder();
            self.active_tab = placeholder.id;
            self.tabs.push(placeholder);
        } else if self.active_tab == tab_id {
            self.active_tab = self.tabs[index.saturating_sub(1)].id;
        }

        debug!(target: "shellmux::store", "Closed tab {} ({} sessions)", tab_id, removed.len());
        Ok(removed)
    }

    /// Keep only `tab_id`, which becomes active.
    pub fn close_others(&mut self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let index = self.tab_index(tab_id)?;
        let keep = self.tabs.swap_remove(index);
        let doomed: Vec<Uuid> = self
            .tabs
            .drain(..)
            .flat_map(|t| t.session_ids)
            .collect();
        let removed = self.dispose(&doomed);

        self.active_tab = keep.id;
        self.tabs.push(keep);
        Ok(removed)
    }

    /// Close everything, leaving one active placeholder.
    pub fn close_all(&mut self) -> Vec<Uuid> {
        let removed: Vec<Uuid> = self.sessions.keys().copied().collect();
        self.sessions.clear();

        let placeholder = Tab::placeholder();
        self.active_tab = placeholder.id;
        self.tabs = vec![placeholder];
        removed
    }

    pub fn set_active(&mut self, tab_id: Uuid) -> Result<()> {
        self.tab_index(tab_id)?;
        self.active_tab = tab_id;
        Ok(())
    }

    pub fn rename(&mut self, tab_id: Uuid, title: impl Into<String>) -> Result<()> {
        let index = self.tab_index(tab_id)?;
        self.tabs[index].title = title.into();
        Ok(())
    }

    pub fn toggle_broadcast(&mut self) -> bool {
        self.broadcast = !self.broadcast;
        self.broadcast
    }

    // ------------------------------------------------------------------
    // Split view
    // ------------------------------------------------------------------

    /// Open a second session to the same target as the tab's first session.
    ///
    /// Returns `None` for tabs without sessions.
    pub fn split(&mut self, tab_id: Uuid) -> Result<Option<Uuid>> {
        let index = self.tab_index(tab_id)?;
        let Some(source) = self.tabs[index]
            .session_ids
            .first()
            .and_then(|id| self.sessions.get(id))
            .cloned()
        else {
            return Ok(None);
        };

        let session_id = Uuid::new_v4();
        self.sessions.insert(
            session_id,
            Session {
                id: session_id,
                status: SessionStatus::Connecting,
                connect_epoch: self.clock.next(),
                last_error: None,
                ..source
            },
        );
        self.tabs[index].session_ids.push(session_id);
        debug!(target: "shellmux::store", "Split tab {} with session {}", tab_id, session_id);
        Ok(Some(session_id))
    }

    /// Drop every session but the first. Returns the removed session ids.
    pub fn unsplit(&mut self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let index = self.tab_index(tab_id)?;
        let tab = &mut self.tabs[index];
        if tab.session_ids.len() <= 1 {
            return Ok(Vec::new());
        }
        let doomed = tab.session_ids.split_off(1);
        Ok(self.dispose(&doomed))
    }

    // ------------------------------------------------------------------
    // Session status
    // ------------------------------------------------------------------

    /// Mark every session of the tab as connecting and bump its epoch.
    /// Returns the affected session ids.
    pub fn reconnect(&mut self, tab_id: Uuid) -> Result<Vec<Uuid>> {
        let index = self.tab_index(tab_id)?;
        let ids = self.tabs[index].session_ids.clone();
        for id in &ids {
            self.reconnect_session(*id)?;
        }
        Ok(ids)
    }

    /// Reconnect a single session. Returns its new epoch.
    pub fn reconnect_session(&mut self, session_id: Uuid) -> Result<u64> {
        let epoch = self.clock.next();
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ShellmuxError::SessionNotFound(session_id))?;
        session.status = SessionStatus::Connecting;
        session.connect_epoch = epoch;
        session.last_error = None;
        Ok(epoch)
    }

    /// Apply a status change along an allowed edge.
    ///
    /// Entering `Connecting` from another state needs a new epoch, so it is
    /// only possible through [`reconnect_session`](Self::reconnect_session).
    pub fn update_status(&mut self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(ShellmuxError::SessionNotFound(session_id))?;
        if status == SessionStatus::Connecting && session.status != SessionStatus::Connecting {
            return Err(ShellmuxError::InvalidTransition {
                from: session.status,
                to: status,
            });
        }
        session.status = session.status.transition(status)?;
        Ok(())
    }

    /// Mark a session as failed with the transport's message.
    pub fn fail(&mut self, session_id: Uuid, message: impl Into<String>) -> Result<()> {
        self.update_status(session_id, SessionStatus::Error)?;
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.last_error = Some(message.into());
        }
        Ok(())
    }

    fn dispose(&mut self, session_ids: &[Uuid]) -> Vec<Uuid> {
        session_ids
            .iter()
            .filter(|id| self.sessions.remove(id).is_some())
            .copied()
            .collect()
    }
}
