//! Per-session connection lifecycle.
//!
//! Every session in the store is mounted once per `(session id, connect
//! epoch)`. A mount resolves credentials, subscribes to the session's output,
//! issues the connect call and flips the session's ready flag. Reconciling
//! against the store tears down mounts whose epoch moved or whose session was
//! disposed, then mounts whatever is new.
//!
//! Results that arrive after a mount was torn down are dropped: each mount
//! carries an `alive` flag and status writes also check that the stored epoch
//! still matches.

use crate::capture::CommandCapture;
use crate::highlight::HighlightRegistry;
use crate::multiplexer::MultiplexerConfig;
use crate::sizing::ResizeCoordinator;
use crate::store::TabSessionStore;
use crate::stream::Utf8Stream;
use crate::targets::TargetDirectory;
use crate::tracking::{DirectoryTracker, TitleScanner};
use crate::transport::{OutputBus, OutputSubscription, RenderSurface, SessionTransport};
use crate::vault::CredentialVault;
use crate::{Result, ShellmuxError};
use dashmap::DashMap;
use shellmux_types::{ConnectParams, SessionEvent, SessionStatus, Target};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Shown when an ephemeral target has no credential left.
pub const AUTH_EXPIRED_BANNER: &str = "\r\n\x1b[33m[Auth]\x1b[0m Session expired.\r\n";

/// Output kept for a session with no surface attached.
const MAX_BACKLOG: usize = 256 * 1024;

pub fn failure_banner(message: &str) -> String {
    format!("\r\n\x1b[31mConnection failed: {}\x1b[0m\r\n", message)
}

pub(crate) type SharedStore = Arc<RwLock<TabSessionStore>>;

/// External collaborators used by connections.
#[derive(Clone)]
pub struct ConnectorDeps {
    pub transport: Arc<dyn SessionTransport>,
    pub bus: Arc<OutputBus>,
    pub vault: Arc<CredentialVault>,
    pub capture: Arc<CommandCapture>,
    pub highlights: Arc<HighlightRegistry>,
    pub targets: Arc<dyn TargetDirectory>,
}

#[derive(Default)]
struct SurfaceSlot {
    surface: Option<Arc<dyn RenderSurface>>,
    backlog: String,
}

/// State that outlives individual connect attempts of one session.
pub(crate) struct SessionSlot {
    ready_tx: watch::Sender<bool>,
    surface: Mutex<SurfaceSlot>,
    resize: Arc<ResizeCoordinator>,
    tracker: Option<DirectoryTracker>,
}

impl SessionSlot {
    fn write(&self, text: &str) {
        let mut slot = self.surface.lock().unwrap_or_else(|e| e.into_inner());
        match &slot.surface {
            Some(surface) => surface.write(text),
            None => {
                slot.backlog.push_str(text);
                if slot.backlog.len() > MAX_BACKLOG {
                    let mut cut = slot.backlog.len() - MAX_BACKLOG;
                    while !slot.backlog.is_char_boundary(cut) {
                        cut += 1;
                    }
                    slot.backlog.drain(..cut);
                }
            }
        }
    }

    fn attach(&self, surface: Arc<dyn RenderSurface>) {
        let mut slot = self.surface.lock().unwrap_or_else(|e| e.into_inner());
        let backlog = std::mem::take(&mut slot.backlog);
        if !backlog.is_empty() {
            surface.write(&backlog);
        }
        slot.surface = Some(surface);
    }

    fn detach(&self) {
        self.surface.lock().unwrap_or_else(|e| e.into_inner()).surface = None;
    }

    fn set_ready(&self, ready: bool) {
        self.ready_tx.send_replace(ready);
    }
}

struct Mount {
    epoch: u64,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Drives the external connection of every session in the store.
pub struct SessionConnector {
    deps: ConnectorDeps,
    config: MultiplexerConfig,
    store: SharedStore,
    events: broadcast::Sender<SessionEvent>,
    mounts: tokio::sync::Mutex<HashMap<Uuid, Mount>>,
    slots: DashMap<Uuid, Arc<SessionSlot>>,
}

impl SessionConnector {
    pub(crate) fn new(
        deps: ConnectorDeps,
        config: MultiplexerConfig,
        store: SharedStore,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            deps,
            config,
            store,
            events,
            mounts: tokio::sync::Mutex::new(HashMap::new()),
            slots: DashMap::new(),
        }
    }

    pub fn deps(&self) -> &ConnectorDeps {
        &self.deps
    }

    /// Bring mounts in line with the store.
    pub async fn reconcile(&self) {
        // snapshot under the mounts lock so a newer snapshot is never
        // overwritten by an older one
        let mut mounts = self.mounts.lock().await;
        let desired: HashMap<Uuid, (u64, String)> = {
            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
            store
                .sessions()
                .map(|s| (s.id, (s.connect_epoch, s.target_id.clone())))
                .collect()
        };

        let stale: Vec<Uuid> = mounts
            .iter()
            .filter(|(id, mount)| desired.get(*id).map(|(epoch, _)| *epoch) != Some(mount.epoch))
            .map(|(id, _)| *id)
            .collect();
        for session_id in stale {
            if let Some(mount) = mounts.remove(&session_id) {
                self.teardown(session_id, mount).await;
            }
        }

        for (session_id, (epoch, target_id)) in desired {
            if mounts.contains_key(&session_id) {
                continue;
            }
            let mount = self.mount(session_id, epoch, target_id);
            mounts.insert(session_id, mount);
        }
    }

    fn mount(&self, session_id: Uuid, epoch: u64, target_id: String) -> Mount {
        debug!(
            target: "shellmux::connector",
            "Mounting session {} (epoch {}) for target {}",
            session_id, epoch, target_id
        );

        let alive = Arc::new(AtomicBool::new(true));
        let ctx = MountContext {
            session_id,
            epoch,
            target_id,
            alive: alive.clone(),
            deps: self.deps.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            slot: self.ensure_slot(session_id),
            ready_grace: self.config.ready_grace,
        };
        let task = tokio::spawn(run_mount(ctx));

        Mount { epoch, alive, task }
    }

    async fn teardown(&self, session_id: Uuid, mount: Mount) {
        mount.alive.store(false, Ordering::SeqCst);
        mount.task.abort();

        if let Some(slot) = self.slots.get(&session_id) {
            slot.set_ready(false);
        }
        self.deps.capture.reset(session_id);

        let referenced = self
            .store
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_referenced(session_id);
        if referenced {
            debug!(
                target: "shellmux::connector",
                "Released session {} epoch {}",
                session_id, mount.epoch
            );
            return;
        }

        self.slots.remove(&session_id);
        match self.deps.transport.disconnect(session_id).await {
            Ok(()) => info!(target: "shellmux::connector", "Disconnected session {}", session_id),
            Err(e) => warn!(
                target: "shellmux::connector",
                "Disconnect of session {} failed: {}",
                session_id, e
            ),
        }
    }

    fn ensure_slot(&self, session_id: Uuid) -> Arc<SessionSlot> {
        self.slots
            .entry(session_id)
            .or_insert_with(|| Arc::new(self.new_slot(session_id)))
            .clone()
    }

    fn new_slot(&self, session_id: Uuid) -> SessionSlot {
        let (ready_tx, ready_rx) = watch::channel(false);
        let resize = Arc::new(ResizeCoordinator::spawn(
            session_id,
            self.deps.transport.clone(),
            self.config.font,
            ready_rx,
            self.config.resize_debounce,
        ));

        let tracker = if self.config.track_directory {
            self.target_of(session_id)
                .ok()
                .and_then(|target_id| self.deps.targets.target(&target_id))
                .map(|target| {
                    DirectoryTracker::spawn(
                        session_id,
                        target.username,
                        self.deps.transport.clone(),
                        self.events.clone(),
                        self.config.tracking_debounce,
                    )
                })
        } else {
            None
        };

        SessionSlot {
            ready_tx,
            surface: Mutex::new(SurfaceSlot::default()),
            resize,
            tracker,
        }
    }

    fn existing_slot(&self, session_id: Uuid) -> Result<Arc<SessionSlot>> {
        self.target_of(session_id)?;
        Ok(self.ensure_slot(session_id))
    }

    fn target_of(&self, session_id: Uuid) -> Result<String> {
        self.store
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session(session_id)
            .map(|s| s.target_id.clone())
            .ok_or(ShellmuxError::SessionNotFound(session_id))
    }

    /// Route a session's output to `surface`, replaying anything that
    /// arrived before a surface was attached.
    pub fn attach_surface(&self, session_id: Uuid, surface: Arc<dyn RenderSurface>) -> Result<()> {
        self.existing_slot(session_id)?.attach(surface);
        Ok(())
    }

    /// Stop rendering a session. Output is buffered until the next attach.
    pub fn detach_surface(&self, session_id: Uuid) {
        if let Some(slot) = self.slots.get(&session_id) {
            slot.detach();
        }
    }

    pub fn resize_coordinator(&self, session_id: Uuid) -> Result<Arc<ResizeCoordinator>> {
        Ok(self.existing_slot(session_id)?.resize.clone())
    }

    /// Whether the session finished connecting and its grace period passed.
    pub fn is_ready(&self, session_id: Uuid) -> bool {
        self.slots
            .get(&session_id)
            .map(|slot| *slot.ready_tx.borrow())
            .unwrap_or(false)
    }

    /// Working directory reported by the session's shell, if tracked.
    pub fn current_directory(&self, session_id: Uuid) -> Option<String> {
        self.slots
            .get(&session_id)
            .and_then(|slot| slot.tracker.as_ref().and_then(|t| t.current_path()))
    }

    /// Forward keystrokes to the remote side and feed command capture.
    ///
    /// Capture sees the input whether or not the write succeeds; a write
    /// error is still returned.
    pub async fn send_input(&self, session_id: Uuid, data: &str) -> Result<()> {
        let target_id = self.target_of(session_id)?;
        let (written, ()) = tokio::join!(
            self.deps.transport.write(session_id, data.as_bytes()),
            self.deps.capture.capture(session_id, &target_id, data),
        );
        if let Err(e) = &written {
            warn!(target: "shellmux::connector", "Write to session {} failed: {}", session_id, e);
        }
        written
    }
}

/// Everything a mount task needs, owned.
struct MountContext {
    session_id: Uuid,
    epoch: u64,
    target_id: String,
    alive: Arc<AtomicBool>,
    deps: ConnectorDeps,
    store: SharedStore,
    events: broadcast::Sender<SessionEvent>,
    slot: Arc<SessionSlot>,
    ready_grace: std::time::Duration,
}

impl MountContext {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Apply a status for this mount's epoch. Returns false if the mount is
    /// stale or the transition was rejected.
    fn set_status(&self, status: SessionStatus, message: Option<String>) -> bool {
        if !self.is_alive() {
            return false;
        }

        let applied = {
            let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
            match store.session(self.session_id) {
                Some(session) if session.connect_epoch == self.epoch => {}
                _ => return false,
            }
            match (&status, &message) {
                (SessionStatus::Error, Some(message)) => store.fail(self.session_id, message.clone()),
                _ => store.update_status(self.session_id, status),
            }
        };

        match applied {
            Ok(()) => {
                self.emit(SessionEvent::StatusChanged {
                    session_id: self.session_id,
                    status,
                    message,
                });
                true
            }
            Err(e) => {
                debug!(target: "shellmux::connector", "Ignoring status for session {}: {}", self.session_id, e);
                false
            }
        }
    }

    fn banner(&self, text: &str) {
        if self.is_alive() {
            self.slot.write(text);
        }
    }

    fn require_credential(&self, target: &Target) {
        self.emit(SessionEvent::CredentialRequired {
            session_id: self.session_id,
            target_id: target.id.clone(),
        });
    }
}

async fn run_mount(ctx: MountContext) {
    let session_id = ctx.session_id;
    if !ctx.set_status(SessionStatus::Connecting, None) {
        return;
    }

    let Some(target) = ctx.deps.targets.target(&ctx.target_id) else {
        let err = ShellmuxError::TargetNotFound(ctx.target_id.clone());
        warn!(target: "shellmux::connector", "Session {}: {}", session_id, err);
        ctx.banner(&failure_banner(&err.detail()));
        ctx.set_status(SessionStatus::Error, Some(err.detail()));
        return;
    };

    let secret = if target.is_ephemeral() {
        match ctx.deps.vault.consume(&target.id) {
            Some(secret) => Some(secret),
            None => {
                let err = ShellmuxError::CredentialExpired(target.id.clone());
                warn!(target: "shellmux::connector", "Session {}: {}", session_id, err);
                ctx.banner(AUTH_EXPIRED_BANNER);
                if ctx.set_status(SessionStatus::Error, Some(err.detail())) {
                    ctx.require_credential(&target);
                }
                return;
            }
        }
    } else {
        None
    };

    let subscription = ctx.deps.bus.subscribe(session_id);
    let mut pump = PumpGuard(tokio::spawn(pump_output(
        subscription,
        ctx.slot.clone(),
        ctx.deps.highlights.clone(),
        target.id.clone(),
        ctx.alive.clone(),
    )));

    let params = ConnectParams::for_target(session_id, &target, secret);
    let result = ctx.deps.transport.connect(params).await;
    if !ctx.is_alive() {
        debug!(
            target: "shellmux::connector",
            "Discarding connect result for stale session {} epoch {}",
            session_id, ctx.epoch
        );
        return;
    }

    match result {
        Ok(()) => {
            if !ctx.set_status(SessionStatus::Connected, None) {
                return;
            }
            info!(target: "shellmux::connector", "Session {} connected to {}", session_id, target.id);

            tokio::time::sleep(ctx.ready_grace).await;
            if !ctx.is_alive() {
                return;
            }
            ctx.slot.set_ready(true);
            ctx.emit(SessionEvent::Ready { session_id });
        }
        Err(e) => {
            warn!(target: "shellmux::connector", "Session {} failed to connect: {}", session_id, e);
            ctx.banner(&failure_banner(&e.detail()));
            if ctx.set_status(SessionStatus::Error, Some(e.detail()))
                && e.is_auth_failure()
                && target.is_ephemeral()
            {
                ctx.require_credential(&target);
            }
        }
    }

    // keep output flowing until this mount is torn down
    let _ = (&mut pump.0).await;
}

/// Aborts the pump when the owning mount task goes away.
struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Decode, highlight and render one session's output in arrival order.
async fn pump_output(
    mut subscription: OutputSubscription,
    slot: Arc<SessionSlot>,
    highlights: Arc<HighlightRegistry>,
    target_id: String,
    alive: Arc<AtomicBool>,
) {
    let mut decoder = Utf8Stream::new();
    let mut titles = TitleScanner::new();

    while let Some(chunk) = subscription.recv().await {
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        let text = decoder.decode(&chunk);
        if text.is_empty() {
            continue;
        }

        if let Some(tracker) = &slot.tracker {
            for title in titles.scan(&text) {
                tracker.observe_title(title);
            }
        }

        let pipeline = highlights.pipeline_for(&target_id);
        slot.write(&pipeline.apply(&text));
    }

    trace!(
        target: "shellmux::connector",
        "Output stream for session {} closed",
        subscription.session_id()
    );
}
