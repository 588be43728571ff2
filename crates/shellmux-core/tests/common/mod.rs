//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use shellmux_core::{
    FontMetrics, MemoryHistory, MemoryRuleSource, Multiplexer, MultiplexerConfig, OutputBus,
    RenderSurface, Result, SessionTransport, ShellmuxError, TargetRegistry,
};
use shellmux_types::{ConnectParams, SessionEvent, Target, TargetKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A call made against the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(ConnectParams),
    Write(Uuid, String),
    Resize(Uuid, u16, u16),
    Disconnect(Uuid),
    CheckDir(Uuid, String),
}

/// Scripted result of one connect call.
#[derive(Debug, Clone, Default)]
pub struct ConnectOutcome {
    pub delay: Duration,
    pub error: Option<String>,
}

impl ConnectOutcome {
    pub fn fail(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            error: Some(message.to_string()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory transport that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    failing_writes: Mutex<HashSet<Uuid>>,
    directories: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the outcome of the next connect call. Unscripted calls succeed.
    pub fn script_connect(&self, outcome: ConnectOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn fail_writes_to(&self, session_id: Uuid) {
        self.failing_writes.lock().unwrap().insert(session_id);
    }

    pub fn add_directory(&self, path: &str) {
        self.directories.lock().unwrap().insert(path.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connects_for(&self, session_id: Uuid) -> Vec<ConnectParams> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Connect(params) if params.session_id() == session_id => Some(params),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> Vec<Uuid> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Disconnect(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Resize(_, rows, cols) => Some((rows, cols)),
                _ => None,
            })
            .collect()
    }

    pub fn writes_to(&self, session_id: Uuid) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(id, data) if id == session_id => Some(data),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn connect(&self, params: ConnectParams) -> Result<()> {
        self.record(Call::Connect(params));
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or_default();
        if !outcome.delay.is_zero() {
            tokio::time::sleep(outcome.delay).await;
        }
        match outcome.error {
            Some(message) => Err(ShellmuxError::Transport(message)),
            None => Ok(()),
        }
    }

    async fn write(&self, session_id: Uuid, data: &[u8]) -> Result<()> {
        self.record(Call::Write(session_id, String::from_utf8_lossy(data).into_owned()));
        if self.failing_writes.lock().unwrap().contains(&session_id) {
            return Err(ShellmuxError::Transport("broken pipe".to_string()));
        }
        Ok(())
    }

    async fn resize(&self, session_id: Uuid, rows: u16, cols: u16) -> Result<()> {
        self.record(Call::Resize(session_id, rows, cols));
        Ok(())
    }

    async fn disconnect(&self, session_id: Uuid) -> Result<()> {
        self.record(Call::Disconnect(session_id));
        Ok(())
    }

    async fn check_is_directory(&self, session_id: Uuid, path: &str) -> Result<bool> {
        self.record(Call::CheckDir(session_id, path.to_string()));
        Ok(self.directories.lock().unwrap().contains(path))
    }
}

/// Render surface that keeps everything written to it.
#[derive(Default)]
pub struct RecordingSurface {
    text: Mutex<String>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn text(&self) -> String {
        self.text.lock().unwrap().clone()
    }
}

impl RenderSurface for RecordingSurface {
    fn write(&self, text: &str) {
        self.text.lock().unwrap().push_str(text);
    }
}

pub fn saved_target(id: &str) -> Target {
    Target {
        id: id.to_string(),
        name: format!("{} server", id),
        host: format!("{}.example.com", id),
        port: 22,
        username: "deploy".to_string(),
        kind: TargetKind::Saved,
        private_key: None,
        passphrase: None,
    }
}

pub fn quick_target(id: &str) -> Target {
    Target {
        kind: TargetKind::QuickConnect,
        ..saved_target(id)
    }
}

/// A multiplexer wired to recording collaborators.
pub struct Harness {
    pub mux: Multiplexer,
    pub transport: Arc<RecordingTransport>,
    pub rules: Arc<MemoryRuleSource>,
    pub history: Arc<MemoryHistory>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn new(targets: Vec<Target>) -> Self {
        Self::with_config(targets, test_config())
    }

    pub fn with_config(targets: Vec<Target>, config: MultiplexerConfig) -> Self {
        let transport = RecordingTransport::new();
        let rules = Arc::new(MemoryRuleSource::new());
        let history = Arc::new(MemoryHistory::new());
        let registry: TargetRegistry = targets.into_iter().collect();

        let mux = Multiplexer::new(
            config,
            transport.clone(),
            Arc::new(OutputBus::new()),
            Arc::new(registry),
            rules.clone(),
            history.clone(),
        );
        let events = mux.subscribe();

        Self {
            mux,
            transport,
            rules,
            history,
            events,
        }
    }

    /// Events received so far.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Default timings with an 8x16 px cell.
pub fn test_config() -> MultiplexerConfig {
    MultiplexerConfig {
        font: FontMetrics::new(8.0, 16.0),
        ..MultiplexerConfig::default()
    }
}

/// Let spawned tasks run and the paused clock advance.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn count_by_session(ids: &[Uuid]) -> HashMap<Uuid, usize> {
    let mut counts = HashMap::new();
    for id in ids {
        *counts.entry(*id).or_insert(0) += 1;
    }
    counts
}
