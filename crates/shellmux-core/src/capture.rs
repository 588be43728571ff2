//! Best-effort reconstruction of typed commands from keystrokes.
//!
//! This is a heuristic, not a line editor: cursor movement, pastes and edits
//! driven by escape sequences are not modeled.

use crate::history::HistorySink;
use shellmux_types::CommandSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const ENTER: char = '\r';
const BACKSPACE: char = '\x7f';

/// Characters typed since the last Enter.
#[derive(Debug, Default, Clone)]
pub struct CommandBuffer {
    buffer: String,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed outbound input. Returns commands completed by Enter, trimmed and non-empty.
    pub fn feed(&mut self, data: &str) -> Vec<String> {
        let mut completed = Vec::new();
        for ch in data.chars() {
            match ch {
                ENTER => {
                    let command = self.buffer.trim();
                    if !command.is_empty() {
                        completed.push(command.to_string());
                    }
                    self.buffer.clear();
                }
                BACKSPACE => {
                    self.buffer.pop();
                }
                c if (c as u32) >= 32 => self.buffer.push(c),
                _ => {}
            }
        }
        completed
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// One [`CommandBuffer`] per session, flushing completed lines to a history sink.
pub struct CommandCapture {
    buffers: Mutex<HashMap<Uuid, CommandBuffer>>,
    sink: Arc<dyn HistorySink>,
    enabled: bool,
}

impl CommandCapture {
    pub fn new(sink: Arc<dyn HistorySink>, enabled: bool) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            sink,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Feed outbound input for a session and record any completed commands.
    pub async fn capture(&self, session_id: Uuid, target_id: &str, data: &str) {
        if !self.enabled {
            return;
        }
        let completed = {
            let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
            buffers.entry(session_id).or_default().feed(data)
        };
        for command in completed {
            self.record(target_id, &command, CommandSource::User).await;
        }
    }

    /// Record a command that was sent whole rather than typed.
    pub async fn record(&self, target_id: &str, command: &str, source: CommandSource) {
        if !self.enabled {
            return;
        }
        debug!(target: "shellmux::capture", "Recording {} command for target {}", source.as_str(), target_id);
        if let Err(e) = self.sink.record_command(target_id, command, source).await {
            warn!(target: "shellmux::capture", "Failed to record command for target {}: {}", target_id, e);
        }
    }

    /// Current partial line of a session.
    pub fn pending(&self, session_id: Uuid) -> String {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers
            .get(&session_id)
            .map(|b| b.as_str().to_string())
            .unwrap_or_default()
    }

    /// Drop a session's buffer (teardown).
    pub fn reset(&self, session_id: Uuid) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;

    #[test]
    fn test_enter_flushes_trimmed_line() {
        let mut buffer = CommandBuffer::new();
        assert!(buffer.feed("  ls -la ").is_empty());
        assert_eq!(buffer.feed("\r"), vec!["ls -la".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_backspace_drops_last_char() {
        let mut buffer = CommandBuffer::new();
        assert_eq!(buffer.feed("lss\x7f\r"), vec!["ls".to_string()]);
    }

    #[test]
    fn test_backspace_on_empty_buffer() {
        let mut buffer = CommandBuffer::new();
        assert!(buffer.feed("\x7f\x7f").is_empty());
        assert_eq!(buffer.as_str(), "");
    }

    #[test]
    fn test_blank_line_not_recorded() {
        let mut buffer = CommandBuffer::new();
        assert!(buffer.feed("   \r\r").is_empty());
    }

    #[test]
    fn test_control_characters_ignored() {
        let mut buffer = CommandBuffer::new();
        assert_eq!(buffer.feed("p\x03wd\r"), vec!["pwd".to_string()]);
    }

    #[test]
    fn test_multiple_commands_in_one_write() {
        let mut buffer = CommandBuffer::new();
        assert_eq!(
            buffer.feed("cd /tmp\rls\r"),
            vec!["cd /tmp".to_string(), "ls".to_string()]
        );
    }

    #[tokio::test]
    async fn test_capture_records_once_per_enter() {
        let sink = Arc::new(MemoryHistory::new());
        let capture = CommandCapture::new(sink.clone(), true);
        let session = Uuid::new_v4();

        for ch in "ls -la".chars() {
            capture.capture(session, "srv", &ch.to_string()).await;
        }
        capture.capture(session, "srv", "\r").await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "ls -la");
        assert_eq!(records[0].target_id, "srv");
        assert_eq!(records[0].source, CommandSource::User);
        assert_eq!(capture.pending(session), "");
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let sink = Arc::new(MemoryHistory::new());
        let capture = CommandCapture::new(sink.clone(), true);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        capture.capture(a, "srv", "top").await;
        capture.capture(b, "srv", "df").await;
        capture.reset(a);
        capture.capture(b, "srv", "\r").await;

        assert_eq!(capture.pending(a), "");
        assert_eq!(sink.records()[0].command, "df");
    }

    #[tokio::test]
    async fn test_disabled_capture_records_nothing() {
        let sink = Arc::new(MemoryHistory::new());
        let capture = CommandCapture::new(sink.clone(), false);
        capture.capture(Uuid::new_v4(), "srv", "ls\r").await;
        assert!(sink.records().is_empty());
    }
}
