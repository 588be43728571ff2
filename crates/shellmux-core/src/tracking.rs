//! Working-directory tracking from terminal titles.
//!
//! Shells commonly put the working directory in the window title
//! (`user@host: ~/src`). Titles are pulled out of OSC 0/2 sequences in the
//! output stream, debounced, and checked against the remote filesystem
//! before the tracked path changes.

use crate::transport::SessionTransport;
use once_cell::sync::Lazy;
use regex::Regex;
use shellmux_types::SessionEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

static TITLE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?::\s*)?((?:/|~)[a-zA-Z0-9_\-./]*)").unwrap()
});

/// Unterminated title sequences longer than this are dropped.
const MAX_TITLE_LEN: usize = 4096;

/// Extract a directory path from a window title.
///
/// A leading `~` expands to `/root` for root and `/home/<user>` otherwise.
pub fn detect_path(title: &str, username: &str) -> Option<String> {
    let found = TITLE_PATH.captures(title)?.get(1)?.as_str().trim();
    if found.is_empty() {
        return None;
    }

    match found.strip_prefix('~') {
        Some(rest) => {
            let home = if username == "root" {
                "/root".to_string()
            } else {
                format!("/home/{}", username)
            };
            Some(format!("{}{}", home, rest))
        }
        None => Some(found.to_string()),
    }
}

/// Pulls OSC 0 and OSC 2 titles out of a text stream.
///
/// Sequences may be split across chunks.
#[derive(Debug, Default)]
pub struct TitleScanner {
    pending: String,
}

impl TitleScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded output, returning completed titles in order.
    pub fn scan(&mut self, text: &str) -> Vec<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(text);

        let mut titles = Vec::new();
        let mut cursor = 0;
        while let Some(offset) = buf[cursor..].find("\x1b]") {
            let start = cursor + offset;
            let body_start = start + 2;
            let Some((body_end, term_len)) = find_terminator(&buf[body_start..]) else {
                if buf.len() - start <= MAX_TITLE_LEN {
                    self.pending = buf[start..].to_string();
                }
                return titles;
            };

            let body = &buf[body_start..body_start + body_end];
            if let Some((code, title)) = body.split_once(';') {
                if code == "0" || code == "2" {
                    titles.push(title.to_string());
                }
            }
            cursor = body_start + body_end + term_len;
        }

        if buf.ends_with('\x1b') {
            self.pending.push('\x1b');
        }
        titles
    }
}

/// Position and length of the first BEL or ST.
fn find_terminator(body: &str) -> Option<(usize, usize)> {
    let bel = body.find('\x07');
    let st = body.find("\x1b\\");
    match (bel, st) {
        (Some(b), Some(s)) if s < b => Some((s, 2)),
        (Some(b), _) => Some((b, 1)),
        (None, Some(s)) => Some((s, 2)),
        (None, None) => None,
    }
}

/// Follows one session's working directory.
pub struct DirectoryTracker {
    title_tx: mpsc::UnboundedSender<String>,
    current: Arc<Mutex<Option<String>>>,
    task: JoinHandle<()>,
}

impl DirectoryTracker {
    pub fn spawn(
        session_id: Uuid,
        username: String,
        transport: Arc<dyn SessionTransport>,
        events: broadcast::Sender<SessionEvent>,
        debounce: Duration,
    ) -> Self {
        let (title_tx, mut title_rx) = mpsc::unbounded_channel::<String>();
        let current = Arc::new(Mutex::new(None));
        let tracked = current.clone();

        let task = tokio::spawn(async move {
            let mut latest: Option<String> = None;
            loop {
                let waiting = latest.is_some();
                tokio::select! {
                    title = title_rx.recv() => match title {
                        Some(title) => latest = Some(title),
                        None => break,
                    },
                    _ = tokio::time::sleep(debounce), if waiting => {
                        let Some(title) = latest.take() else { continue };
                        let Some(path) = detect_path(&title, &username) else { continue };

                        let unchanged = tracked
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .as_deref()
                            == Some(path.as_str());
                        if unchanged {
                            continue;
                        }

                        match transport.check_is_directory(session_id, &path).await {
                            Ok(true) => {
                                debug!(target: "shellmux::tracking", "Session {} moved to {}", session_id, path);
                                *tracked.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.clone());
                                let _ = events.send(SessionEvent::DirectoryChanged { session_id, path });
                            }
                            Ok(false) => {}
                            Err(e) => trace!(target: "shellmux::tracking", "Directory check failed: {}", e),
                        }
                    }
                }
            }
        });

        Self {
            title_tx,
            current,
            task,
        }
    }

    /// Report a new window title. Only the last title inside the debounce
    /// window is considered.
    pub fn observe_title(&self, title: impl Into<String>) {
        let _ = self.title_tx.send(title.into());
    }

    pub fn current_path(&self) -> Option<String> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Drop for DirectoryTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_absolute_path() {
        assert_eq!(
            detect_path("deploy@web: /var/log/nginx", "deploy").as_deref(),
            Some("/var/log/nginx")
        );
    }

    #[test]
    fn test_detect_home_expansion() {
        assert_eq!(detect_path("user@host: ~/src", "alice").as_deref(), Some("/home/alice/src"));
        assert_eq!(detect_path("root@host: ~", "root").as_deref(), Some("/root"));
    }

    #[test]
    fn test_detect_no_path() {
        assert_eq!(detect_path("vim", "alice"), None);
    }

    #[test]
    fn test_scan_bel_and_st_titles() {
        let mut scanner = TitleScanner::new();
        let titles = scanner.scan("a\x1b]0;one\x07b\x1b]2;two\x1b\\c\x1b]1;icon\x07");
        assert_eq!(titles, vec!["one", "two"]);
    }

    #[test]
    fn test_scan_split_sequence() {
        let mut scanner = TitleScanner::new();
        assert!(scanner.scan("prompt\x1b").is_empty());
        assert!(scanner.scan("]0;user@host: ~/w").is_empty());
        assert_eq!(scanner.scan("ork\x07$ "), vec!["user@host: ~/work"]);
        assert!(scanner.scan("plain").is_empty());
    }
}
