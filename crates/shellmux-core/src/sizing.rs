//! Grid sizing and resize coordination.
//!
//! Turns container pixel sizes into a rows x cols grid and forwards changes
//! to the remote pseudo-terminal. Observations are coalesced over a short
//! window; a forced recompute is available for the first paint after a
//! session becomes ready.

use crate::transport::SessionTransport;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Font size used when nothing else is configured.
pub const DEFAULT_FONT_SIZE: f64 = 14.0;
/// Advance width of a monospace cell relative to the font size
const CELL_WIDTH_RATIO: f64 = 0.6;
/// Line height relative to the font size
const LINE_HEIGHT_RATIO: f64 = 1.2;

/// Pixel dimensions of one terminal cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    pub cell_width: f64,
    pub cell_height: f64,
}

impl FontMetrics {
    pub fn new(cell_width: f64, cell_height: f64) -> Self {
        Self {
            cell_width,
            cell_height,
        }
    }

    /// Approximate cell metrics for a monospace font of `size` pixels.
    pub fn from_font_size(size: f64) -> Self {
        Self {
            cell_width: size * CELL_WIDTH_RATIO,
            cell_height: (size * LINE_HEIGHT_RATIO).ceil(),
        }
    }
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self::from_font_size(DEFAULT_FONT_SIZE)
    }
}

/// Measured container size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

impl ContainerSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Zero or negative along either axis (not laid out yet).
    pub fn is_collapsed(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Addressable terminal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub rows: u16,
    pub cols: u16,
}

impl GridSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Compute the grid that fits in `container`.
///
/// Returns `None` when either dimension comes out non-positive or NaN.
pub fn compute_grid(container: ContainerSize, metrics: FontMetrics) -> Option<GridSize> {
    let cols = (container.width / metrics.cell_width).floor();
    let rows = (container.height / metrics.cell_height).floor();

    // NaN fails both comparisons
    if !(cols >= 1.0 && rows >= 1.0) || cols.is_infinite() || rows.is_infinite() {
        return None;
    }

    Some(GridSize {
        rows: rows.min(u16::MAX as f64) as u16,
        cols: cols.min(u16::MAX as f64) as u16,
    })
}

struct ResizeState {
    session_id: Uuid,
    transport: Arc<dyn SessionTransport>,
    metrics: Mutex<FontMetrics>,
    latest: Mutex<Option<ContainerSize>>,
    last_sent: tokio::sync::Mutex<Option<GridSize>>,
    ready: watch::Receiver<bool>,
}

impl ResizeState {
    fn latest(&self) -> Option<ContainerSize> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics(&self) -> FontMetrics {
        *self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Recompute and forward. `force` skips the unchanged-size check.
    async fn settle(&self, force: bool) -> Result<Option<GridSize>> {
        let Some(container) = self.latest() else {
            return Ok(None);
        };
        if container.is_collapsed() {
            trace!(
                target: "shellmux::resize",
                "Session {} container not laid out ({}x{}), skipping",
                self.session_id, container.width, container.height
            );
            return Ok(None);
        }
        if !*self.ready.borrow() {
            trace!(target: "shellmux::resize", "Session {} not ready, deferring resize", self.session_id);
            return Ok(None);
        }
        let Some(grid) = compute_grid(container, self.metrics()) else {
            return Ok(None);
        };

        let mut last_sent = self.last_sent.lock().await;
        if !force && *last_sent == Some(grid) {
            return Ok(None);
        }

        if let Err(e) = self.transport.resize(self.session_id, grid.rows, grid.cols).await {
            warn!(
                target: "shellmux::resize",
                "Resize of session {} to {} failed: {}",
                self.session_id, grid, e
            );
            return Err(e);
        }

        debug!(target: "shellmux::resize", "Resized session {} to {}", self.session_id, grid);
        *last_sent = Some(grid);
        Ok(Some(grid))
    }
}

/// Keeps one session's remote grid in step with its container.
pub struct ResizeCoordinator {
    state: Arc<ResizeState>,
    observe_tx: mpsc::UnboundedSender<ContainerSize>,
    task: JoinHandle<()>,
}

impl ResizeCoordinator {
    /// Start coordinating `session_id`.
    ///
    /// `ready` gates every resize. When it flips to true a forced recompute
    /// runs without waiting for the debounce window.
    pub fn spawn(
        session_id: Uuid,
        transport: Arc<dyn SessionTransport>,
        metrics: FontMetrics,
        ready: watch::Receiver<bool>,
        debounce: Duration,
    ) -> Self {
        let state = Arc::new(ResizeState {
            session_id,
            transport,
            metrics: Mutex::new(metrics),
            latest: Mutex::new(None),
            last_sent: tokio::sync::Mutex::new(None),
            ready: ready.clone(),
        });
        let (observe_tx, observe_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce_loop(state.clone(), observe_rx, ready, debounce));

        Self {
            state,
            observe_tx,
            task,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.state.session_id
    }

    /// Report a container size change. Settles after the debounce window.
    pub fn observe(&self, size: ContainerSize) {
        *self.state.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(size);
        let _ = self.observe_tx.send(size);
    }

    /// Recompute immediately, bypassing the debounce window and the
    /// unchanged-size check. Still skips collapsed containers and sessions
    /// that are not ready.
    pub async fn force_resize(&self) -> Result<Option<GridSize>> {
        self.state.settle(true).await
    }

    /// Swap font metrics. Takes effect on the next settle.
    pub fn set_font_metrics(&self, metrics: FontMetrics) {
        *self.state.metrics.lock().unwrap_or_else(|e| e.into_inner()) = metrics;
    }

    pub fn font_metrics(&self) -> FontMetrics {
        self.state.metrics()
    }

    /// Last grid forwarded to the remote side.
    pub async fn last_sent(&self) -> Option<GridSize> {
        *self.state.last_sent.lock().await
    }
}

impl Drop for ResizeCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    state: Arc<ResizeState>,
    mut observe_rx: mpsc::UnboundedReceiver<ContainerSize>,
    mut ready: watch::Receiver<bool>,
    window: Duration,
) {
    let mut deadline: Option<Instant> = None;
    let mut ready_open = true;

    loop {
        let at = deadline;
        let sleep = async move {
            match at {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            observed = observe_rx.recv() => match observed {
                // trailing edge: every observation pushes the deadline out
                Some(_) => deadline = Some(Instant::now() + window),
                None => break,
            },
            _ = sleep => {
                deadline = None;
                let _ = state.settle(false).await;
            }
            changed = ready.changed(), if ready_open => {
                if changed.is_err() {
                    ready_open = false;
                    continue;
                }
                if *ready.borrow_and_update() {
                    let _ = state.settle(true).await;
                }
            }
        }
    }
}
