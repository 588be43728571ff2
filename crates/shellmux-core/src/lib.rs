//! Tab/session multiplexing core for Shellmux.

mod capture;
mod connector;
mod error;
mod highlight;
mod history;
mod multiplexer;
mod sizing;
mod store;
mod stream;
mod targets;
mod tracking;
mod transport;
mod vault;

pub use capture::{CommandBuffer, CommandCapture};
pub use connector::{failure_banner, ConnectorDeps, SessionConnector, AUTH_EXPIRED_BANNER};
pub use error::ShellmuxError;
pub use highlight::{
    compile_rules, hex_to_ansi, resolve_rules, style_prefix, CompiledRule, HighlightPipeline,
    HighlightRegistry, MemoryRuleSource, RuleSource, ANSI_RESET,
};
pub use history::{HistoryLog, HistorySink, MemoryHistory};
pub use multiplexer::{Multiplexer, MultiplexerConfig};
pub use sizing::{compute_grid, ContainerSize, FontMetrics, GridSize, ResizeCoordinator, DEFAULT_FONT_SIZE};
pub use store::{OpenedSession, TabSessionStore};
pub use stream::Utf8Stream;
pub use targets::{TargetDirectory, TargetRegistry};
pub use tracking::{detect_path, DirectoryTracker, TitleScanner};
pub use transport::{OutputBus, OutputSubscription, RenderSurface, SessionTransport};
pub use vault::CredentialVault;

/// Result type for Shellmux operations.
pub type Result<T> = std::result::Result<T, ShellmuxError>;
