//! CLI configuration.

use anyhow::Result;
use serde::Deserialize;
use shellmux_core::{FontMetrics, HistoryLog, MultiplexerConfig, RuleSource};
use shellmux_types::{HighlightAssignment, HighlightRuleDef, HighlightStyle};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub highlight: HighlightConfig,
}

/// `[terminal]` timing and font settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    /// Explicit cell size in pixels; derived from `font_size` when unset
    #[serde(default)]
    pub cell_width: Option<f64>,
    #[serde(default)]
    pub cell_height: Option<f64>,
    #[serde(default = "default_ready_grace_ms")]
    pub ready_grace_ms: u64,
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
    #[serde(default = "default_tracking_debounce_ms")]
    pub tracking_debounce_ms: u64,
    #[serde(default)]
    pub track_directory: bool,
}

fn default_font_size() -> f64 {
    shellmux_core::DEFAULT_FONT_SIZE
}

fn default_ready_grace_ms() -> u64 {
    300
}

fn default_resize_debounce_ms() -> u64 {
    100
}

fn default_tracking_debounce_ms() -> u64 {
    600
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            cell_width: None,
            cell_height: None,
            ready_grace_ms: default_ready_grace_ms(),
            resize_debounce_ms: default_resize_debounce_ms(),
            tracking_debounce_ms: default_tracking_debounce_ms(),
            track_directory: false,
        }
    }
}

impl TerminalConfig {
    pub fn font_metrics(&self) -> FontMetrics {
        let derived = FontMetrics::from_font_size(self.font_size);
        FontMetrics::new(
            self.cell_width.unwrap_or(derived.cell_width),
            self.cell_height.unwrap_or(derived.cell_height),
        )
    }
}

/// `[history]` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_capture")]
    pub capture: bool,
}

fn default_capture() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            capture: default_capture(),
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(HistoryLog::default_path)
    }
}

/// A named group of rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetConfig {
    pub id: String,
    #[serde(default)]
    pub rules: Vec<HighlightRuleDef>,
}

/// `[highlight]` tables: styles, rule sets and their target assignments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HighlightConfig {
    #[serde(default)]
    pub styles: Vec<HighlightStyle>,
    #[serde(default)]
    pub sets: Vec<RuleSetConfig>,
    #[serde(default)]
    pub assignments: Vec<HighlightAssignment>,
}

impl RuleSource for HighlightConfig {
    fn assignments(&self) -> Vec<HighlightAssignment> {
        self.assignments.clone()
    }

    fn rules_in_set(&self, set_id: &str) -> Vec<HighlightRuleDef> {
        self.sets
            .iter()
            .find(|s| s.id == set_id)
            .map(|s| s.rules.clone())
            .unwrap_or_default()
    }

    fn styles(&self) -> Vec<HighlightStyle> {
        self.styles.clone()
    }

    // loaded once; never changes
    fn revision(&self) -> u64 {
        0
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from default location (config/default.toml) or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        Ok(Config::default())
    }

    /// Session settings for a [`Multiplexer`](shellmux_core::Multiplexer).
    ///
    /// The offline tools never open sessions; `shellmux settings` prints this
    /// and embedders pass it to `Multiplexer::new`.
    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            ready_grace: Duration::from_millis(self.terminal.ready_grace_ms),
            resize_debounce: Duration::from_millis(self.terminal.resize_debounce_ms),
            tracking_debounce: Duration::from_millis(self.terminal.tracking_debounce_ms),
            capture_commands: self.history.capture,
            track_directory: self.terminal.track_directory,
            font: self.terminal.font_metrics(),
        }
    }
}
