//! Logging setup for the `shellmux` binary.
//!
//! Everything goes to stderr; stdout belongs to the command output. The base
//! level comes from `-q`/`-v` counts, the area a subcommand exercises gets one
//! extra level of detail, and `--log area=level` pins individual areas.
//! `RUST_LOG` replaces all of it when set.

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ROOT: &str = "shellmux";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub level: Level,
    /// Area names under `shellmux::`, e.g. `resize`.
    pub overrides: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl LogConfig {
    /// `-q` wins over any number of `-v`.
    pub fn new(verbosity: u8, quiet: bool, format: LogFormat) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbosity {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        Self {
            level,
            overrides: Vec::new(),
            format,
        }
    }

    /// Log `area` one level more verbosely than the base.
    pub fn focus(mut self, area: &str) -> Self {
        if self.level != Level::ERROR {
            self.overrides.push((area.to_string(), more_verbose(self.level)));
        }
        self
    }

    /// Apply `area=level` specs, comma separated or repeated. Later specs win.
    pub fn with_overrides(mut self, specs: &[String]) -> Result<Self, String> {
        for part in specs.iter().flat_map(|s| s.split(',')) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (area, level) = part
                .split_once('=')
                .ok_or_else(|| format!("expected AREA=LEVEL, got '{}'", part))?;
            let level: Level = level
                .trim()
                .parse()
                .map_err(|_| format!("unknown level '{}' for {}", level.trim(), area))?;
            let area = area.trim();
            let area = area.strip_prefix("shellmux::").unwrap_or(area);
            self.overrides.push((area.to_string(), level));
        }
        Ok(self)
    }

    /// Filter directives, e.g. `shellmux=warn,shellmux::resize=debug`.
    pub fn directives(&self) -> String {
        let mut directives = vec![format!("{}={}", ROOT, self.level)];
        for (area, level) in &self.overrides {
            directives.push(format!("{}::{}={}", ROOT, area, level));
        }
        directives.join(",").to_lowercase()
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

fn more_verbose(level: Level) -> Level {
    match level {
        Level::ERROR => Level::WARN,
        Level::WARN => Level::INFO,
        Level::INFO => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn init(config: &LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .without_time()
                    .with_target(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            )
            .init(),
    }
}
