//! Shellmux - offline tools for the terminal multiplexer core.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use shellmux_cli::{commands, config, logging};
use shellmux_core::{HighlightRegistry, HistoryLog};
use shellmux_types::GLOBAL_TARGET;
use std::path::PathBuf;
use std::sync::Arc;

use config::Config;
use logging::{LogConfig, LogFormat};

/// Shellmux - terminal session multiplexer tools.
#[derive(Parser, Debug)]
#[command(name = "shellmux")]
#[command(about = "Highlighting, sizing and history tools for Shellmux sessions")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// More log detail; repeat for debug (-vv) and trace (-vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Per-area log level, e.g. "resize=debug"; comma separated or repeated
    #[arg(long = "log", value_name = "AREA=LEVEL", global = true)]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Highlight stdin to stdout using the rules assigned to a target
    Highlight {
        #[arg(short, long, default_value = GLOBAL_TARGET)]
        target: String,
    },
    /// List the rules that apply to a target, highest priority first
    Rules {
        #[arg(short, long, default_value = GLOBAL_TARGET)]
        target: String,
    },
    /// Terminal grid for a container size in pixels
    Grid {
        #[arg(long)]
        width: f64,
        #[arg(long)]
        height: f64,
    },
    /// Show recorded commands, newest first
    History {
        #[arg(short, long)]
        target: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Print the session settings the loaded configuration produces
    Settings,
}

impl Command {
    /// Log area whose detail is raised while this command runs.
    fn log_area(&self) -> &'static str {
        match self {
            Command::Highlight { .. } | Command::Rules { .. } => "highlight",
            Command::Grid { .. } => "resize",
            Command::History { .. } => "history",
            Command::Settings => "startup",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::new(cli.verbose, cli.quiet, cli.log_format)
        .focus(cli.command.log_area())
        .with_overrides(&cli.log_overrides)
        .map_err(anyhow::Error::msg)?;
    logging::init(&log_config);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::info!(
        target: "shellmux::startup",
        "Loaded configuration ({} rule sets, {} styles)",
        config.highlight.sets.len(),
        config.highlight.styles.len()
    );

    match cli.command {
        Command::Highlight { target } => {
            let registry = HighlightRegistry::new(Arc::new(config.highlight));
            let pipeline = registry.pipeline_for(&target);
            commands::highlight_stream(&pipeline, tokio::io::stdin(), tokio::io::stdout()).await?;
        }
        Command::Rules { target } => {
            let registry = HighlightRegistry::new(Arc::new(config.highlight));
            let pipeline = registry.pipeline_for(&target);
            if pipeline.is_empty() {
                println!("No rules apply to {}", target);
            }
            for line in commands::describe_rules(&pipeline) {
                println!("{}", line);
            }
        }
        Command::Grid { width, height } => {
            println!(
                "{}",
                commands::describe_grid(width, height, config.terminal.font_metrics())
            );
        }
        Command::History { target, limit } => {
            let log = HistoryLog::open(config.history.resolved_path()).await?;
            let records = match target {
                Some(target) => log.by_target(&target).into_iter().take(limit).collect(),
                None => log.entries(Some(limit)),
            };
            for line in commands::describe_history(&records) {
                println!("{}", line);
            }
        }
        Command::Settings => {
            for line in commands::describe_settings(&config.multiplexer_config()) {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
