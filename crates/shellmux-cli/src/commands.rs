//! Offline tools built on the core: stdin highlighter, rule listing, grid
//! calculator, history viewer and settings dump.

use anyhow::Result;
use shellmux_core::{
    compute_grid, ContainerSize, FontMetrics, HighlightPipeline, MultiplexerConfig, Utf8Stream,
    ANSI_RESET,
};
use shellmux_types::CommandRecord;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 8 * 1024;

/// Copy `input` to `output` through `pipeline`, one read at a time.
///
/// Each chunk is highlighted and flushed as soon as it arrives. Returns the
/// number of input bytes consumed.
pub async fn highlight_stream<R, W>(
    pipeline: &HighlightPipeline,
    mut input: R,
    mut output: W,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = Utf8Stream::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0;

    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n;

        let text = decoder.decode(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        output.write_all(pipeline.apply(&text).as_bytes()).await?;
        output.flush().await?;
    }

    if let Some(tail) = decoder.finish() {
        output.write_all(tail.as_bytes()).await?;
    }
    output.flush().await?;

    tracing::debug!(target: "shellmux::highlight", "Highlighted {} bytes", total);
    Ok(total)
}

/// One line per rule, highest priority first, with the pattern in its own color.
pub fn describe_rules(pipeline: &HighlightPipeline) -> Vec<String> {
    pipeline
        .rules()
        .iter()
        .map(|rule| {
            format!(
                "{:>5}  {}{}{}",
                rule.priority, rule.ansi_start, rule.pattern, ANSI_RESET
            )
        })
        .collect()
}

pub fn describe_grid(width: f64, height: f64, metrics: FontMetrics) -> String {
    match compute_grid(ContainerSize::new(width, height), metrics) {
        Some(grid) => format!("{} rows x {} cols", grid.rows, grid.cols),
        None => format!(
            "{}x{} px is too small for a {}x{} px cell",
            width, height, metrics.cell_width, metrics.cell_height
        ),
    }
}

pub fn describe_history(records: &[CommandRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            format!(
                "{}  {:<7}  {:<16}  {}",
                r.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                r.source.as_str(),
                r.target_id,
                r.command
            )
        })
        .collect()
}

/// The session settings an embedding multiplexer would be built with.
pub fn describe_settings(config: &MultiplexerConfig) -> Vec<String> {
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    vec![
        format!("ready grace        {} ms", config.ready_grace.as_millis()),
        format!("resize debounce    {} ms", config.resize_debounce.as_millis()),
        format!("tracking debounce  {} ms", config.tracking_debounce.as_millis()),
        format!("command capture    {}", on_off(config.capture_commands)),
        format!("directory tracking {}", on_off(config.track_directory)),
        format!(
            "cell size          {}x{} px",
            config.font.cell_width, config.font.cell_height
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shellmux_types::{CommandSource, HighlightRuleDef, HighlightStyle};
    use std::time::Duration;

    fn pipeline() -> HighlightPipeline {
        let styles = vec![HighlightStyle {
            id: "red".to_string(),
            name: "Red".to_string(),
            foreground: Some("#ff0000".to_string()),
            background: None,
        }];
        let defs = vec![
            HighlightRuleDef {
                id: "warn".to_string(),
                pattern: "WARN".to_string(),
                is_regex: false,
                case_sensitive: true,
                priority: 1,
                style_id: "red".to_string(),
                enabled: true,
            },
            HighlightRuleDef {
                id: "fail".to_string(),
                pattern: "FAIL".to_string(),
                is_regex: false,
                case_sensitive: true,
                priority: 9,
                style_id: "red".to_string(),
                enabled: true,
            },
        ];
        HighlightPipeline::from_defs(&defs, &styles)
    }

    #[tokio::test]
    async fn test_highlight_stream_keeps_split_characters_whole() {
        let bytes = "FAIL: ü\n".as_bytes();
        let split = bytes.len() - 2;
        let input = tokio_test::io::Builder::new()
            .read(&bytes[..split])
            .read(&bytes[split..])
            .build();
        let mut out = Vec::new();

        let n = highlight_stream(&pipeline(), input, &mut out).await.unwrap();

        assert_eq!(n, bytes.len());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\x1b[38;2;255;0;0mFAIL\x1b[0m: ü\n"
        );
    }

    #[tokio::test]
    async fn test_highlight_stream_flushes_dangling_byte() {
        let input: &[u8] = b"ok \xe6";
        let mut out = Vec::new();
        highlight_stream(&HighlightPipeline::passthrough(), input, &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ok \u{FFFD}");
    }

    #[test]
    fn test_describe_rules_priority_order() {
        let lines = describe_rules(&pipeline());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("FAIL"));
        assert!(lines[0].trim_start().starts_with('9'));
        assert!(lines[1].ends_with("WARN\x1b[0m"));
    }

    #[test]
    fn test_describe_grid() {
        let metrics = FontMetrics::new(8.0, 16.0);
        assert_eq!(describe_grid(800.0, 600.0, metrics), "37 rows x 100 cols");
        assert!(describe_grid(4.0, 600.0, metrics).contains("too small"));
    }

    #[test]
    fn test_describe_history() {
        let record = CommandRecord {
            target_id: "web".to_string(),
            command: "ls -la".to_string(),
            source: CommandSource::Snippet,
            recorded_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap(),
        };
        let lines = describe_history(&[record]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("2025-03-01 12:30:00  snippet"));
        assert!(lines[0].ends_with("ls -la"));
    }

    #[test]
    fn test_describe_settings() {
        let config = MultiplexerConfig {
            resize_debounce: Duration::from_millis(40),
            capture_commands: false,
            track_directory: true,
            font: FontMetrics::new(9.0, 18.0),
            ..MultiplexerConfig::default()
        };
        let lines = describe_settings(&config);
        assert_eq!(lines.len(), 6);
        assert!(lines[0].ends_with("300 ms"));
        assert!(lines[1].ends_with("40 ms"));
        assert!(lines[3].ends_with("off"));
        assert!(lines[4].ends_with("on"));
        assert!(lines[5].ends_with("9x18 px"));
    }
}
