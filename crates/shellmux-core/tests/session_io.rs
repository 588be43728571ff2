//! Output, input and resize paths of live sessions.

mod common;

use common::*;
use shellmux_core::{ContainerSize, GridSize, MultiplexerConfig};
use shellmux_types::{
    CommandSource, HighlightRuleDef, HighlightStyle, ServerRef, SessionEvent, GLOBAL_TARGET,
};

fn red_errors(h: &Harness) {
    h.rules.put_style(HighlightStyle {
        id: "red".to_string(),
        name: "Red".to_string(),
        foreground: Some("#ff0000".to_string()),
        background: None,
    });
    h.rules.put_rule_set(
        "default",
        vec![HighlightRuleDef {
            id: "err".to_string(),
            pattern: "ERROR".to_string(),
            is_regex: false,
            case_sensitive: true,
            priority: 10,
            style_id: "red".to_string(),
            enabled: true,
        }],
    );
    h.rules.assign(GLOBAL_TARGET, "default");
}

#[tokio::test(start_paused = true)]
async fn test_output_is_highlighted_in_arrival_order() {
    let h = Harness::new(vec![saved_target("web")]);
    red_errors(&h);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    let surface = RecordingSurface::new();
    h.mux.attach_surface(opened.session_id, surface.clone()).unwrap();
    advance(1).await;

    let bus = h.mux.output_bus().clone();
    let kanji = "日本".as_bytes();
    assert!(bus.publish(opened.session_id, "boot ok\r\n"));
    assert!(bus.publish(opened.session_id, "\x1b[1mERROR\x1b[0m: disk\r\n"));
    assert!(bus.publish(opened.session_id, &kanji[..2]));
    assert!(bus.publish(opened.session_id, &kanji[2..]));
    advance(1).await;

    assert_eq!(
        surface.text(),
        "boot ok\r\n\x1b[1m\x1b[38;2;255;0;0mERROR\x1b[0m\x1b[0m: disk\r\n日本"
    );
}

#[tokio::test(start_paused = true)]
async fn test_output_before_attach_is_replayed() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(1).await;

    h.mux.output_bus().publish(opened.session_id, "motd\r\n");
    advance(1).await;

    let surface = RecordingSurface::new();
    h.mux.attach_surface(opened.session_id, surface.clone()).unwrap();
    assert_eq!(surface.text(), "motd\r\n");
}

#[tokio::test(start_paused = true)]
async fn test_output_unsubscribed_after_close() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(1).await;
    assert!(h.mux.output_bus().is_subscribed(opened.session_id));

    h.mux.close(opened.tab_id).await.unwrap();
    advance(1).await;
    assert!(!h.mux.output_bus().is_subscribed(opened.session_id));
}

#[tokio::test(start_paused = true)]
async fn test_zero_width_container_defers_resize() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;

    let resize = h.mux.resize_coordinator(opened.session_id).unwrap();
    resize.observe(ContainerSize::new(0.0, 600.0));
    advance(300).await;
    assert!(h.transport.resizes().is_empty());

    resize.observe(ContainerSize::new(800.0, 600.0));
    advance(50).await;
    assert!(h.transport.resizes().is_empty());
    advance(100).await;
    assert_eq!(h.transport.resizes(), vec![(37, 100)]);

    // same size again is not forwarded
    resize.observe(ContainerSize::new(805.0, 607.0));
    advance(200).await;
    assert_eq!(h.transport.resizes().len(), 1);

    let forced = resize.force_resize().await.unwrap();
    assert_eq!(forced, Some(GridSize::new(37, 100)));
    assert_eq!(h.transport.resizes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_observations_coalesce_within_window() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;

    let resize = h.mux.resize_coordinator(opened.session_id).unwrap();
    for width in [400.0, 480.0, 560.0, 640.0] {
        resize.observe(ContainerSize::new(width, 320.0));
        advance(40).await;
    }
    advance(200).await;

    assert_eq!(h.transport.resizes(), vec![(20, 80)]);
    assert_eq!(resize.last_sent().await, Some(GridSize::new(20, 80)));
}

#[tokio::test(start_paused = true)]
async fn test_resize_waits_for_ready() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;

    let resize = h.mux.resize_coordinator(opened.session_id).unwrap();
    resize.observe(ContainerSize::new(800.0, 600.0));
    advance(150).await;
    assert!(h.transport.resizes().is_empty());
    assert_eq!(resize.force_resize().await.unwrap(), None);

    // ready flips at 300 ms and triggers a forced recompute
    advance(200).await;
    assert_eq!(h.transport.resizes(), vec![(37, 100)]);
}

#[tokio::test(start_paused = true)]
async fn test_typed_input_is_written_and_captured() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;

    for key in ["l", "s", "s", "\x7f", " ", "-", "l", "\r"] {
        h.mux.send_input(opened.session_id, key).await.unwrap();
    }

    assert_eq!(h.transport.writes_to(opened.session_id).concat(), "lss\x7f -l\r");
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].command, "ls -l");
    assert_eq!(records[0].target_id, "web");
    assert_eq!(records[0].source, CommandSource::User);
}

#[tokio::test(start_paused = true)]
async fn test_input_is_captured_even_when_write_fails() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;
    h.transport.fail_writes_to(opened.session_id);

    assert!(h.mux.send_input(opened.session_id, "reboot\r").await.is_err());
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].command, "reboot");
}

#[tokio::test(start_paused = true)]
async fn test_capture_disabled_by_config() {
    let config = MultiplexerConfig {
        capture_commands: false,
        ..test_config()
    };
    let h = Harness::with_config(vec![saved_target("web")], config);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;

    h.mux.send_input(opened.session_id, "ls\r").await.unwrap();
    h.mux.send_command("uptime").await.unwrap();
    assert!(h.history.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_command_respects_broadcast_mode() {
    let h = Harness::new(vec![saved_target("web")]);
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    let split = h.mux.split(opened.tab_id).await.unwrap().unwrap();
    advance(400).await;

    assert_eq!(h.mux.send_command("uptime").await.unwrap(), 1);
    assert_eq!(h.transport.writes_to(opened.session_id), vec!["uptime\r"]);
    assert!(h.transport.writes_to(split).is_empty());

    assert!(h.mux.toggle_broadcast());
    assert_eq!(h.mux.send_command("df -h").await.unwrap(), 2);
    assert_eq!(h.transport.writes_to(split), vec!["df -h\r"]);

    let records = h.history.records();
    let commands: Vec<&str> = records.iter().map(|r| r.command.as_str()).collect();
    assert_eq!(commands, vec!["uptime", "df -h"]);
    assert!(records.iter().all(|r| r.source == CommandSource::Snippet));
}

#[tokio::test(start_paused = true)]
async fn test_send_command_to_placeholder_is_noop() {
    let h = Harness::new(vec![]);
    assert_eq!(h.mux.send_command("ls").await.unwrap(), 0);
    assert!(h.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_directory_tracking_follows_title() {
    let config = MultiplexerConfig {
        track_directory: true,
        ..test_config()
    };
    let mut h = Harness::with_config(vec![saved_target("web")], config);
    h.transport.add_directory("/home/deploy/app");
    let opened = h.mux.create_connection(ServerRef::new("web", "Web")).await;
    advance(400).await;

    let bus = h.mux.output_bus().clone();
    bus.publish(opened.session_id, "\x1b]0;deploy@web: ~/ap");
    bus.publish(opened.session_id, "p\x07$ ");
    advance(100).await;
    assert_eq!(h.mux.current_directory(opened.session_id), None);

    advance(600).await;
    assert_eq!(
        h.mux.current_directory(opened.session_id).as_deref(),
        Some("/home/deploy/app")
    );
    assert!(h.drain_events().contains(&SessionEvent::DirectoryChanged {
        session_id: opened.session_id,
        path: "/home/deploy/app".to_string(),
    }));

    // paths that are not directories are ignored
    bus.publish(opened.session_id, "\x1b]2;deploy@web: /etc/passwd\x07");
    advance(700).await;
    assert_eq!(
        h.mux.current_directory(opened.session_id).as_deref(),
        Some("/home/deploy/app")
    );
}
