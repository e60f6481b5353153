use std::time::Duration;

use cdn_scan_client::channel::{self, ChannelConfig};
use cdn_scan_client::types::{Command, Event, ScanMethod, SessionId};
use cdn_scan_client::settings::ScanSettings;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn expect_event(events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended early")
}

fn fast_config(addr: std::net::SocketAddr) -> ChannelConfig {
    ChannelConfig {
        url: format!("ws://{addr}"),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn delivers_events_skips_malformed_frames_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: one good frame, one malformed, then drop.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"scan_log","level":"INFO","message":"hello","session_id":null}"#
                .to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text("{definitely not json".to_string()))
            .await
            .unwrap();
        drop(ws);

        // Second connection after the client's backoff: receive a command,
        // answer with a status acknowledgment.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for command")
            .expect("connection closed")
            .expect("read failed");
        let cmd: Command = match frame {
            Message::Text(text) => serde_json::from_str(&text).expect("command decodes"),
            other => panic!("expected text frame, got {other:?}"),
        };
        match cmd {
            Command::Start { ranges, method, .. } => {
                assert_eq!(ranges, vec!["198.51.100.0/24".to_string()]);
                assert_eq!(method, ScanMethod::Cloud);
            }
            other => panic!("expected start, got {other:?}"),
        }
        ws.send(Message::Text(
            r#"{"event":"scan_status","status":"started","total":254,"session_id":1}"#
                .to_string(),
        ))
        .await
        .unwrap();
        // Hold the connection open until the client tears down.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (handle, mut events) = channel::connect(fast_config(addr));

    assert_eq!(expect_event(&mut events).await, Event::ChannelConnected);
    match expect_event(&mut events).await {
        Event::ScanLog { level, message, .. } => {
            assert_eq!(level, "INFO");
            assert_eq!(message, "hello");
        }
        other => panic!("expected scan_log, got {other:?}"),
    }
    // The malformed frame is discarded, so the next thing seen is the drop.
    assert_eq!(expect_event(&mut events).await, Event::ChannelDisconnected);
    assert_eq!(expect_event(&mut events).await, Event::ChannelConnected);

    handle.send(Command::Start {
        ranges: vec!["198.51.100.0/24".to_string()],
        method: ScanMethod::Cloud,
        settings: ScanSettings::default(),
    });
    match expect_event(&mut events).await {
        Event::ScanStatus {
            status, session_id, ..
        } => {
            assert_eq!(status, "started");
            assert_eq!(session_id, Some(SessionId(1)));
        }
        other => panic!("expected scan_status, got {other:?}"),
    }

    // Teardown ends the inbound sequence.
    handle.shutdown();
    let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for stream end");
    assert_eq!(end, None);
    server.abort();
}

#[tokio::test]
async fn command_sent_while_down_surfaces_as_a_disconnect_event() {
    // Nothing listens on this address; the channel keeps retrying and the
    // dropped command is reported through the event sequence.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (handle, mut events) = channel::connect(fast_config(addr));
    handle.send(Command::Stop {});
    assert_eq!(expect_event(&mut events).await, Event::ChannelDisconnected);
    handle.shutdown();
}
