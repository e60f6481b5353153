use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::types::{Command, Event};

/// Connection parameters for the duplex event channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// `ws://` or `wss://` endpoint of the scan service.
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Typed send half of the channel.
///
/// `send` is fire-and-forget and never errors to the caller: a command that
/// cannot be delivered because the link is down surfaces as a
/// `ChannelDisconnected` event on the inbound sequence instead.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn send(&self, command: Command) {
        // Only fails once the channel task is torn down, which the owner did.
        let _ = self.cmd_tx.send(command);
    }

    /// Tear the channel down; the inbound event sequence ends after this.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Open the channel: spawns the connection task and returns the send handle
/// plus the inbound event sequence. The sequence is infinite while connected
/// and ends only after `shutdown`; reconnection is automatic and unlimited,
/// with bounded exponential backoff.
pub fn connect(config: ChannelConfig) -> (ChannelHandle, mpsc::UnboundedReceiver<Event>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let handle = ChannelHandle {
        cmd_tx,
        cancel: cancel.clone(),
    };
    tokio::spawn(run_channel(config, cmd_rx, event_tx, cancel));
    (handle, event_rx)
}

/// A handle not backed by a connection task, paired with the stream of
/// commands pushed through it. Lets embedders (and tests) provide their own
/// transport for the send half.
pub fn detached() -> (ChannelHandle, mpsc::UnboundedReceiver<Command>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = ChannelHandle {
        cmd_tx,
        cancel: CancellationToken::new(),
    };
    (handle, cmd_rx)
}

/// Double the delay up to the configured ceiling.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

async fn run_channel(
    config: ChannelConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    let mut backoff = config.initial_backoff;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            res = connect_async(config.url.as_str()) => res,
        };
        match connected {
            Ok((stream, _resp)) => {
                tracing::info!(url = %config.url, "event channel connected");
                backoff = config.initial_backoff;
                if event_tx.send(Event::ChannelConnected).is_err() {
                    return;
                }
                serve_connection(stream, &mut cmd_rx, &event_tx, &cancel).await;
                if cancel.is_cancelled() {
                    return;
                }
                tracing::warn!(url = %config.url, "event channel lost, reconnecting");
                if event_tx.send(Event::ChannelDisconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(url = %config.url, error = %e, "connect attempt failed");
            }
        }
        // Wait out the backoff. Commands issued while the link is down are
        // dropped (at-most-once per connection epoch); the consumer is told
        // via a disconnect event rather than an error return.
        let deadline = tokio::time::sleep(backoff);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut deadline => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        tracing::warn!(?cmd, "command dropped: channel is down");
                        if event_tx.send(Event::ChannelDisconnected).is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
}

/// Pump one live connection until it drops, the owner cancels, or the
/// consumer goes away.
async fn serve_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<Event>,
    cancel: &CancellationToken,
) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode command");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "send failed, connection lost");
                    return;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Event>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                        // Malformed frames are logged and discarded; they
                        // must never crash the drain loop.
                        Err(e) => {
                            tracing::warn!(error = %e, frame = %text, "discarding malformed event");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "read failed, connection lost");
                    return;
                }
            }
        }
    }
}
