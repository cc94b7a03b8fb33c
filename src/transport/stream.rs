// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Stream transport: wraps a WebSocket connection behind the same
//! four-event `Transport` surface as [`super::datagram::DatagramTransport`],
//! using a `tokio-tungstenite` read/write split and select loop.

use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::{CloseInfo, ReadyState, Transport};
use crate::event_source::EventSource;

pub struct StreamTransport {
    ready_state: Arc<StdMutex<ReadyState>>,
    on_open: EventSource<()>,
    on_close: EventSource<CloseInfo>,
    on_error: EventSource<String>,
    on_message: EventSource<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
}

impl StreamTransport {
    /// Begin connecting to `url` in the background. `ready_state` starts at
    /// `Connecting`; `on_open` fires once the handshake completes.
    pub fn connect(url: String) -> Self {
        let ready_state = Arc::new(StdMutex::new(ReadyState::Connecting));
        let on_open = EventSource::new();
        let on_close = EventSource::new();
        let on_error = EventSource::new();
        let on_message = EventSource::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run(
            url,
            Arc::clone(&ready_state),
            on_open.clone(),
            on_close.clone(),
            on_error.clone(),
            on_message.clone(),
            outbound_rx,
            shutdown.clone(),
        ));

        Self { ready_state, on_open, on_close, on_error, on_message, outbound: outbound_tx, shutdown }
    }
}

impl Transport for StreamTransport {
    fn ready_state(&self) -> ReadyState {
        *self.ready_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_open(&self) -> &EventSource<()> {
        &self.on_open
    }

    fn on_close(&self) -> &EventSource<CloseInfo> {
        &self.on_close
    }

    fn on_error(&self) -> &EventSource<String> {
        &self.on_error
    }

    fn on_message(&self) -> &EventSource<Vec<u8>> {
        &self.on_message
    }

    fn send(&self, data: Vec<u8>) {
        let _ = self.outbound.send(data);
    }

    fn close(&self) {
        *self.ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closing;
        self.shutdown.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    url: String,
    ready_state: Arc<StdMutex<ReadyState>>,
    on_open: EventSource<()>,
    on_close: EventSource<CloseInfo>,
    on_error: EventSource<String>,
    on_message: EventSource<Vec<u8>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let (ws_stream, _response) = match tokio_tungstenite::connect_async(&url).await {
        Ok(pair) => pair,
        Err(err) => {
            *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
            on_error.notify(err.to_string());
            on_close.notify(CloseInfo { code: 1006, reason: "connect failed".into() });
            return;
        }
    };

    *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Open;
    on_open.notify(());

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                let _ = write.close().await;
                break;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(data) => {
                        if write.send(Message::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Binary(bytes))) => on_message.notify(bytes.to_vec()),
                    Some(Ok(Message::Text(text))) => on_message.notify(text.into_bytes()),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code) as i32, f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                        on_close.notify(CloseInfo { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/frame, no event surface for these
                    Some(Err(err)) => {
                        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                        on_error.notify(err.to_string());
                        on_close.notify(CloseInfo { code: 1006, reason: String::new() });
                        break;
                    }
                    None => {
                        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                        on_close.notify(CloseInfo { code: 1005, reason: String::new() });
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
