// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Datagram transport: a connected UDP socket wrapped in the same
//! `Transport` surface as [`super::stream::StreamTransport`].
//!
//! - open only after the socket reports ready (`UdpSocket::connect` success).
//! - a read loop that dispatches each datagram as a `message` event.
//! - a zero-length datagram is this transport's "read done" signal, mapped
//!   to `close(code=0, reason="")` — plain UDP has no framed EOF, so an
//!   empty datagram is the closest analogue and is never otherwise a
//!   meaningful application payload.
//! - `close()` clears the close/error/message subscriber lists before
//!   tearing down the socket, so a read already in flight cannot redeliver
//!   to a consumer that has moved on.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CloseInfo, ReadyState, Transport};
use crate::event_source::EventSource;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

pub struct DatagramTransport {
    ready_state: Arc<StdMutex<ReadyState>>,
    on_open: EventSource<()>,
    on_close: EventSource<CloseInfo>,
    on_error: EventSource<String>,
    on_message: EventSource<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
}

impl DatagramTransport {
    /// Bind an ephemeral local socket and connect it to `peer`.
    pub fn connect(peer: SocketAddr) -> Self {
        let ready_state = Arc::new(StdMutex::new(ReadyState::Connecting));
        let on_open = EventSource::new();
        let on_close = EventSource::new();
        let on_error = EventSource::new();
        let on_message = EventSource::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run(
            peer,
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

impl Transport for DatagramTransport {
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
        self.on_close.clear();
        self.on_error.clear();
        self.on_message.clear();
        *self.ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closing;
        self.shutdown.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    peer: SocketAddr,
    ready_state: Arc<StdMutex<ReadyState>>,
    on_open: EventSource<()>,
    on_close: EventSource<CloseInfo>,
    on_error: EventSource<String>,
    on_message: EventSource<Vec<u8>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let bind_addr: SocketAddr = if peer.is_ipv6() {
        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
    };

    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(err) => {
            *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
            on_error.notify(err.to_string());
            on_close.notify(CloseInfo { code: 1006, reason: "bind failed".into() });
            return;
        }
    };

    if let Err(err) = socket.connect(peer).await {
        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
        on_error.notify(err.to_string());
        on_close.notify(CloseInfo { code: 1006, reason: "connect failed".into() });
        return;
    }

    *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Open;
    on_open.notify(());

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                break;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(data) => { let _ = socket.send(&data).await; }
                    None => break,
                }
            }
            received = socket.recv(&mut buf) => {
                match received {
                    Ok(0) => {
                        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                        on_close.notify(CloseInfo { code: 0, reason: String::new() });
                        break;
                    }
                    Ok(n) => on_message.notify(buf[..n].to_vec()),
                    Err(err) => {
                        *ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
                        on_error.notify(err.to_string());
                        on_close.notify(CloseInfo { code: 1006, reason: String::new() });
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "datagram_tests.rs"]
mod tests;
