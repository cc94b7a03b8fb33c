// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uniform event surface over a Datagram or Stream transport session.
//!
//! Both concrete transports ([`stream`] over `tokio-tungstenite`, and
//! [`datagram`] over `tokio::net::UdpSocket`) publish the same four
//! [`EventSource`]s and the same [`ReadyState`]. [`wait_for_open`] is the one
//! piece of logic that is genuinely shared rather than merely parallel
//! between them: it implements a fix for the premature close/error race —
//! while awaiting `open`, temporary close/error subscribers record the
//! first such event into a flag; once `open` fires, the flag is checked
//! before declaring success, so a close/error that sneaks in between the
//! transport reporting ready and this function observing it still fails the
//! open attempt.
//!
//! Every concrete transport drives its own `open`/`close`/`error`/`message`
//! notifications from a single reader task, so within one transport instance
//! these events are never delivered concurrently with each other — a
//! single-threaded cooperative model for the pieces that actually need that
//! ordering guarantee.

pub mod datagram;
pub mod stream;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::event_source::EventSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: i32,
    pub reason: String,
}

/// Why [`wait_for_open`] failed to reach `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    Closed(CloseInfo),
    Error(String),
    Timeout,
}

/// A bidirectional byte-frame carrier. Implemented by
/// [`stream::StreamTransport`] and [`datagram::DatagramTransport`].
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;
    fn on_open(&self) -> &EventSource<()>;
    fn on_close(&self) -> &EventSource<CloseInfo>;
    fn on_error(&self) -> &EventSource<String>;
    fn on_message(&self) -> &EventSource<Vec<u8>>;
    fn send(&self, data: Vec<u8>);
    fn close(&self);
}

/// Await `transport` reaching [`ReadyState::Open`], applying the
/// premature-close-during-open race fix.
pub async fn wait_for_open(transport: &dyn Transport, timeout: Duration) -> Result<(), OpenFailure> {
    if transport.ready_state() == ReadyState::Open {
        return Ok(());
    }

    let captured: Arc<StdMutex<Option<OpenFailure>>> = Arc::new(StdMutex::new(None));

    let captured_close = Arc::clone(&captured);
    let _close_sub = transport.on_close().subscribe(move |info: &CloseInfo| {
        let mut slot = captured_close.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(OpenFailure::Closed(info.clone()));
        }
    });

    let captured_error = Arc::clone(&captured);
    let _error_sub = transport.on_error().subscribe(move |message: &String| {
        let mut slot = captured_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(OpenFailure::Error(message.clone()));
        }
    });

    let (open_tx, open_rx) = tokio::sync::oneshot::channel();
    let open_tx = StdMutex::new(Some(open_tx));
    let _open_sub = transport.on_open().subscribe(move |_: &()| {
        if let Some(tx) = open_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(());
        }
    });

    match tokio::time::timeout(timeout, open_rx).await {
        Err(_) => Err(OpenFailure::Timeout),
        Ok(Err(_)) => Err(OpenFailure::Closed(CloseInfo { code: 0, reason: "transport dropped before open".into() })),
        Ok(Ok(())) => match captured.lock().unwrap_or_else(|e| e.into_inner()).take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        },
    }
    // `_close_sub`/`_error_sub`/`_open_sub` drop here, unsubscribing the
    // temporary listeners regardless of outcome.
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
