// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A named room multiplexed over the client's single connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, Weak};

use crate::client::{data_frame, control_frame, ClientInner};
use crate::codec::{self, Value};
use crate::event_source::{EventSource, Subscription};

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub peer: String,
}

#[derive(Debug, Clone)]
pub struct PeerStateEvent {
    pub peer: String,
    pub state: Value,
}

#[derive(Debug, Clone)]
pub struct DataEvent {
    pub peer: Option<String>,
    pub event: String,
    pub data: Value,
}

/// A joined room. Obtained via [`crate::client::Client::join`]; destroyed
/// once the last lease releases it.
pub struct Channel {
    id: String,
    client: Weak<ClientInner>,
    pub(crate) leases: AtomicU32,
    local_state: StdMutex<Value>,
    on_joined: EventSource<()>,
    on_peer_online: EventSource<PeerEvent>,
    on_peer_offline: EventSource<PeerEvent>,
    on_peer_state: EventSource<PeerStateEvent>,
    on_data: EventSource<DataEvent>,
}

impl Channel {
    pub(crate) fn new(id: String, client: Weak<ClientInner>) -> Self {
        Self {
            id,
            client,
            leases: AtomicU32::new(0),
            local_state: StdMutex::new(Value::Nil),
            on_joined: EventSource::new(),
            on_peer_online: EventSource::new(),
            on_peer_offline: EventSource::new(),
            on_peer_state: EventSource::new(),
            on_data: EventSource::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueues `{t:"data", c:id, pl: encode({event, data})}`.
    pub fn broadcast(&self, event: impl Into<String>, data: Value) {
        if let Some(client) = self.client.upgrade() {
            client.enqueue(data_frame(&self.id, &event.into(), data));
        }
    }

    /// Updates the state sent to peers during the join handshake and
    /// immediately republishes it as a `peer_state` control frame.
    pub fn set_state(&self, state: Value) {
        *self.local_state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        if let Some(client) = self.client.upgrade() {
            client.enqueue(control_frame(&self.id, "peer_state", None, Some(codec::encode(&state))));
        }
    }

    pub(crate) fn local_state(&self) -> Value {
        self.local_state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fired when the server confirms this client's own `channel_join`.
    pub(crate) fn notify_joined(&self) {
        self.on_joined.notify(());
    }

    pub(crate) fn notify_peer_online(&self, peer: String) {
        self.on_peer_online.notify(PeerEvent { peer });
    }

    pub(crate) fn notify_peer_offline(&self, peer: String) {
        self.on_peer_offline.notify(PeerEvent { peer });
    }

    pub(crate) fn notify_peer_state(&self, peer: String, state: Value) {
        self.on_peer_state.notify(PeerStateEvent { peer, state });
    }

    pub(crate) fn notify_data(&self, peer: Option<String>, event: String, data: Value) {
        self.on_data.notify(DataEvent { peer, event, data });
    }

    pub fn subscribe_joined<F>(&self, f: F) -> Subscription<()>
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.on_joined.subscribe(f)
    }

    pub fn subscribe_peer_online<F>(&self, f: F) -> Subscription<PeerEvent>
    where
        F: FnMut(&PeerEvent) + Send + 'static,
    {
        self.on_peer_online.subscribe(f)
    }

    pub fn subscribe_peer_offline<F>(&self, f: F) -> Subscription<PeerEvent>
    where
        F: FnMut(&PeerEvent) + Send + 'static,
    {
        self.on_peer_offline.subscribe(f)
    }

    pub fn subscribe_peer_state<F>(&self, f: F) -> Subscription<PeerStateEvent>
    where
        F: FnMut(&PeerStateEvent) + Send + 'static,
    {
        self.on_peer_state.subscribe(f)
    }

    pub fn subscribe_data<F>(&self, f: F) -> Subscription<DataEvent>
    where
        F: FnMut(&DataEvent) + Send + 'static,
    {
        self.on_data.subscribe(f)
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
