// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The public entry point: constructs exactly one [`ConnectionManager`],
//! multiplexes named [`Channel`]s over it, and ferries the outbound send
//! queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;

use crate::channel::Channel;
use crate::codec::{self, Value};
use crate::config::{ClientConfig, ClientOptions};
use crate::connection_manager::{
    AuthenticateFn, ConnStatus, ConnectionManager, DelegateError, Delegates, HostSignals,
};
use crate::error::{ClientError, ProtocolError};
use crate::event_source::Subscription;
use crate::transport::{datagram::DatagramTransport, stream::StreamTransport, Transport};

/// A transport-construction delegate, parameterized by the URL the client
/// computed from its configuration. Supplied by the host environment;
/// [`stream_transport_factory`]/[`datagram_transport_factory`] cover the two
/// transports this crate ships.
pub type TransportFactory =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Box<dyn Transport>, DelegateError>> + Send + Sync>;

/// A [`TransportFactory`] over [`StreamTransport`] (WebSocket-style). Never
/// fails at construction time — failures surface later through the open
/// timeout/race handling in [`crate::transport::wait_for_open`].
pub fn stream_transport_factory() -> TransportFactory {
    Arc::new(|url: String| Box::pin(async move { Ok(Box::new(StreamTransport::connect(url)) as Box<dyn Transport>) }))
}

/// A [`TransportFactory`] over [`DatagramTransport`]; the configured URL
/// must parse as a `host:port` socket address.
pub fn datagram_transport_factory() -> TransportFactory {
    Arc::new(|url: String| {
        Box::pin(async move {
            match url.parse() {
                Ok(addr) => Ok(Box::new(DatagramTransport::connect(addr)) as Box<dyn Transport>),
                Err(err) => Err(DelegateError::StopRetrying(format!("invalid datagram peer address: {err}"))),
            }
        })
    })
}

pub(crate) fn control_frame(channel_id: &str, op: &str, peer: Option<&str>, payload: Option<Vec<u8>>) -> Vec<u8> {
    let mut map = IndexMap::new();
    map.insert("t".to_string(), Value::str("control"));
    map.insert("op".to_string(), Value::str(op));
    map.insert("c".to_string(), Value::str(channel_id));
    if let Some(p) = peer {
        map.insert("p".to_string(), Value::str(p));
    }
    if let Some(pl) = payload {
        map.insert("pl".to_string(), Value::Binary(pl));
    }
    codec::encode(&Value::Map(map))
}

pub(crate) fn data_frame(channel_id: &str, event: &str, data: Value) -> Vec<u8> {
    let inner = Value::Map(IndexMap::from([
        ("event".to_string(), Value::str(event)),
        ("data".to_string(), data),
    ]));
    let mut map = IndexMap::new();
    map.insert("t".to_string(), Value::str("data"));
    map.insert("c".to_string(), Value::str(channel_id));
    map.insert("pl".to_string(), Value::Binary(codec::encode(&inner)));
    codec::encode(&Value::Map(map))
}

pub(crate) struct ClientInner {
    uid: String,
    connection: ConnectionManager,
    send_queue: StdMutex<VecDeque<Vec<u8>>>,
    channels: StdMutex<HashMap<String, Arc<Channel>>>,
    _message_sub: Subscription<Vec<u8>>,
    _connected_sub: Subscription<()>,
}

impl ClientInner {
    pub(crate) fn enqueue(&self, frame: Vec<u8>) {
        self.send_queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(frame);
        self.flush_queue();
    }

    fn flush_queue(&self) {
        let mut queue = self.send_queue.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(frame) = queue.pop_front() {
            if !self.connection.send_bytes(frame.clone()) {
                queue.push_front(frame);
                break;
            }
        }
    }

    fn release_lease(&self, channel_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let last = channels.get(channel_id).map(|c| c.leases.fetch_sub(1, Ordering::SeqCst) == 1);
        if last == Some(true) {
            channels.remove(channel_id);
        }
    }

    fn handle_inbound_bytes(&self, bytes: Vec<u8>) {
        let frame = match codec::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed inbound frame");
                return;
            }
        };
        self.handle_inbound(&frame);
    }

    fn handle_inbound(&self, frame: &Value) {
        let Some(map) = frame.as_map() else { return };
        let t = map.get("t").and_then(Value::as_str).unwrap_or_default();
        let c = match map.get("c").and_then(Value::as_str) {
            Some(c) => c,
            None => return,
        };
        let p = map.get("p").and_then(Value::as_str);

        let channel = self.channels.lock().unwrap_or_else(|e| e.into_inner()).get(c).cloned();
        let Some(channel) = channel else { return };

        match t {
            "control" => {
                let op = map.get("op").and_then(Value::as_str).unwrap_or_default();
                match op {
                    "channel_join" => {
                        channel.notify_joined();
                        self.enqueue(control_frame(c, "peer_online", None, None));
                        let state = channel.local_state();
                        self.enqueue(control_frame(c, "peer_state", None, Some(codec::encode(&state))));
                    }
                    "peer_online" if p != Some(self.uid.as_str()) => {
                        channel.notify_peer_online(p.unwrap_or_default().to_string());
                        let state = channel.local_state();
                        self.enqueue(control_frame(c, "peer_state", None, Some(codec::encode(&state))));
                    }
                    "peer_offline" if p != Some(self.uid.as_str()) => {
                        channel.notify_peer_offline(p.unwrap_or_default().to_string());
                    }
                    "peer_state" => {
                        if let Some(pl) = map.get("pl").and_then(Value::as_binary) {
                            if let Ok(state) = codec::decode(pl) {
                                channel.notify_peer_state(p.unwrap_or_default().to_string(), state);
                            }
                        }
                    }
                    _ => {}
                }
            }
            "data" => {
                if let Some(pl) = map.get("pl").and_then(Value::as_binary) {
                    if let Ok(decoded) = codec::decode(pl) {
                        if let Some(inner) = decoded.as_map() {
                            let event = inner.get("event").and_then(Value::as_str).unwrap_or_default().to_string();
                            let data = inner.get("data").cloned().unwrap_or(Value::Nil);
                            channel.notify_data(p.map(str::to_string), event, data);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// A released [`Channel`] lease. `leave()` is idempotent: calling it more
/// than once is a no-op with a warning.
pub struct ChannelLease {
    channel_id: String,
    client: Weak<ClientInner>,
    left: AtomicBool,
}

impl ChannelLease {
    pub fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            tracing::warn!(channel = %self.channel_id, "leave() called more than once; ignoring");
            return;
        }
        if let Some(inner) = self.client.upgrade() {
            inner.release_lease(&self.channel_id);
        }
    }
}

/// The channel multiplexer's entry point.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// `authenticate` and `transport_factory` are external collaborators
    /// consumed via narrow contracts rather than owned by this crate (see
    /// [`stream_transport_factory`]/[`datagram_transport_factory`] for the
    /// two transports this crate does own).
    pub fn new(
        opts: ClientOptions,
        authenticate: AuthenticateFn,
        transport_factory: TransportFactory,
        allow_idle_while_hidden: Arc<dyn Fn() -> bool + Send + Sync>,
        host: Arc<dyn HostSignals>,
    ) -> Result<Self, ClientError> {
        let config = ClientConfig::new(opts)?;
        let url = config.transport_url();
        let auto_connect = config.auto_connect;
        let uid = config.uid.clone();

        let make_transport = {
            let transport_factory = Arc::clone(&transport_factory);
            let url = url.clone();
            let f: crate::connection_manager::MakeTransportFn = Arc::new(move || {
                let transport_factory = Arc::clone(&transport_factory);
                let url = url.clone();
                Box::pin(async move { transport_factory(url).await })
            });
            f
        };

        let delegates = Delegates { authenticate, make_transport, allow_idle_while_hidden };

        let inner = Arc::new_cyclic(|weak| {
            let connection = ConnectionManager::new(delegates, host);

            let weak_for_message = Weak::clone(weak);
            let message_sub = connection.subscribe_message(move |bytes: &Vec<u8>| {
                if let Some(inner) = weak_for_message.upgrade() {
                    inner.handle_inbound_bytes(bytes.clone());
                }
            });

            let weak_for_connected = Weak::clone(weak);
            let connected_sub = connection.subscribe_connected(move |_: &()| {
                if let Some(inner) = weak_for_connected.upgrade() {
                    inner.flush_queue();
                }
            });

            ClientInner {
                uid,
                connection,
                send_queue: StdMutex::new(VecDeque::new()),
                channels: StdMutex::new(HashMap::new()),
                _message_sub: message_sub,
                _connected_sub: connected_sub,
            }
        });

        if auto_connect {
            inner.connection.connect();
        }

        Ok(Self { inner })
    }

    /// Joins (or adds a lease to) the named room, sending the `channel_join`
    /// control frame only the first time the room is created locally.
    pub fn join(&self, id: impl Into<String>) -> (Arc<Channel>, ChannelLease) {
        let id = id.into();
        let mut created = false;
        let channel = {
            let mut channels = self.inner.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .entry(id.clone())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Channel::new(id.clone(), Arc::downgrade(&self.inner)))
                })
                .clone()
        };
        channel.leases.fetch_add(1, Ordering::SeqCst);
        if created {
            self.inner.enqueue(control_frame(&id, "channel_join", None, None));
        }
        let lease = ChannelLease { channel_id: id, client: Arc::downgrade(&self.inner), left: AtomicBool::new(false) };
        (channel, lease)
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<Channel>> {
        self.inner.channels.lock().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    /// Purges the stored credential and reconnects.
    pub fn logout(&self) {
        self.inner.connection.logout();
    }

    pub fn connect(&self) {
        self.inner.connection.connect();
    }

    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn status(&self) -> ConnStatus {
        self.inner.connection.status()
    }

    pub fn subscribe_status_change<F>(&self, f: F) -> Subscription<ConnStatus>
    where
        F: FnMut(&ConnStatus) + Send + 'static,
    {
        self.inner.connection.subscribe_status_change(f)
    }

    pub fn subscribe_protocol_error<F>(&self, f: F) -> Subscription<ProtocolError>
    where
        F: FnMut(&ProtocolError) + Send + 'static,
    {
        self.inner.connection.subscribe_protocol_error(f)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.connection.shutdown();
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
