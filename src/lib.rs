// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A transport-agnostic, browser-resident real-time presence client.
//!
//! [`client::Client`] owns a single [`connection_manager::ConnectionManager`]
//! (a deterministic [`fsm::Fsm`] driving the connection lifecycle) and
//! multiplexes named [`channel::Channel`]s over it, encoding frames with the
//! hand-rolled MessagePack [`codec`].

pub mod backoff;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod event_source;
mod fsm;
pub mod transport;

pub use channel::{Channel, DataEvent, PeerEvent, PeerStateEvent};
pub use client::{datagram_transport_factory, stream_transport_factory, Client, ChannelLease, TransportFactory};
pub use codec::Value;
pub use config::{ClientConfig, ClientOptions};
pub use connection_manager::{
    AuthenticateFn, ConnStatus, DelegateError, Delegates, HostSignals, MakeTransportFn, RetryTier,
};
pub use error::{ClientError, CodecError, ConfigError, ProtocolError};
pub use event_source::{EventSource, Subscription};
