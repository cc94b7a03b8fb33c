// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

struct FakeTransport {
    ready_state: StdMutex<ReadyState>,
    on_open: EventSource<()>,
    on_close: EventSource<CloseInfo>,
    on_error: EventSource<String>,
    on_message: EventSource<Vec<u8>>,
    sent: StdMutex<Vec<Vec<u8>>>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            ready_state: StdMutex::new(ReadyState::Connecting),
            on_open: EventSource::new(),
            on_close: EventSource::new(),
            on_error: EventSource::new(),
            on_message: EventSource::new(),
            sent: StdMutex::new(Vec::new()),
        }
    }

    fn set_open(&self) {
        *self.ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Open;
        self.on_open.notify(());
    }
}

impl Transport for FakeTransport {
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
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(data);
    }
    fn close(&self) {
        *self.ready_state.lock().unwrap_or_else(|e| e.into_inner()) = ReadyState::Closed;
    }
}

struct NullHost {
    on_online: EventSource<()>,
    on_offline: EventSource<()>,
    on_focus: EventSource<()>,
}

impl NullHost {
    fn new() -> Self {
        Self { on_online: EventSource::new(), on_offline: EventSource::new(), on_focus: EventSource::new() }
    }
}

impl HostSignals for NullHost {
    fn on_online(&self) -> &EventSource<()> {
        &self.on_online
    }
    fn on_offline(&self) -> &EventSource<()> {
        &self.on_offline
    }
    fn on_focus(&self) -> &EventSource<()> {
        &self.on_focus
    }
}

/// Drains the pending `on_enter`/`on_enter_async` stages the manager's
/// instant (no-sleep) fakes trigger in response to the last `send()`.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn always_authenticate(value: &str) -> AuthenticateFn {
    let value = value.to_string();
    Arc::new(move || {
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    })
}

fn failing_authenticate(reason: &str) -> AuthenticateFn {
    let reason = reason.to_string();
    Arc::new(move || {
        let reason = reason.clone();
        Box::pin(async move { Err(DelegateError::StopRetrying(reason)) })
    })
}

fn transport_factory_yielding(transport: Arc<FakeTransport>) -> MakeTransportFn {
    Arc::new(move || {
        let transport = Arc::clone(&transport);
        Box::pin(async move { Ok(Box::new(ClonedTransport(transport)) as Box<dyn Transport>) })
    })
}

/// Wraps a `&Arc<FakeTransport>` as an owned [`Transport`] so the same fake
/// instance can be handed out across reconnect attempts in a test.
struct ClonedTransport(Arc<FakeTransport>);

impl Transport for ClonedTransport {
    fn ready_state(&self) -> ReadyState {
        self.0.ready_state()
    }
    fn on_open(&self) -> &EventSource<()> {
        self.0.on_open()
    }
    fn on_close(&self) -> &EventSource<CloseInfo> {
        self.0.on_close()
    }
    fn on_error(&self) -> &EventSource<String> {
        self.0.on_error()
    }
    fn on_message(&self) -> &EventSource<Vec<u8>> {
        self.0.on_message()
    }
    fn send(&self, data: Vec<u8>) {
        self.0.send(data)
    }
    fn close(&self) {
        self.0.close()
    }
}

fn no_delegates(transport: Arc<FakeTransport>) -> Delegates {
    Delegates {
        authenticate: always_authenticate("token"),
        make_transport: transport_factory_yielding(transport),
        allow_idle_while_hidden: Arc::new(|| false),
    }
}

#[tokio::test]
async fn connect_reaches_ok_connected_once_transport_opens() {
    let transport = Arc::new(FakeTransport::new());
    let manager = ConnectionManager::new(no_delegates(Arc::clone(&transport)), Arc::new(NullHost::new()));

    let statuses = Arc::new(StdMutex::new(Vec::new()));
    let statuses2 = Arc::clone(&statuses);
    let _sub = manager.subscribe_status_change(move |s: &ConnStatus| statuses2.lock().unwrap().push(*s));

    manager.connect();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connecting);

    transport.set_open();
    settle().await;

    assert_eq!(manager.status(), ConnStatus::Connected);
    assert_eq!(*statuses.lock().unwrap(), vec![ConnStatus::Connecting, ConnStatus::Connected]);
}

#[tokio::test]
async fn send_bytes_reaches_the_live_transport_once_connected() {
    let transport = Arc::new(FakeTransport::new());
    let manager = ConnectionManager::new(no_delegates(Arc::clone(&transport)), Arc::new(NullHost::new()));

    assert!(!manager.send_bytes(vec![1, 2, 3]));

    manager.connect();
    settle().await;
    transport.set_open();
    settle().await;

    assert!(manager.send_bytes(vec![9, 9]));
    assert_eq!(*transport.sent.lock().unwrap(), vec![vec![9, 9]]);
}

#[tokio::test]
async fn auth_stop_retrying_surfaces_a_protocol_error_and_lands_in_idle() {
    let transport = Arc::new(FakeTransport::new());
    let delegates = Delegates {
        authenticate: failing_authenticate("bad key"),
        make_transport: transport_factory_yielding(transport),
        allow_idle_while_hidden: Arc::new(|| false),
    };
    let manager = ConnectionManager::new(delegates, Arc::new(NullHost::new()));

    let errors = Arc::new(StdMutex::new(Vec::new()));
    let errors2 = Arc::clone(&errors);
    let _sub = manager.subscribe_protocol_error(move |e: &ProtocolError| errors2.lock().unwrap().push(e.clone()));

    manager.connect();
    settle().await;

    assert_eq!(manager.status(), ConnStatus::Disconnected);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(errors.lock().unwrap()[0].message, "bad key");
}

#[tokio::test]
async fn explicit_close_while_connected_drops_back_to_connecting_backoff() {
    let transport = Arc::new(FakeTransport::new());
    let manager = ConnectionManager::new(no_delegates(Arc::clone(&transport)), Arc::new(NullHost::new()));

    manager.connect();
    settle().await;
    transport.set_open();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connected);

    transport.on_close().notify(CloseInfo { code: 1006, reason: "dropped".into() });
    settle().await;

    assert_eq!(manager.status(), ConnStatus::Connecting);
}

#[tokio::test]
async fn disconnect_returns_to_idle_from_any_state() {
    let transport = Arc::new(FakeTransport::new());
    let manager = ConnectionManager::new(no_delegates(Arc::clone(&transport)), Arc::new(NullHost::new()));

    manager.connect();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connecting);

    manager.disconnect();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Disconnected);
}

#[tokio::test]
async fn logout_purges_credential_and_reconnects() {
    let transport = Arc::new(FakeTransport::new());
    let manager = ConnectionManager::new(no_delegates(Arc::clone(&transport)), Arc::new(NullHost::new()));

    manager.connect();
    settle().await;
    transport.set_open();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connected);

    manager.logout();
    settle().await;

    // Logout tears down the connected transport and immediately re-enters
    // the auth path rather than staying idle.
    assert_eq!(manager.status(), ConnStatus::Connecting);
}

#[tokio::test]
async fn unrelated_event_does_not_strand_the_machine_in_backoff() {
    let transport = Arc::new(FakeTransport::new());
    let delegates = Delegates {
        authenticate: failing_authenticate("still bad"),
        make_transport: transport_factory_yielding(Arc::clone(&transport)),
        allow_idle_while_hidden: Arc::new(|| false),
    };
    // StopRetrying lands in idle.failed, not backoff, so drive a transient
    // failure into connecting.backoff directly via the wildcard Reconnect
    // handler instead, then prove a stray WindowGotFocus (no registered
    // transition at `connecting.backoff` beyond the self-transition) doesn't
    // cancel the pending timer's eventual re-fire.
    let manager = ConnectionManager::new(delegates, Arc::new(NullHost::new()));
    manager.reconnect();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connecting);

    manager.send_heartbeat_probe();
    settle().await;
    assert_eq!(manager.status(), ConnStatus::Connecting);
}
