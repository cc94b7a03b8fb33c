// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns the [`Fsm`] instance that drives the connection lifecycle,
//! translating its states into the observables a `Client` actually wants:
//! connection status, decoded-free incoming bytes, and application-visible
//! protocol errors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::backoff;
use crate::error::ProtocolError;
use crate::event_source::{EventSource, Subscription};
use crate::fsm::{Fsm, FsmBuilder, Outcome, Patchable, PatchEffect, Selector, StateId};
use crate::transport::{self, CloseInfo, ReadyState, Transport};

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSPORT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
/// Reserved: the `ok.awaiting-pong` path is declared but not wired.
#[allow(dead_code)]
const PONG_TIMEOUT: Duration = Duration::from_secs(2);

/// A sentinel failure signalling that no further reconnection should be
/// attempted from the current retry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateError {
    StopRetrying(String),
    Transient(String),
}

pub type AuthenticateFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String, DelegateError>> + Send + Sync>;
pub type MakeTransportFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn Transport>, DelegateError>> + Send + Sync>;

/// The three external collaborators the manager consumes through narrow
/// contracts. `allow_idle_while_hidden` is reserved: it exists so the
/// optional heartbeat/`idle.zombie` path (also reserved) has a place to read
/// from once it is wired up, but nothing calls it yet.
#[derive(Clone)]
pub struct Delegates {
    pub authenticate: AuthenticateFn,
    pub make_transport: MakeTransportFn,
    pub allow_idle_while_hidden: Arc<dyn Fn() -> bool + Send + Sync>,
}

/// Host-supplied lifecycle signals — the Rust-side stand-in for
/// `navigator.onLine`/`offline`/`visibilitychange` DOM listeners. A host
/// environment without these concepts may implement this as a no-op that
/// never notifies.
pub trait HostSignals: Send + Sync {
    fn on_online(&self) -> &EventSource<()>;
    fn on_offline(&self) -> &EventSource<()>;
    fn on_focus(&self) -> &EventSource<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnGroup {
    Idle,
    Auth,
    Connecting,
    Ok,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnState {
    IdleInitial,
    IdleFailed,
    IdleZombie,
    AuthBusy,
    AuthBackoff,
    ConnectingBusy,
    ConnectingBackoff,
    OkConnected,
    OkAwaitingPong,
}

impl StateId for ConnState {
    type Group = ConnGroup;
    fn group(&self) -> ConnGroup {
        match self {
            ConnState::IdleInitial | ConnState::IdleFailed | ConnState::IdleZombie => ConnGroup::Idle,
            ConnState::AuthBusy | ConnState::AuthBackoff => ConnGroup::Auth,
            ConnState::ConnectingBusy | ConnState::ConnectingBackoff => ConnGroup::Connecting,
            ConnState::OkConnected | ConnState::OkAwaitingPong => ConnGroup::Ok,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnEvent {
    Connect,
    Reconnect,
    Disconnect,
    /// Purges the stored credential, then the caller is expected to follow
    /// up with `Connect` (see [`ConnectionManager::logout`]).
    Logout,
    NavigatorOnline,
    NavigatorOffline,
    WindowGotFocus,
    ExplicitSocketError,
    ExplicitSocketClose(CloseInfo),
    /// Reserved: no transition is registered for this yet.
    HeartbeatProbeSent,
}

#[derive(Clone)]
pub struct ConnCtx {
    pub success_count: u32,
    pub auth_value: Option<String>,
    pub transport: Option<Arc<dyn Transport>>,
    pub backoff_delay_ms: u64,
}

impl Default for ConnCtx {
    fn default() -> Self {
        Self {
            success_count: 0,
            auth_value: None,
            transport: None,
            backoff_delay_ms: backoff::reset_sentinel(backoff::NORMAL_TIERS_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    Connected,
}

fn status_for_group(group: ConnGroup) -> ConnStatus {
    match group {
        ConnGroup::Idle => ConnStatus::Disconnected,
        ConnGroup::Auth | ConnGroup::Connecting => ConnStatus::Connecting,
        ConnGroup::Ok => ConnStatus::Connected,
    }
}

/// The `lost`/`restored` retry-tier staircase: surfaced passively (nothing
/// in the manager consumes it), kept reachable for a future
/// reconnect-banner feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTier {
    Lost,
    Restored,
}

const LOST_THRESHOLD: u32 = 3;

fn advance_backoff_effect() -> PatchEffect<ConnCtx> {
    Box::new(|p: &mut Patchable<'_, ConnCtx>| {
        p.patch(|c| c.backoff_delay_ms = backoff::advance(backoff::NORMAL_TIERS_MS, c.backoff_delay_ms))
    })
}

fn reset_backoff_effect() -> PatchEffect<ConnCtx> {
    Box::new(|p: &mut Patchable<'_, ConnCtx>| {
        p.patch(|c| c.backoff_delay_ms = backoff::reset_sentinel(backoff::NORMAL_TIERS_MS))
    })
}

/// Owns the FSM and republishes its states as the observables a `Client`
/// consumes.
pub struct ConnectionManager {
    fsm: Fsm<ConnCtx, ConnEvent, ConnState>,
    on_status_change: EventSource<ConnStatus>,
    on_message: EventSource<Vec<u8>>,
    on_protocol_error: EventSource<ProtocolError>,
    on_connected: EventSource<()>,
    on_retry_tier: EventSource<RetryTier>,
    current_transport: Arc<StdMutex<Option<Arc<dyn Transport>>>>,
    #[allow(dead_code)]
    allow_idle_while_hidden: Arc<dyn Fn() -> bool + Send + Sync>,
    _host_subs: Vec<Subscription<()>>,
    _status_sub: Subscription<ConnState>,
    _retry_sub: Subscription<ConnState>,
}

impl ConnectionManager {
    pub fn new(delegates: Delegates, host: Arc<dyn HostSignals>) -> Self {
        let on_status_change = EventSource::new();
        let on_message = EventSource::new();
        on_message.pause(); // only unpaused while an OK state is entered
        let on_protocol_error = EventSource::new();
        let on_connected = EventSource::new();
        let on_retry_tier = EventSource::new();
        let current_transport: Arc<StdMutex<Option<Arc<dyn Transport>>>> = Arc::new(StdMutex::new(None));

        // Entry effects inside the OK group need to call back into the FSM
        // handle (to forward transport error/close events) that does not
        // exist until `build()` returns. Those effects only ever run after
        // at least one `send()` from a caller holding the finished
        // `ConnectionManager`, by which point this cell is guaranteed set.
        let fsm_cell: Arc<OnceLock<Fsm<ConnCtx, ConnEvent, ConnState>>> = Arc::new(OnceLock::new());

        let mut builder = FsmBuilder::<ConnCtx, ConnEvent, ConnState>::new();

        builder = builder.add_transitions(Selector::Any, |ev, _ctx| match ev {
            ConnEvent::Reconnect => Some(Outcome::goto_with(
                ConnState::AuthBackoff,
                Box::new(|p: &mut Patchable<'_, ConnCtx>| {
                    p.patch(|c| {
                        c.backoff_delay_ms = backoff::advance(backoff::NORMAL_TIERS_MS, c.backoff_delay_ms);
                        c.success_count = 0;
                    });
                }),
            )),
            ConnEvent::Disconnect => Some(Outcome::goto(ConnState::IdleInitial)),
            ConnEvent::Logout => Some(Outcome::goto_with(
                ConnState::IdleInitial,
                Box::new(|p: &mut Patchable<'_, ConnCtx>| p.patch(|c| c.auth_value = None)),
            )),
            _ => None,
        });

        builder = builder.on_enter(Selector::Group(ConnGroup::Idle), |p| {
            p.patch(|c| c.success_count = 0);
            None
        });
        builder = builder.add_transitions(Selector::Group(ConnGroup::Idle), |ev, ctx| match ev {
            ConnEvent::Connect => Some(Outcome::goto(if ctx.auth_value.is_some() {
                ConnState::ConnectingBusy
            } else {
                ConnState::AuthBusy
            })),
            _ => None,
        });

        builder = builder.add_timed_transition(
            Selector::Exact(ConnState::AuthBackoff),
            |ctx| Duration::from_millis(ctx.backoff_delay_ms),
            ConnState::AuthBusy,
        );
        builder = builder.add_transitions(Selector::Exact(ConnState::AuthBackoff), |ev, _ctx| match ev {
            ConnEvent::NavigatorOnline => Some(Outcome::goto_with(ConnState::AuthBusy, reset_backoff_effect())),
            // Reconnect/Disconnect/Logout fall through to the wildcard
            // handler. Everything else re-arms the pending timer instead of
            // silently dropping it — an unrelated event (say, a focus
            // signal this state doesn't care about) must not strand the
            // machine in backoff forever.
            ConnEvent::Reconnect | ConnEvent::Disconnect | ConnEvent::Logout => None,
            _ => Some(Outcome::goto(ConnState::AuthBackoff)),
        });

        builder = builder.add_transitions(Selector::Exact(ConnState::AuthBusy), |ev, _ctx| match ev {
            // Reconnect/Disconnect/Logout fall through to the wildcard
            // handler. Anything else self-transitions: this state has an
            // in-flight authenticate() call pending, and an otherwise-ignored
            // event would cancel it (fsm.rs drops pending async work on any
            // incoming command) without restarting it, stranding the
            // machine here permanently. Re-entering retries instead.
            ConnEvent::Reconnect | ConnEvent::Disconnect | ConnEvent::Logout => None,
            _ => Some(Outcome::goto(ConnState::AuthBusy)),
        });

        {
            let authenticate = Arc::clone(&delegates.authenticate);
            let protocol_error = on_protocol_error.clone();
            builder = builder.on_enter_async(Selector::Exact(ConnState::AuthBusy), move |_ctx, _cancel| {
                let authenticate = Arc::clone(&authenticate);
                let protocol_error = protocol_error.clone();
                Box::pin(async move {
                    match tokio::time::timeout(AUTH_TIMEOUT, authenticate()).await {
                        Err(_elapsed) => Outcome::goto_with(ConnState::AuthBackoff, advance_backoff_effect()),
                        Ok(Err(DelegateError::StopRetrying(reason))) => {
                            protocol_error.notify(ProtocolError { message: reason, code: -1 });
                            Outcome::goto(ConnState::IdleFailed)
                        }
                        Ok(Err(DelegateError::Transient(_))) => {
                            Outcome::goto_with(ConnState::AuthBackoff, advance_backoff_effect())
                        }
                        Ok(Ok(value)) => Outcome::goto_with(
                            ConnState::ConnectingBusy,
                            Box::new(move |p: &mut Patchable<'_, ConnCtx>| p.patch(|c| c.auth_value = Some(value.clone()))),
                        ),
                    }
                })
            });
        }

        builder = builder.add_timed_transition(
            Selector::Exact(ConnState::ConnectingBackoff),
            |ctx| Duration::from_millis(ctx.backoff_delay_ms),
            ConnState::ConnectingBusy,
        );
        builder = builder.add_transitions(Selector::Exact(ConnState::ConnectingBackoff), |ev, _ctx| match ev {
            ConnEvent::NavigatorOnline => Some(Outcome::goto_with(ConnState::ConnectingBusy, reset_backoff_effect())),
            ConnEvent::Reconnect | ConnEvent::Disconnect | ConnEvent::Logout => None,
            _ => Some(Outcome::goto(ConnState::ConnectingBackoff)),
        });

        builder = builder.add_transitions(Selector::Exact(ConnState::ConnectingBusy), |ev, _ctx| match ev {
            ConnEvent::Reconnect | ConnEvent::Disconnect | ConnEvent::Logout => None,
            _ => Some(Outcome::goto(ConnState::ConnectingBusy)),
        });

        {
            let make_transport = Arc::clone(&delegates.make_transport);
            let protocol_error = on_protocol_error.clone();
            builder = builder.on_enter_async(Selector::Exact(ConnState::ConnectingBusy), move |_ctx, cancel| {
                let make_transport = Arc::clone(&make_transport);
                let protocol_error = protocol_error.clone();
                Box::pin(async move {
                    let made = tokio::time::timeout(TRANSPORT_OPEN_TIMEOUT, make_transport()).await;
                    let built: Box<dyn Transport> = match made {
                        Err(_elapsed) => return Outcome::goto_with(ConnState::AuthBackoff, advance_backoff_effect()),
                        Ok(Err(DelegateError::StopRetrying(reason))) => {
                            protocol_error.notify(ProtocolError { message: reason, code: -1 });
                            return Outcome::goto(ConnState::IdleFailed);
                        }
                        Ok(Err(DelegateError::Transient(_))) => {
                            return Outcome::goto_with(ConnState::AuthBackoff, advance_backoff_effect())
                        }
                        Ok(Ok(transport)) => transport,
                    };

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            built.close();
                            Outcome::Ignore
                        }
                        open_result = transport::wait_for_open(built.as_ref(), TRANSPORT_OPEN_TIMEOUT) => {
                            match open_result {
                                Ok(()) => {
                                    let shared: Arc<dyn Transport> = Arc::from(built);
                                    Outcome::goto_with(
                                        ConnState::OkConnected,
                                        Box::new(move |p: &mut Patchable<'_, ConnCtx>| {
                                            p.patch(|c| {
                                                c.transport = Some(Arc::clone(&shared));
                                                c.backoff_delay_ms = backoff::reset_sentinel(backoff::NORMAL_TIERS_MS);
                                            });
                                        }),
                                    )
                                }
                                Err(transport::OpenFailure::Closed(info)) => {
                                    built.close();
                                    protocol_error.notify(ProtocolError { message: info.reason.clone(), code: info.code });
                                    Outcome::goto(ConnState::IdleFailed)
                                }
                                Err(_other) => {
                                    built.close();
                                    Outcome::goto_with(ConnState::AuthBackoff, advance_backoff_effect())
                                }
                            }
                        }
                    }
                })
            });
        }

        {
            let on_message = on_message.clone();
            let on_connected = on_connected.clone();
            let fsm_cell = Arc::clone(&fsm_cell);
            let current_transport = Arc::clone(&current_transport);
            builder = builder.on_enter(Selector::Group(ConnGroup::Ok), move |p| {
                p.patch(|c| c.success_count += 1);
                let transport = p.get().transport.clone();
                *current_transport.lock().unwrap_or_else(|e| e.into_inner()) = transport.clone();

                let message_sub = transport.as_ref().map(|t| {
                    let on_message = on_message.clone();
                    t.on_message().subscribe(move |bytes: &Vec<u8>| on_message.notify(bytes.clone()))
                });
                let error_sub = transport.as_ref().map(|t| {
                    let fsm_cell = Arc::clone(&fsm_cell);
                    t.on_error().subscribe(move |_message: &String| {
                        if let Some(fsm) = fsm_cell.get() {
                            fsm.send(ConnEvent::ExplicitSocketError);
                        }
                    })
                });
                let close_sub = transport.as_ref().map(|t| {
                    let fsm_cell = Arc::clone(&fsm_cell);
                    t.on_close().subscribe(move |info: &CloseInfo| {
                        if let Some(fsm) = fsm_cell.get() {
                            fsm.send(ConnEvent::ExplicitSocketClose(info.clone()));
                        }
                    })
                });

                // A single cooperative yield stands in for a 0-ms microtask
                // that unpauses the incoming-message observable.
                let on_message_unpause = on_message.clone();
                let unpause_task = tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    on_message_unpause.unpause();
                });

                on_connected.notify(());

                let on_message_cleanup = on_message.clone();
                let current_transport_cleanup = Arc::clone(&current_transport);
                Some(Box::new(move |p: &mut Patchable<'_, ConnCtx>| {
                    unpause_task.abort();
                    on_message_cleanup.pause();
                    drop(message_sub);
                    drop(error_sub);
                    drop(close_sub);
                    *current_transport_cleanup.lock().unwrap_or_else(|e| e.into_inner()) = None;
                    p.patch(|c| {
                        if let Some(t) = c.transport.take() {
                            t.close();
                        }
                    });
                }) as PatchEffect<ConnCtx>)
            });
        }

        builder = builder.add_transitions(Selector::Group(ConnGroup::Ok), |ev, ctx| match ev {
            ConnEvent::ExplicitSocketError => {
                let still_open = ctx.transport.as_ref().map(|t| t.ready_state() == ReadyState::Open).unwrap_or(false);
                if still_open {
                    Some(Outcome::Ignore)
                } else {
                    Some(Outcome::goto_with(ConnState::ConnectingBackoff, advance_backoff_effect()))
                }
            }
            ConnEvent::ExplicitSocketClose(_info) => {
                Some(Outcome::goto_with(ConnState::ConnectingBackoff, advance_backoff_effect()))
            }
            _ => None,
        });

        builder = builder.add_transitions(Selector::Exact(ConnState::IdleZombie), |ev, _ctx| match ev {
            ConnEvent::WindowGotFocus => Some(Outcome::goto_with(ConnState::ConnectingBackoff, advance_backoff_effect())),
            _ => None,
        });

        let fsm = builder.build(ConnState::IdleInitial, ConnCtx::default());
        let _ = fsm_cell.set(fsm.clone());

        let status_sub = {
            let on_status_change = on_status_change.clone();
            let last = Arc::new(AtomicU32::new(255));
            fsm.subscribe_did_enter_state(move |state: &ConnState| {
                let status = status_for_group(state.group());
                let encoded = status as u32;
                if last.swap(encoded, Ordering::SeqCst) != encoded {
                    on_status_change.notify(status);
                }
            })
        };

        let retry_sub = {
            let on_retry_tier = on_retry_tier.clone();
            let consecutive = Arc::new(StdMutex::new(0u32));
            fsm.subscribe_did_enter_state(move |state: &ConnState| {
                let mut count = consecutive.lock().unwrap_or_else(|e| e.into_inner());
                match state {
                    ConnState::AuthBackoff | ConnState::ConnectingBackoff => {
                        *count += 1;
                        if *count == LOST_THRESHOLD {
                            on_retry_tier.notify(RetryTier::Lost);
                        }
                    }
                    _ if state.group() == ConnGroup::Ok => {
                        if *count >= LOST_THRESHOLD {
                            on_retry_tier.notify(RetryTier::Restored);
                        }
                        *count = 0;
                    }
                    _ => {}
                }
            })
        };

        let host_subs = {
            let fsm_for_online = fsm.clone();
            let fsm_for_offline = fsm.clone();
            let fsm_for_focus = fsm.clone();
            vec![
                host.on_online().subscribe(move |_: &()| fsm_for_online.send(ConnEvent::NavigatorOnline)),
                host.on_offline().subscribe(move |_: &()| fsm_for_offline.send(ConnEvent::NavigatorOffline)),
                host.on_focus().subscribe(move |_: &()| fsm_for_focus.send(ConnEvent::WindowGotFocus)),
            ]
        };

        Self {
            fsm,
            on_status_change,
            on_message,
            on_protocol_error,
            on_connected,
            on_retry_tier,
            current_transport,
            allow_idle_while_hidden: delegates.allow_idle_while_hidden,
            _host_subs: host_subs,
            _status_sub: status_sub,
            _retry_sub: retry_sub,
        }
    }

    pub fn connect(&self) {
        self.fsm.send(ConnEvent::Connect);
    }

    pub fn reconnect(&self) {
        self.fsm.send(ConnEvent::Reconnect);
    }

    pub fn disconnect(&self) {
        self.fsm.send(ConnEvent::Disconnect);
    }

    /// Purges the stored credential and immediately reconnects.
    pub fn logout(&self) {
        self.fsm.send(ConnEvent::Logout);
        self.fsm.send(ConnEvent::Connect);
    }

    /// Reserved: declared but not wired to a transition yet. Calling this
    /// today just surfaces on `didIgnoreEvent`.
    pub fn send_heartbeat_probe(&self) {
        self.fsm.send(ConnEvent::HeartbeatProbeSent);
    }

    pub fn status(&self) -> ConnStatus {
        status_for_group(self.fsm.current_state().group())
    }

    /// Hands `data` directly to the live transport if one is owned right
    /// now; returns `false` (caller should queue) otherwise.
    pub fn send_bytes(&self, data: Vec<u8>) -> bool {
        match self.current_transport.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(transport) => {
                transport.send(data);
                true
            }
            None => false,
        }
    }

    pub fn subscribe_status_change<F>(&self, f: F) -> Subscription<ConnStatus>
    where
        F: FnMut(&ConnStatus) + Send + 'static,
    {
        self.on_status_change.subscribe(f)
    }

    pub fn subscribe_message<F>(&self, f: F) -> Subscription<Vec<u8>>
    where
        F: FnMut(&Vec<u8>) + Send + 'static,
    {
        self.on_message.subscribe(f)
    }

    pub fn subscribe_protocol_error<F>(&self, f: F) -> Subscription<ProtocolError>
    where
        F: FnMut(&ProtocolError) + Send + 'static,
    {
        self.on_protocol_error.subscribe(f)
    }

    pub fn subscribe_connected<F>(&self, f: F) -> Subscription<()>
    where
        F: FnMut(&()) + Send + 'static,
    {
        self.on_connected.subscribe(f)
    }

    pub fn subscribe_retry_tier<F>(&self, f: F) -> Subscription<RetryTier>
    where
        F: FnMut(&RetryTier) + Send + 'static,
    {
        self.on_retry_tier.subscribe(f)
    }

    pub fn shutdown(&self) {
        self.fsm.shutdown();
    }
}

#[cfg(test)]
#[path = "connection_manager_tests.rs"]
mod tests;
