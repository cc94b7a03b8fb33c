// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic typed finite-state machine with timed + async transitions.
//!
//! The machine's state lives behind a `std::sync::Mutex` that [`Fsm::send`]
//! locks and drives to completion before returning: lookup, exit cleanups,
//! the transition's own effect, entry effects, and notifications all run
//! inline on the caller's thread, so by the time `send` returns the machine
//! has already settled into its new state. The only work that escapes onto a
//! background task is work that is *itself* asynchronous — a timed
//! transition's delay, or an `on_enter_async` future — and even that work
//! re-acquires the same lock to apply its result, so it is never racing a
//! concurrent `send`.
//!
//! A monotonic generation counter plus a per-pending [`CancellationToken`]
//! let a `send` that arrives while a timer or async entry is in flight
//! preempt it: the token is cancelled and the generation bumped, so the
//! background task either observes the cancellation directly or finds its
//! generation stale by the time it relocks and discards its result.
//!
//! States are identified by a small [`StateId`] trait rather than a
//! `"@group.leaf"` string encoding, so that group/leaf matching is a
//! type-checked `match` instead of string parsing.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::event_source::{EventSource, Subscription};

/// Identifies one state of the machine. `Group` is the `@group` prefix in
/// the conceptual `"@group.leaf"` name; states in the same group share
/// entry/exit effects and transitions registered against [`Selector::Group`].
pub trait StateId: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {
    type Group: Clone + Eq + std::fmt::Debug + Send + Sync + 'static;
    fn group(&self) -> Self::Group;
}

/// Selects one state (`@group.leaf`), a whole group (`@group.*`), or every
/// state (`*`) for a transition/effect registration.
pub enum Selector<S: StateId> {
    Exact(S),
    Group(S::Group),
    Any,
}

impl<S: StateId> Selector<S> {
    fn matches(&self, state: &S) -> bool {
        match self {
            Self::Exact(s) => s == state,
            Self::Group(g) => &state.group() == g,
            Self::Any => true,
        }
    }
}

/// The only legal way to mutate the context from inside an effect.
pub struct Patchable<'a, Ctx> {
    ctx: &'a mut Ctx,
}

impl<'a, Ctx> Patchable<'a, Ctx> {
    pub fn get(&self) -> &Ctx {
        self.ctx
    }

    pub fn patch(&mut self, f: impl FnOnce(&mut Ctx)) {
        f(self.ctx);
    }
}

/// A one-shot effect run against the context at a transition boundary —
/// either a transition effect, an entry effect, or an exit cleanup.
pub type PatchEffect<Ctx> = Box<dyn for<'a> FnOnce(&mut Patchable<'a, Ctx>) + Send>;

/// The result of looking up a transition, or of a timed/async completion.
pub enum Outcome<S, Ctx> {
    /// The event matched a transition whose target was explicitly nothing,
    /// or matched no transition at all: ignored, surfaced via
    /// `didIgnoreEvent`.
    Ignore,
    Goto { target: S, effect: Option<PatchEffect<Ctx>> },
}

impl<S, Ctx> Outcome<S, Ctx> {
    pub fn goto(target: S) -> Self {
        Self::Goto { target, effect: None }
    }

    pub fn goto_with(target: S, effect: PatchEffect<Ctx>) -> Self {
        Self::Goto { target, effect: Some(effect) }
    }
}

type Handler<Ctx, Ev, S> = Box<dyn Fn(&Ev, &Ctx) -> Option<Outcome<S, Ctx>> + Send + Sync>;
type EnterEffect<Ctx> =
    Box<dyn Fn(&mut Patchable<'_, Ctx>) -> Option<PatchEffect<Ctx>> + Send + Sync>;
type DelayFn<Ctx> = Box<dyn Fn(&Ctx) -> Duration + Send + Sync>;
type AsyncWork<Ctx, S> = Box<dyn Fn(Ctx, CancellationToken) -> BoxFuture<'static, Outcome<S, Ctx>> + Send + Sync>;

/// A `(from, to)` pair published on [`Fsm::subscribe_will_transition`].
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
}

/// Builds the transition table before the machine starts running.
pub struct FsmBuilder<Ctx, Ev, S: StateId> {
    transitions: Vec<(Selector<S>, Handler<Ctx, Ev, S>)>,
    enter_effects: Vec<(Selector<S>, EnterEffect<Ctx>)>,
    timed: Vec<(Selector<S>, DelayFn<Ctx>, S)>,
    async_entries: Vec<(Selector<S>, AsyncWork<Ctx, S>)>,
}

impl<Ctx, Ev, S: StateId> Default for FsmBuilder<Ctx, Ev, S> {
    fn default() -> Self {
        Self {
            transitions: Vec::new(),
            enter_effects: Vec::new(),
            timed: Vec::new(),
            async_entries: Vec::new(),
        }
    }
}

impl<Ctx, Ev, S> FsmBuilder<Ctx, Ev, S>
where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transition handler for a selector. `handler` returns
    /// `None` when it does not apply to this event (try the next,
    /// less-specific selector tier); `Some(Outcome::Ignore)` when it applies
    /// but explicitly ignores the event.
    pub fn add_transitions(
        mut self,
        selector: Selector<S>,
        handler: impl Fn(&Ev, &Ctx) -> Option<Outcome<S, Ctx>> + Send + Sync + 'static,
    ) -> Self {
        self.transitions.push((selector, Box::new(handler)));
        self
    }

    /// Register an entry effect; its return value (if any) is run as the
    /// paired exit cleanup, in LIFO order relative to other entered states.
    pub fn on_enter(
        mut self,
        selector: Selector<S>,
        f: impl Fn(&mut Patchable<'_, Ctx>) -> Option<PatchEffect<Ctx>> + Send + Sync + 'static,
    ) -> Self {
        self.enter_effects.push((selector, Box::new(f)));
        self
    }

    /// Schedule a transition to `target` after `delay(ctx)`, cancelled if the
    /// state is exited first.
    pub fn add_timed_transition(
        mut self,
        selector: Selector<S>,
        delay: impl Fn(&Ctx) -> Duration + Send + Sync + 'static,
        target: S,
    ) -> Self {
        self.timed.push((selector, Box::new(delay), target));
        self
    }

    /// Run `work` on entry; its future is dropped (cancelling it) if the
    /// state is exited before it resolves. `work` is responsible for
    /// computing the next target (and any context patch) from its own
    /// result, folding separate success/failure callbacks into a single
    /// function — the natural shape for a `match` on a `Result` in Rust.
    pub fn on_enter_async(
        mut self,
        selector: Selector<S>,
        work: impl Fn(Ctx, CancellationToken) -> BoxFuture<'static, Outcome<S, Ctx>> + Send + Sync + 'static,
    ) -> Self {
        self.async_entries.push((selector, Box::new(work)));
        self
    }

    pub fn build(self, initial: S, ctx: Ctx) -> Fsm<Ctx, Ev, S> {
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let did_receive_event = EventSource::new();
        let will_transition = EventSource::new();
        let did_enter_state = EventSource::new();
        let did_ignore_event = EventSource::new();
        let shutdown = CancellationToken::new();

        let mut actor = Actor {
            state: initial.clone(),
            ctx,
            cleanups: Vec::new(),
            transitions: self.transitions,
            enter_effects: self.enter_effects,
            timed: self.timed,
            async_entries: self.async_entries,
            state_tx,
            will_transition: will_transition.clone(),
            did_enter_state: did_enter_state.clone(),
            did_ignore_event: did_ignore_event.clone(),
            generation: 0,
            pending_cancel: None,
        };

        actor.run_entry_effects(&initial);
        let pending = actor.schedule_pending(&initial);
        let generation = actor.generation;
        actor.did_enter_state.notify(initial);

        let actor = Arc::new(StdMutex::new(actor));
        spawn_pending(Arc::clone(&actor), shutdown.clone(), pending, generation);

        Fsm {
            actor,
            state_rx,
            did_receive_event,
            will_transition,
            did_enter_state,
            did_ignore_event,
            shutdown,
        }
    }
}

/// A handle to a running machine. Cheap to clone — the underlying mutex and
/// channels are shared, not duplicated.
pub struct Fsm<Ctx, Ev, S: StateId> {
    actor: Arc<StdMutex<Actor<Ctx, Ev, S>>>,
    state_rx: watch::Receiver<S>,
    did_receive_event: EventSource<Ev>,
    will_transition: EventSource<Transition<S>>,
    did_enter_state: EventSource<S>,
    did_ignore_event: EventSource<Ev>,
    shutdown: CancellationToken,
}

impl<Ctx, Ev, S: StateId> Clone for Fsm<Ctx, Ev, S> {
    /// A second handle to the same running machine — every field is a cheap
    /// channel/shared-state clone, not a new machine.
    fn clone(&self) -> Self {
        Self {
            actor: Arc::clone(&self.actor),
            state_rx: self.state_rx.clone(),
            did_receive_event: self.did_receive_event.clone(),
            will_transition: self.will_transition.clone(),
            did_enter_state: self.did_enter_state.clone(),
            did_ignore_event: self.did_ignore_event.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<Ctx, Ev, S> Fsm<Ctx, Ev, S>
where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    /// Send an event. Fully synchronous: by the time this returns, the
    /// lookup, any exit cleanups, the transition's own effect, the new
    /// state's entry effects, and the `willTransition`/`didEnterState` (or
    /// `didIgnoreEvent`) notifications have all already run. Only a timed
    /// transition or async entry the new state schedules continues in the
    /// background — `send` itself never suspends.
    pub fn send(&self, event: Ev) {
        self.did_receive_event.notify(event.clone());
        if self.shutdown.is_cancelled() {
            return;
        }
        let (pending, generation) = {
            let mut actor = self.actor.lock().unwrap_or_else(|e| e.into_inner());
            actor.cancel_pending();
            let pending = actor.handle_event(event);
            (pending, actor.generation)
        };
        spawn_pending(Arc::clone(&self.actor), self.shutdown.clone(), pending, generation);
    }

    pub fn current_state(&self) -> S {
        self.state_rx.borrow().clone()
    }

    pub async fn context(&self) -> Ctx {
        self.actor.lock().unwrap_or_else(|e| e.into_inner()).ctx.clone()
    }

    pub fn subscribe_did_receive_event<F>(&self, f: F) -> Subscription<Ev>
    where
        F: FnMut(&Ev) + Send + 'static,
    {
        self.did_receive_event.subscribe(f)
    }

    pub fn subscribe_will_transition<F>(&self, f: F) -> Subscription<Transition<S>>
    where
        F: FnMut(&Transition<S>) + Send + 'static,
    {
        self.will_transition.subscribe(f)
    }

    pub fn subscribe_did_enter_state<F>(&self, f: F) -> Subscription<S>
    where
        F: FnMut(&S) + Send + 'static,
    {
        self.did_enter_state.subscribe(f)
    }

    pub fn subscribe_did_ignore_event<F>(&self, f: F) -> Subscription<Ev>
    where
        F: FnMut(&Ev) + Send + 'static,
    {
        self.did_ignore_event.subscribe(f)
    }

    /// Stop accepting events and drop any in-flight timed/async work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.actor.lock().unwrap_or_else(|e| e.into_inner()).cancel_pending();
    }
}

/// Work a just-entered state scheduled, to run after `send` has already
/// returned. `cancel` is shared with [`Actor::pending_cancel`]; a later
/// `send`/`shutdown` cancelling it preempts whichever of these is in flight.
enum Pending<Ctx, S> {
    None,
    Timer { duration: Duration, target: S, cancel: CancellationToken },
    Async { fut: BoxFuture<'static, Outcome<S, Ctx>>, cancel: CancellationToken },
}

struct Actor<Ctx, Ev, S: StateId> {
    state: S,
    ctx: Ctx,
    cleanups: Vec<PatchEffect<Ctx>>,
    transitions: Vec<(Selector<S>, Handler<Ctx, Ev, S>)>,
    enter_effects: Vec<(Selector<S>, EnterEffect<Ctx>)>,
    timed: Vec<(Selector<S>, DelayFn<Ctx>, S)>,
    async_entries: Vec<(Selector<S>, AsyncWork<Ctx, S>)>,
    state_tx: watch::Sender<S>,
    will_transition: EventSource<Transition<S>>,
    did_enter_state: EventSource<S>,
    did_ignore_event: EventSource<Ev>,
    /// Bumped every time pending work is cancelled or replaced; a background
    /// task compares its captured generation against this before applying
    /// a result, so a stale completion is silently dropped.
    generation: u64,
    pending_cancel: Option<CancellationToken>,
}

impl<Ctx, Ev, S> Actor<Ctx, Ev, S>
where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    /// Cancels whatever timer/async work is currently pending (if any) and
    /// bumps the generation so any in-flight background task's result is
    /// discarded even if it doesn't observe the cancellation directly.
    fn cancel_pending(&mut self) {
        if let Some(cancel) = self.pending_cancel.take() {
            cancel.cancel();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn lookup(&self, event: &Ev) -> Outcome<S, Ctx> {
        for tier in [0u8, 1, 2] {
            for (selector, handler) in &self.transitions {
                let tier_matches = match selector {
                    Selector::Exact(_) => tier == 0,
                    Selector::Group(_) => tier == 1,
                    Selector::Any => tier == 2,
                };
                if tier_matches && selector.matches(&self.state) {
                    if let Some(outcome) = handler(event, &self.ctx) {
                        return outcome;
                    }
                }
            }
        }
        Outcome::Ignore
    }

    fn handle_event(&mut self, event: Ev) -> Pending<Ctx, S> {
        match self.lookup(&event) {
            Outcome::Ignore => {
                tracing::trace!(state = ?self.state, "fsm ignored event");
                self.did_ignore_event.notify(event);
                Pending::None
            }
            Outcome::Goto { target, effect } => self.apply_transition(target, effect),
        }
    }

    fn apply_transition(&mut self, target: S, effect: Option<PatchEffect<Ctx>>) -> Pending<Ctx, S> {
        let from = self.state.clone();
        tracing::debug!(from = ?from, to = ?target, "fsm transition");
        self.will_transition.notify(Transition { from, to: target.clone() });

        // (3) exit cleanups, deepest (most recently entered) first.
        while let Some(cleanup) = self.cleanups.pop() {
            let mut patchable = Patchable { ctx: &mut self.ctx };
            cleanup(&mut patchable);
        }

        // (4) apply the transition's own effect.
        if let Some(effect) = effect {
            let mut patchable = Patchable { ctx: &mut self.ctx };
            effect(&mut patchable);
        }

        self.state = target.clone();
        let _ = self.state_tx.send(target.clone());
        tracing::debug!(state = ?target, "fsm entered state");

        self.run_entry_effects(&target);

        // (6) schedule timed/async work for the newly entered state.
        let pending = self.schedule_pending(&target);

        // (7) notify didEnterState.
        self.did_enter_state.notify(target);

        pending
    }

    /// (5) entry hooks, outermost (`Any`) first, then `Group`, then `Exact`.
    fn run_entry_effects(&mut self, target: &S) {
        for tier in [0u8, 1, 2] {
            for (selector, enter) in &self.enter_effects {
                let tier_matches = match selector {
                    Selector::Any => tier == 0,
                    Selector::Group(_) => tier == 1,
                    Selector::Exact(_) => tier == 2,
                };
                if tier_matches && selector.matches(target) {
                    let mut patchable = Patchable { ctx: &mut self.ctx };
                    if let Some(cleanup) = enter(&mut patchable) {
                        self.cleanups.push(cleanup);
                    }
                }
            }
        }
    }

    /// Picks up at most one piece of pending work for `target` (a timed
    /// transition takes precedence over an async entry), arming a fresh
    /// cancellation token and bumping the generation so a later
    /// `cancel_pending` can invalidate exactly this work.
    fn schedule_pending(&mut self, target: &S) -> Pending<Ctx, S> {
        for (selector, delay_fn, timed_target) in &self.timed {
            if selector.matches(target) {
                let duration = delay_fn(&self.ctx);
                let cancel = CancellationToken::new();
                self.generation = self.generation.wrapping_add(1);
                self.pending_cancel = Some(cancel.clone());
                return Pending::Timer { duration, target: timed_target.clone(), cancel };
            }
        }
        for (selector, work) in &self.async_entries {
            if selector.matches(target) {
                let cancel = CancellationToken::new();
                self.generation = self.generation.wrapping_add(1);
                self.pending_cancel = Some(cancel.clone());
                let fut = work(self.ctx.clone(), cancel.clone());
                return Pending::Async { fut, cancel };
            }
        }
        Pending::None
    }
}

/// Dispatches pending timer/async work onto a detached background task, if
/// any. The task re-locks `actor` once it resolves (or is cancelled) to
/// apply whatever outcome it produced, then recurses through this same
/// function for whatever the resulting state schedules next.
fn spawn_pending<Ctx, Ev, S>(
    actor: Arc<StdMutex<Actor<Ctx, Ev, S>>>,
    shutdown: CancellationToken,
    pending: Pending<Ctx, S>,
    generation: u64,
) where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    match pending {
        Pending::None => {}
        Pending::Timer { duration, target, cancel } => {
            tokio::spawn(run_timer(actor, shutdown, generation, cancel, duration, target));
        }
        Pending::Async { fut, cancel } => {
            tokio::spawn(run_async(actor, shutdown, generation, cancel, fut));
        }
    }
}

async fn run_timer<Ctx, Ev, S>(
    actor: Arc<StdMutex<Actor<Ctx, Ev, S>>>,
    shutdown: CancellationToken,
    generation: u64,
    cancel: CancellationToken,
    duration: Duration,
    target: S,
) where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(duration) => {}
    }

    let (pending, next_generation) = {
        let mut guard = actor.lock().unwrap_or_else(|e| e.into_inner());
        if guard.generation != generation {
            return;
        }
        guard.pending_cancel = None;
        let pending = guard.apply_transition(target, None);
        (pending, guard.generation)
    };
    spawn_pending(actor, shutdown, pending, next_generation);
}

async fn run_async<Ctx, Ev, S>(
    actor: Arc<StdMutex<Actor<Ctx, Ev, S>>>,
    shutdown: CancellationToken,
    generation: u64,
    cancel: CancellationToken,
    fut: BoxFuture<'static, Outcome<S, Ctx>>,
) where
    Ctx: Clone + Send + 'static,
    Ev: Clone + Send + 'static,
    S: StateId,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = shutdown.cancelled() => return,
        outcome = fut => outcome,
    };

    let (pending, next_generation) = {
        let mut guard = actor.lock().unwrap_or_else(|e| e.into_inner());
        if guard.generation != generation {
            return;
        }
        guard.pending_cancel = None;
        let pending = match outcome {
            Outcome::Ignore => Pending::None,
            Outcome::Goto { target, effect } => guard.apply_transition(target, effect),
        };
        (pending, guard.generation)
    };
    spawn_pending(actor, shutdown, pending, next_generation);
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
