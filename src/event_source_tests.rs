// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Mutex as StdMutex;

#[test]
fn delivers_synchronously_in_subscription_order() {
    let source: EventSource<i32> = EventSource::new();
    let order = Arc::new(StdMutex::new(Vec::new()));

    let o1 = Arc::clone(&order);
    let _s1 = source.subscribe(move |v| o1.lock().unwrap().push(("a", *v)));
    let o2 = Arc::clone(&order);
    let _s2 = source.subscribe(move |v| o2.lock().unwrap().push(("b", *v)));

    source.notify(1);

    assert_eq!(*order.lock().unwrap(), vec![("a", 1), ("b", 1)]);
}

#[test]
fn unsubscribe_on_drop_stops_delivery() {
    let source: EventSource<i32> = EventSource::new();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);

    let sub = source.subscribe(move |v| seen2.lock().unwrap().push(*v));
    source.notify(1);
    drop(sub);
    source.notify(2);

    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[test]
fn explicit_unsubscribe_method_works() {
    let source: EventSource<i32> = EventSource::new();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);

    let sub = source.subscribe(move |v| seen2.lock().unwrap().push(*v));
    sub.unsubscribe();
    source.notify(1);

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn pause_queues_and_unpause_drains_in_arrival_order() {
    let source: EventSource<i32> = EventSource::new();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let _sub = source.subscribe(move |v| seen2.lock().unwrap().push(*v));

    source.pause();
    source.notify(1);
    source.notify(2);
    source.notify(3);
    assert!(seen.lock().unwrap().is_empty());

    source.unpause();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn clear_drops_all_subscribers() {
    let source: EventSource<i32> = EventSource::new();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let _sub = source.subscribe(move |v| seen2.lock().unwrap().push(*v));

    source.clear();
    source.notify(1);

    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn panicking_subscriber_does_not_block_later_subscribers() {
    let source: EventSource<i32> = EventSource::new();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);

    let _panicking = source.subscribe(|_| panic!("boom"));
    let _ok = source.subscribe(move |v| seen2.lock().unwrap().push(*v));

    source.notify(7);

    assert_eq!(*seen.lock().unwrap(), vec![7]);
}

#[test]
fn cloned_event_source_shares_subscribers() {
    let source: EventSource<i32> = EventSource::new();
    let clone = source.clone();
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let _sub = source.subscribe(move |v| seen2.lock().unwrap().push(*v));

    clone.notify(9);

    assert_eq!(*seen.lock().unwrap(), vec![9]);
}
