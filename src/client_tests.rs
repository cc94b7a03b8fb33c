// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::codec::Value;

#[test]
fn control_frame_round_trips_through_the_codec() {
    let bytes = control_frame("lobby", "peer_online", Some("alice"), None);
    let decoded = codec::decode(&bytes).unwrap();
    let map = decoded.as_map().unwrap();
    assert_eq!(map.get("t").and_then(Value::as_str), Some("control"));
    assert_eq!(map.get("op").and_then(Value::as_str), Some("peer_online"));
    assert_eq!(map.get("c").and_then(Value::as_str), Some("lobby"));
    assert_eq!(map.get("p").and_then(Value::as_str), Some("alice"));
}

#[test]
fn control_frame_omits_peer_and_payload_when_absent() {
    let bytes = control_frame("lobby", "channel_join", None, None);
    let decoded = codec::decode(&bytes).unwrap();
    let map = decoded.as_map().unwrap();
    assert!(!map.contains_key("p"));
    assert!(!map.contains_key("pl"));
}

#[test]
fn data_frame_nests_event_and_payload_under_pl() {
    let bytes = data_frame("lobby", "cursor", Value::int(42));
    let decoded = codec::decode(&bytes).unwrap();
    let map = decoded.as_map().unwrap();
    assert_eq!(map.get("t").and_then(Value::as_str), Some("data"));
    assert_eq!(map.get("c").and_then(Value::as_str), Some("lobby"));

    let pl = map.get("pl").and_then(Value::as_binary).unwrap();
    let inner = codec::decode(pl).unwrap();
    let inner_map = inner.as_map().unwrap();
    assert_eq!(inner_map.get("event").and_then(Value::as_str), Some("cursor"));
    assert_eq!(inner_map.get("data").cloned(), Some(Value::int(42)));
}

#[test]
fn channel_lease_leave_is_idempotent() {
    // A lease detached from any real client: release_lease() never runs
    // (the Weak never upgrades), but leave() itself must still be safe to
    // call twice and only warn on the second call.
    let lease = ChannelLease { channel_id: "lobby".to_string(), client: Weak::new(), left: AtomicBool::new(false) };
    lease.leave();
    lease.leave();
}

#[test]
fn control_frame_field_order_is_stable_across_calls() {
    let a = control_frame("c1", "channel_join", None, None);
    let b = control_frame("c1", "channel_join", None, None);
    assert_eq!(a, b);
}
