// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_opts() -> ClientOptions {
    ClientOptions::new("wss://x/v1", "K", "u1")
}

#[test]
fn defaults_are_accepted() {
    let cfg = ClientConfig::new(base_opts()).unwrap();
    assert_eq!(cfg.throttle_ms, THROTTLE_DEFAULT_MS);
    assert_eq!(cfg.lost_connection_timeout_ms, LOST_CONNECTION_DEFAULT_MS);
    assert_eq!(cfg.background_keep_alive_timeout_ms, None);
}

#[test]
fn transport_url_appends_publickey_and_id() {
    let cfg = ClientConfig::new(base_opts()).unwrap();
    assert_eq!(cfg.transport_url(), "wss://x/v1?publickey=K&id=u1");
}

#[test]
fn throttle_below_minimum_rejected() {
    let mut opts = base_opts();
    opts.throttle = Some(15);
    assert_eq!(ClientConfig::new(opts).unwrap_err(), ConfigError::ThrottleOutOfRange);
}

#[test]
fn throttle_above_maximum_rejected() {
    let mut opts = base_opts();
    opts.throttle = Some(1001);
    assert_eq!(ClientConfig::new(opts).unwrap_err(), ConfigError::ThrottleOutOfRange);
}

#[test]
fn throttle_bounds_are_inclusive() {
    let mut opts = base_opts();
    opts.throttle = Some(16);
    assert!(ClientConfig::new(opts).is_ok());
    let mut opts = base_opts();
    opts.throttle = Some(1000);
    assert!(ClientConfig::new(opts).is_ok());
}

#[test]
fn lost_connection_timeout_out_of_range_rejected() {
    let mut opts = base_opts();
    opts.lost_connection_timeout = Some(199);
    assert_eq!(
        ClientConfig::new(opts).unwrap_err(),
        ConfigError::LostConnectionTimeoutOutOfRange
    );

    let mut opts = base_opts();
    opts.lost_connection_timeout = Some(30_001);
    assert_eq!(
        ClientConfig::new(opts).unwrap_err(),
        ConfigError::LostConnectionTimeoutOutOfRange
    );
}

#[test]
fn background_keep_alive_timeout_too_small_rejected() {
    let mut opts = base_opts();
    opts.background_keep_alive_timeout = Some(14_999);
    assert_eq!(
        ClientConfig::new(opts).unwrap_err(),
        ConfigError::BackgroundKeepAliveTimeoutTooSmall
    );

    let mut opts = base_opts();
    opts.background_keep_alive_timeout = Some(15_000);
    assert!(ClientConfig::new(opts).is_ok());
}
