// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration and bounds validation.

use crate::error::ConfigError;

const THROTTLE_MIN_MS: u64 = 16;
const THROTTLE_MAX_MS: u64 = 1000;
const THROTTLE_DEFAULT_MS: u64 = 100;

const LOST_CONNECTION_MIN_MS: u64 = 200;
const LOST_CONNECTION_MAX_MS: u64 = 30_000;
const LOST_CONNECTION_DEFAULT_MS: u64 = 5_000;

const BACKGROUND_KEEP_ALIVE_MIN_MS: u64 = 15_000;

/// Configuration for [`crate::client::Client`].
///
/// Validated eagerly in [`ClientConfig::new`] so bounds violations fail
/// before any connection attempt is made.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub public_key: String,
    pub uid: String,
    pub throttle_ms: u64,
    pub lost_connection_timeout_ms: u64,
    pub background_keep_alive_timeout_ms: Option<u64>,
    pub auto_connect: bool,
}

/// Raw, unvalidated construction options passed to
/// [`crate::client::Client::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub public_key: String,
    pub uid: String,
    pub throttle: Option<u64>,
    pub lost_connection_timeout: Option<u64>,
    pub background_keep_alive_timeout: Option<u64>,
    pub auto_connect: bool,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>, public_key: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            public_key: public_key.into(),
            uid: uid.into(),
            throttle: None,
            lost_connection_timeout: None,
            background_keep_alive_timeout: None,
            auto_connect: true,
        }
    }
}

impl ClientConfig {
    pub fn new(opts: ClientOptions) -> Result<Self, ConfigError> {
        let throttle_ms = opts.throttle.unwrap_or(THROTTLE_DEFAULT_MS);
        if !(THROTTLE_MIN_MS..=THROTTLE_MAX_MS).contains(&throttle_ms) {
            return Err(ConfigError::ThrottleOutOfRange);
        }

        let lost_connection_timeout_ms =
            opts.lost_connection_timeout.unwrap_or(LOST_CONNECTION_DEFAULT_MS);
        if !(LOST_CONNECTION_MIN_MS..=LOST_CONNECTION_MAX_MS).contains(&lost_connection_timeout_ms)
        {
            return Err(ConfigError::LostConnectionTimeoutOutOfRange);
        }

        if let Some(keep_alive) = opts.background_keep_alive_timeout {
            if keep_alive < BACKGROUND_KEEP_ALIVE_MIN_MS {
                return Err(ConfigError::BackgroundKeepAliveTimeoutTooSmall);
            }
        }

        Ok(Self {
            url: opts.url,
            public_key: opts.public_key,
            uid: opts.uid,
            throttle_ms,
            lost_connection_timeout_ms,
            background_keep_alive_timeout_ms: opts.background_keep_alive_timeout,
            auto_connect: opts.auto_connect,
        })
    }

    /// Transport URL with the `publickey`/`id` query parameters appended.
    pub fn transport_url(&self) -> String {
        format!("{}?publickey={}&id={}", self.url, self.public_key, self.uid)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
