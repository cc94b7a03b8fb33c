// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the presence client.
//!
//! Configuration errors fail synchronously before any connection attempt,
//! protocol/codec errors are surfaced to the application, and everything
//! that should instead drive a retry is coerced into an FSM transition
//! rather than returned here.

use std::fmt;

/// Errors raised by [`crate::config::ClientConfig`] validation.
///
/// These fail synchronously, before any connection attempt is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ThrottleOutOfRange,
    LostConnectionTimeoutOutOfRange,
    BackgroundKeepAliveTimeoutTooSmall,
}

impl ConfigError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThrottleOutOfRange => "THROTTLE_OUT_OF_RANGE",
            Self::LostConnectionTimeoutOutOfRange => "LOST_CONNECTION_TIMEOUT_OUT_OF_RANGE",
            Self::BackgroundKeepAliveTimeoutTooSmall => "BACKGROUND_KEEP_ALIVE_TIMEOUT_TOO_SMALL",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ThrottleOutOfRange => "throttle must be within [16, 1000] ms",
            Self::LostConnectionTimeoutOutOfRange => {
                "lostConnectionTimeout must be within [200, 30000] ms"
            }
            Self::BackgroundKeepAliveTimeoutTooSmall => {
                "backgroundKeepAliveTimeout must be >= 15000 ms"
            }
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ConfigError {}

/// Errors raised by the MessagePack codec.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Tag `0xc1` is reserved and never valid on the wire.
    ReservedTag,
    /// Buffer ended before a complete value could be read.
    Truncated,
    /// A map key was not a UTF-8 string (this codec only supports string keys).
    NonStringMapKey,
    /// An ext type other than timestamp (-1) was encountered.
    UnsupportedExtType(i8),
    /// An ext timestamp had a byte width this codec does not implement.
    UnsupportedTimestampWidth(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedTag => write!(f, "encountered reserved tag 0xc1"),
            Self::Truncated => write!(f, "truncated input"),
            Self::NonStringMapKey => write!(f, "map key was not a UTF-8 string"),
            Self::UnsupportedExtType(t) => write!(f, "unsupported ext type {t}"),
            Self::UnsupportedTimestampWidth(w) => {
                write!(f, "unsupported timestamp ext width {w}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// An application-visible protocol error, delivered on
/// [`crate::connection_manager::ConnectionManager::subscribe_protocol_error`].
///
/// Server refusals and non-retryable auth failures surface here, with
/// `code` carrying the close code (`-1` for an auth-side stop-retrying
/// failure).
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub message: String,
    pub code: i32,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Top-level error type returned from the client's public, synchronous API.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    Config(ConfigError),
    Codec(CodecError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Codec(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
