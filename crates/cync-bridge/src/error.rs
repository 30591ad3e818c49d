// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy, kept as plain enums with manual `Display`/`Error` impls
//! rather than a derive macro, matching the rest of the bridge's error
//! types. `anyhow` is reserved for `main`.

use crate::codec::DecodeError;

/// Session-fatal connection-layer failure; the session transitions to
/// `CLOSING`.
#[derive(Debug, Clone)]
pub enum ConnectionError {
    Io(String),
    Tls(String),
    PeerClosed,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "connection I/O error: {s}"),
            Self::Tls(s) => write!(f, "TLS error: {s}"),
            Self::PeerClosed => write!(f, "peer closed the connection"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Session-fatal failure during the 0x23/0x28 handshake or timeout waiting
/// for it.
#[derive(Debug, Clone)]
pub enum HandshakeError {
    Timeout,
    Malformed(String),
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "handshake timed out"),
            Self::Malformed(s) => write!(f, "malformed handshake: {s}"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// A reliable send exhausted `max_retries` without a matching ACK. Not
/// session-fatal.
#[derive(Debug, Clone)]
pub struct AckTimeoutError {
    pub msg_id: [u8; 2],
    pub attempts: u32,
}

impl std::fmt::Display for AckTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no ACK for msg_id {:?} after {} attempts",
            self.msg_id, self.attempts
        )
    }
}

impl std::error::Error for AckTimeoutError {}

/// Normal condition: an inbound packet matched the dedup cache. ACK is sent,
/// delivery to the registry is skipped.
#[derive(Debug, Clone, Copy)]
pub struct DuplicatePacketError;

impl std::fmt::Display for DuplicatePacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "duplicate packet (dedup hit)")
    }
}

impl std::error::Error for DuplicatePacketError {}

/// Network-level read/write failure; session-fatal.
#[derive(Debug, Clone)]
pub struct PacketReceiveError(pub String);

impl std::fmt::Display for PacketReceiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "packet receive error: {}", self.0)
    }
}

impl std::error::Error for PacketReceiveError {}

/// A status value from a device or MQTT command fell outside its declared
/// range. The update is dropped, not applied.
#[derive(Debug, Clone)]
pub enum RegistryValidationError {
    OutOfRange { field: &'static str, value: String },
    UnknownDevice { cync_id: u32 },
    UnknownGroup { group_id: u32 },
}

impl std::fmt::Display for RegistryValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange { field, value } => {
                write!(f, "field '{field}' out of range: {value}")
            }
            Self::UnknownDevice { cync_id } => write!(f, "unknown device cync_id={cync_id}"),
            Self::UnknownGroup { group_id } => write!(f, "unknown group group_id={group_id}"),
        }
    }
}

impl std::error::Error for RegistryValidationError {}

/// The dispatcher could not satisfy a command.
#[derive(Debug, Clone)]
pub enum DispatchError {
    NoBridgeAvailable,
    ConnectionClosed,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoBridgeAvailable => write!(f, "NO_BRIDGE_AVAILABLE"),
            Self::ConnectionClosed => write!(f, "CONNECTION_CLOSED"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Umbrella error surfaced from a session's top-level packet handler; wraps
/// the specific kinds above when a caller needs one type.
#[derive(Debug)]
pub enum SessionError {
    Decode(DecodeError),
    Connection(ConnectionError),
    Handshake(HandshakeError),
    Receive(PacketReceiveError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "{e}"),
            Self::Connection(e) => write!(f, "{e}"),
            Self::Handshake(e) => write!(f, "{e}"),
            Self::Receive(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<ConnectionError> for SessionError {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

impl From<HandshakeError> for SessionError {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}

impl From<PacketReceiveError> for SessionError {
    fn from(e: PacketReceiveError) -> Self {
        Self::Receive(e)
    }
}
