// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet type definitions for the device wire protocol.
//!
//! Handshake flow: 0x23 / 0x28. Device info flow: 0x43 / 0x48. Data channel:
//! 0x73 / 0x7B. Status broadcast: 0x83 / 0x88. Mesh probe: 0xA3. Heartbeat:
//! 0xC3 or 0xD3 / 0xD8.

use super::checksum;

/// Header width: 1 type byte + 2 reserved + 2 big-endian length bytes.
pub const PACKET_HEADER_LEN: usize = 5;

/// Largest payload the framer will accept before treating the header as
/// corrupt.
pub const MAX_PACKET_SIZE: usize = 4096;

/// The closed set of packet kinds the core must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    HandshakeAck,
    DeviceInfo,
    InfoAck,
    Command,
    CommandAck,
    Status,
    StatusAck,
    Probe,
    HeartbeatDevice,
    HeartbeatAck,
}

impl PacketKind {
    pub fn byte(self) -> u8 {
        match self {
            Self::Handshake => 0x23,
            Self::HandshakeAck => 0x28,
            Self::DeviceInfo => 0x43,
            Self::InfoAck => 0x48,
            Self::Command => 0x73,
            Self::CommandAck => 0x7B,
            Self::Status => 0x83,
            Self::StatusAck => 0x88,
            Self::Probe => 0xA3,
            // 0xC3 is normalized to the same kind as 0xD3; both are the
            // device-initiated heartbeat ping, distinguished only by which
            // byte is echoed, never by behavior.
            Self::HeartbeatDevice => 0xD3,
            Self::HeartbeatAck => 0xD8,
        }
    }

    /// Parse a kind byte, accepting both heartbeat variants (0xC3, 0xD3).
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x23 => Self::Handshake,
            0x28 => Self::HandshakeAck,
            0x43 => Self::DeviceInfo,
            0x48 => Self::InfoAck,
            0x73 => Self::Command,
            0x7B => Self::CommandAck,
            0x83 => Self::Status,
            0x88 => Self::StatusAck,
            0xA3 => Self::Probe,
            0xC3 | 0xD3 => Self::HeartbeatDevice,
            0xD8 => Self::HeartbeatAck,
            _ => return None,
        })
    }

    /// Whether this kind carries a `0x7E`-delimited inner structure.
    pub fn is_framed(self) -> bool {
        matches!(self, Self::Command | Self::Status)
    }

    /// Whether the bridge must reply to an inbound packet of this kind.
    pub fn requires_ack(self) -> bool {
        matches!(
            self,
            Self::Handshake | Self::DeviceInfo | Self::Status | Self::HeartbeatDevice
        )
    }
}

/// A decoded (non-framed) packet: header plus raw payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub length: u16,
    pub payload: Vec<u8>,
    pub raw: Vec<u8>,
}

/// A decoded framed packet (0x73 COMMAND or 0x83 STATUS): adds the routing
/// endpoint, wire message id, inner data, and checksum validation result.
#[derive(Debug, Clone)]
pub struct FramedPacket {
    pub kind: PacketKind,
    pub length: u16,
    pub payload: Vec<u8>,
    pub raw: Vec<u8>,
    /// 5-byte endpoint field, `payload[5:10]`.
    pub endpoint: [u8; 5],
    /// 2-byte wire message id, `payload[10:12]`.
    pub msg_id: [u8; 2],
    /// Inner payload between the `0x7E` markers.
    pub data: Vec<u8>,
    pub checksum: u8,
    pub checksum_valid: bool,
}

impl FramedPacket {
    pub fn as_packet(&self) -> Packet {
        Packet {
            kind: self.kind,
            length: self.length,
            payload: self.payload.clone(),
            raw: self.raw.clone(),
        }
    }
}

/// Either a simple or framed decoded packet.
#[derive(Debug, Clone)]
pub enum DecodedPacket {
    Simple(Packet),
    Framed(FramedPacket),
}

impl DecodedPacket {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Simple(p) => p.kind,
            Self::Framed(p) => p.kind,
        }
    }

    pub fn raw(&self) -> &[u8] {
        match self {
            Self::Simple(p) => &p.raw,
            Self::Framed(p) => &p.raw,
        }
    }
}

/// Decode failure, with a short data preview for diagnostics.
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub reason: DecodeErrorReason,
    pub data_preview: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorReason {
    BufferTooShort,
    UnknownKind(u8),
    LengthMismatch,
    MissingMarkers,
    BadChecksum,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview_len = self.data_preview.len().min(16);
        write!(
            f,
            "decode error: {:?} (preview={:02x?})",
            self.reason,
            &self.data_preview[..preview_len]
        )
    }
}

impl std::error::Error for DecodeError {}

fn preview(raw: &[u8]) -> Vec<u8> {
    raw.iter().copied().take(16).collect()
}

/// Decode a single complete frame (as produced by [`super::framer::PacketFramer`]).
pub fn decode(raw: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if raw.len() < PACKET_HEADER_LEN {
        return Err(DecodeError {
            reason: DecodeErrorReason::BufferTooShort,
            data_preview: preview(raw),
        });
    }

    let kind_byte = raw[0];
    let length = ((raw[3] as u16) * 256) + raw[4] as u16;

    if raw.len() != PACKET_HEADER_LEN + length as usize {
        return Err(DecodeError {
            reason: DecodeErrorReason::LengthMismatch,
            data_preview: preview(raw),
        });
    }

    let kind = PacketKind::from_byte(kind_byte).ok_or_else(|| DecodeError {
        reason: DecodeErrorReason::UnknownKind(kind_byte),
        data_preview: preview(raw),
    })?;

    let payload = raw[PACKET_HEADER_LEN..].to_vec();

    if !kind.is_framed() {
        return Ok(DecodedPacket::Simple(Packet {
            kind,
            length,
            payload,
            raw: raw.to_vec(),
        }));
    }

    if payload.len() < 12 {
        return Err(DecodeError {
            reason: DecodeErrorReason::MissingMarkers,
            data_preview: preview(raw),
        });
    }

    let mut endpoint = [0u8; 5];
    endpoint.copy_from_slice(&payload[5..10]);
    let mut msg_id = [0u8; 2];
    msg_id.copy_from_slice(&payload[10..12]);

    let start = payload
        .iter()
        .position(|&b| b == checksum::FRAME_MARKER)
        .ok_or_else(|| DecodeError {
            reason: DecodeErrorReason::MissingMarkers,
            data_preview: preview(raw),
        })?;
    let end = payload.len() - 1;
    if payload[end] != checksum::FRAME_MARKER || end < start + 2 {
        return Err(DecodeError {
            reason: DecodeErrorReason::MissingMarkers,
            data_preview: preview(raw),
        });
    }

    let checksum_byte = payload[end - 1];
    // Inner data sits strictly between the markers, excluding the checksum byte.
    let data = payload[start + 1..end - 1].to_vec();

    let computed = checksum::checksum_between_markers(
        &payload,
        checksum::DEFAULT_OFFSET_AFTER_START,
    );
    let checksum_valid = matches!(computed, Ok(c) if c == checksum_byte);

    Ok(DecodedPacket::Framed(FramedPacket {
        kind,
        length,
        payload,
        raw: raw.to_vec(),
        endpoint,
        msg_id,
        data,
        checksum: checksum_byte,
        checksum_valid,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_framed(kind: PacketKind, endpoint: [u8; 5], msg_id: [u8; 2], inner: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&endpoint);
        payload.extend_from_slice(&msg_id);
        payload.push(0x00); // padding byte per protocol
        payload.push(checksum::FRAME_MARKER);
        payload.extend_from_slice(inner);
        payload.push(0x00); // checksum placeholder
        payload.push(checksum::FRAME_MARKER);

        let ck_index = payload.len() - 2;
        checksum::insert_checksum_in_place(
            &mut payload,
            ck_index,
            checksum::DEFAULT_OFFSET_AFTER_START,
        )
        .unwrap();

        let mut raw = vec![kind.byte(), 0, 0];
        let len = payload.len() as u16;
        raw.push((len / 256) as u8);
        raw.push((len % 256) as u8);
        raw.extend_from_slice(&payload);
        raw
    }

    #[test]
    fn decodes_simple_handshake() {
        let raw = vec![0x23, 0, 0, 0, 2, 0xAA, 0xBB];
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.kind(), PacketKind::Handshake);
    }

    #[test]
    fn decodes_framed_status_with_valid_checksum() {
        let raw = build_framed(PacketKind::Status, [1, 2, 3, 4, 5], [0, 7], &[1, 2, 3, 4]);
        let decoded = decode(&raw).unwrap();
        match decoded {
            DecodedPacket::Framed(p) => {
                assert!(p.checksum_valid);
                assert_eq!(p.endpoint, [1, 2, 3, 4, 5]);
                assert_eq!(p.msg_id, [0, 7]);
            }
            _ => panic!("expected framed packet"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let raw = vec![0x99, 0, 0, 0, 1, 0x00];
        let err = decode(&raw).unwrap_err();
        assert_eq!(err.reason, DecodeErrorReason::UnknownKind(0x99));
    }

    #[test]
    fn rejects_short_buffer() {
        let raw = vec![0x23, 0, 0];
        let err = decode(&raw).unwrap_err();
        assert_eq!(err.reason, DecodeErrorReason::BufferTooShort);
    }

    #[test]
    fn rejects_length_mismatch() {
        let raw = vec![0x23, 0, 0, 0, 5, 0xAA]; // says len=5, only 1 byte present
        let err = decode(&raw).unwrap_err();
        assert_eq!(err.reason, DecodeErrorReason::LengthMismatch);
    }

    #[test]
    fn heartbeat_normalizes_both_bytes() {
        assert_eq!(PacketKind::from_byte(0xC3), Some(PacketKind::HeartbeatDevice));
        assert_eq!(PacketKind::from_byte(0xD3), Some(PacketKind::HeartbeatDevice));
    }
}
