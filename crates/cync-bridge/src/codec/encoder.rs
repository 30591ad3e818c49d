// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Construction of outbound packets: 0x28, 0x48, 0x73, 0x88, 0xA3, 0xD8.

use super::checksum;
use super::packet::{PacketKind, PACKET_HEADER_LEN};

fn header(kind: PacketKind, payload_len: usize) -> Vec<u8> {
    vec![
        kind.byte(),
        0,
        0,
        (payload_len / 256) as u8,
        (payload_len % 256) as u8,
    ]
}

/// Encode a simple (non-framed) outbound packet.
pub fn encode_simple(kind: PacketKind, payload: &[u8]) -> Vec<u8> {
    let mut out = header(kind, payload.len());
    out.extend_from_slice(payload);
    out
}

/// 0x28 HANDSHAKE_ACK.
pub fn encode_handshake_ack(payload: &[u8]) -> Vec<u8> {
    encode_simple(PacketKind::HandshakeAck, payload)
}

/// 0x48 INFO_ACK.
pub fn encode_info_ack(payload: &[u8]) -> Vec<u8> {
    encode_simple(PacketKind::InfoAck, payload)
}

/// 0x88 STATUS_ACK.
pub fn encode_status_ack(payload: &[u8]) -> Vec<u8> {
    encode_simple(PacketKind::StatusAck, payload)
}

/// 0xA3 PROBE.
pub fn encode_probe(payload: &[u8]) -> Vec<u8> {
    encode_simple(PacketKind::Probe, payload)
}

/// 0xD8 HEARTBEAT_ACK.
pub fn encode_heartbeat_ack(payload: &[u8]) -> Vec<u8> {
    encode_simple(PacketKind::HeartbeatAck, payload)
}

/// 0x73 COMMAND: a framed packet addressed to `endpoint` carrying `msg_id`
/// and an inner, checksummed `data` payload.
pub fn encode_command(endpoint: [u8; 5], msg_id: [u8; 2], data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12 + data.len() + 3);
    payload.extend_from_slice(&endpoint);
    payload.extend_from_slice(&msg_id);
    payload.push(0x00); // padding byte, per protocol
    payload.push(checksum::FRAME_MARKER);
    payload.extend_from_slice(data);
    payload.push(0x00); // checksum placeholder, filled in below
    payload.push(checksum::FRAME_MARKER);

    let checksum_index = payload.len() - 2;
    checksum::insert_checksum_in_place(
        &mut payload,
        checksum_index,
        checksum::DEFAULT_OFFSET_AFTER_START,
    )
    .expect("constructed payload always has room for the checksum");

    let mut out = header(PacketKind::Command, payload.len());
    out.extend_from_slice(&payload);
    debug_assert_eq!(out.len(), PACKET_HEADER_LEN + payload.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::packet::{decode, DecodedPacket};

    #[test]
    fn encode_decode_round_trip_simple() {
        let encoded = encode_handshake_ack(&[1, 2, 3]);
        let decoded = decode(&encoded).unwrap();
        match decoded {
            DecodedPacket::Simple(p) => {
                assert_eq!(p.kind, PacketKind::HandshakeAck);
                assert_eq!(p.payload, vec![1, 2, 3]);
                assert_eq!(p.raw, encoded);
            }
            _ => panic!("expected simple packet"),
        }
    }

    #[test]
    fn encode_decode_round_trip_command_checksum_valid() {
        let encoded = encode_command([9, 8, 7, 6, 5], [0, 1], &[0xAA, 0xBB, 0xCC]);
        let decoded = decode(&encoded).unwrap();
        match decoded {
            DecodedPacket::Framed(p) => {
                assert!(p.checksum_valid);
                assert_eq!(p.endpoint, [9, 8, 7, 6, 5]);
                assert_eq!(p.msg_id, [0, 1]);
                assert_eq!(p.data, vec![0xAA, 0xBB, 0xCC]);
            }
            _ => panic!("expected framed packet"),
        }
    }
}
