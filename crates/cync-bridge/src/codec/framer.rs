// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP stream packet framing with bounded-recovery buffer protection.
//!
//! TCP reads may return partial packets, multiple packets, or exact
//! boundaries. [`PacketFramer`] buffers incoming bytes and extracts complete
//! frames using the 5-byte header's length field.
//!
//! Recovery is bounded: `max(100, min(1000, buffer_len / 5))` header-width
//! advances are attempted before the buffer is cleared outright, keeping
//! worst-case behavior `O(n)` in bytes fed rather than `O(n^2)` on
//! adversarial input.

use super::packet::{MAX_PACKET_SIZE, PACKET_HEADER_LEN};
use tracing::{error, warn};

/// Extracts complete frames from a byte stream, buffering partial data.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: Vec<u8>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append newly read bytes and return every complete frame now available.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        self.extract_packets()
    }

    fn extract_packets(&mut self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut recovery_attempts: usize = 0;
        let max_recovery_attempts = (self.buffer.len() / PACKET_HEADER_LEN).clamp(100, 1000);

        while self.buffer.len() >= PACKET_HEADER_LEN {
            if recovery_attempts > max_recovery_attempts {
                error!(
                    max_attempts = max_recovery_attempts,
                    buffer_size = self.buffer.len(),
                    "buffer cleared after max recovery attempts"
                );
                self.buffer.clear();
                break;
            }

            let packet_length = (self.buffer[3] as usize) * 256 + self.buffer[4] as usize;

            if packet_length > MAX_PACKET_SIZE {
                warn!(
                    packet_length,
                    max = MAX_PACKET_SIZE,
                    attempt = recovery_attempts + 1,
                    max_attempts = max_recovery_attempts,
                    "invalid packet length, advancing past header"
                );
                let advance = PACKET_HEADER_LEN.min(self.buffer.len());
                self.buffer.drain(..advance);
                recovery_attempts += 1;
                continue;
            }

            recovery_attempts = 0;
            let total_length = PACKET_HEADER_LEN + packet_length;

            if self.buffer.len() >= total_length {
                let frame: Vec<u8> = self.buffer.drain(..total_length).collect();
                packets.push(frame);
            } else {
                break;
            }
        }

        packets
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u16;
        let mut v = vec![kind, 0, 0, (len / 256) as u8, (len % 256) as u8];
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn incomplete_header_waits() {
        let mut framer = PacketFramer::new();
        let packets = framer.feed(&[0x23, 0x00, 0x00]);
        assert!(packets.is_empty());
    }

    #[test]
    fn partial_then_complete_across_two_reads() {
        let mut framer = PacketFramer::new();
        let full = frame(0x23, &[1, 2, 3]);
        let packets = framer.feed(&full[..4]);
        assert!(packets.is_empty());
        let packets = framer.feed(&full[4..]);
        assert_eq!(packets, vec![full]);
    }

    #[test]
    fn multiple_packets_in_one_read() {
        let mut framer = PacketFramer::new();
        let a = frame(0x23, &[1]);
        let b = frame(0x28, &[2, 3]);
        let mut combined = a.clone();
        combined.extend_from_slice(&b);
        let packets = framer.feed(&combined);
        assert_eq!(packets, vec![a, b]);
    }

    #[test]
    fn length_4096_accepted_4097_rejected_and_recovered() {
        let mut framer = PacketFramer::new();
        let big_ok = frame(0x73, &vec![0u8; MAX_PACKET_SIZE]);
        let packets = framer.feed(&big_ok);
        assert_eq!(packets.len(), 1);

        // length field 4097 (0x10, 0x01) should be treated as invalid and
        // advance 5 bytes rather than accepted.
        let mut bad = vec![0x73, 0, 0, 0x10, 0x01];
        bad.extend_from_slice(&[0u8; 10]);
        let packets = framer.feed(&bad);
        assert!(packets.is_empty());
        assert_eq!(framer.buffered_len(), bad.len() - PACKET_HEADER_LEN);
    }

    #[test]
    fn exactly_five_invalid_bytes_advances_without_deadlock() {
        let mut framer = PacketFramer::new();
        // length = 0xFFFF, invalid, buffer has exactly the header.
        let packets = framer.feed(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(packets.is_empty());
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn adversarial_invalid_input_is_bounded_and_eventually_clears() {
        let mut framer = PacketFramer::new();
        // 10 KB of bytes that always look like an invalid-length header.
        let junk = vec![0xFFu8; 10_000];
        let packets = framer.feed(&junk);
        assert!(packets.is_empty());
        // Recovery budget is capped at 1000 attempts; once exceeded the
        // buffer is cleared outright rather than scanned byte by byte.
        assert_eq!(framer.buffered_len(), 0);
    }
}
