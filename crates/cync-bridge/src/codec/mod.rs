// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The device wire protocol: packet header parsing, `0x7E`-delimited inner
//! frame checksums, stream framing, and outbound packet construction.

pub mod checksum;
pub mod encoder;
pub mod framer;
pub mod packet;

pub use encoder::{
    encode_command, encode_handshake_ack, encode_heartbeat_ack, encode_info_ack,
    encode_probe, encode_status_ack,
};
pub use framer::PacketFramer;
pub use packet::{decode, DecodeError, DecodeErrorReason, DecodedPacket, FramedPacket, Packet, PacketKind};
