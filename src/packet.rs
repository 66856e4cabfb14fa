// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Fixed-size packet codec.
//!
//! ```text
//! | routing (1) | sequence id (4, BE) | opcode (1) | flags (1) | length (2, BE) | reserved (1) |
//! | body: payload, or three replicas of it, padded with PAD                  |
//! | CRC-32 (4, BE) over header + body                                        |
//! ```
//!
//! The checksum always covers the whole header and the whole padded body.

use crate::error::{QuipError, Result};
use crate::protocol::*;
use crate::redundancy;

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub routing: u8,
    pub sequence_id: u32,
    pub opcode: u8,
    pub redundant: bool,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn is_terminal(&self) -> bool {
        self.opcode == OP_END
    }

    pub fn is_complete_marker(&self) -> bool {
        self.opcode == OP_COMPLETE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    packet_size: usize,
}

impl PacketCodec {
    pub fn new(packet_size: usize) -> Result<Self> {
        let overhead = HEADER_SIZE + CHECKSUM_SIZE;
        if packet_size < MIN_PACKET_SIZE {
            return Err(QuipError::InvalidConfig(format!(
                "packet size {} cannot carry transfer metadata (minimum {})",
                packet_size, MIN_PACKET_SIZE
            )));
        }
        if packet_size - overhead > u16::MAX as usize {
            return Err(QuipError::InvalidConfig(format!(
                "packet size {} exceeds the 16-bit length field",
                packet_size
            )));
        }
        Ok(PacketCodec { packet_size })
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Payload capacity, a third of the body when redundancy is active.
    pub fn data_size(&self, redundant: bool) -> usize {
        let body = self.packet_size - HEADER_SIZE - CHECKSUM_SIZE;
        if redundant { body / 3 } else { body }
    }

    pub fn encode(
        &self,
        payload: &[u8],
        sequence_id: u32,
        routing: u8,
        opcode: u8,
        redundant: bool,
    ) -> Result<Vec<u8>> {
        let max = self.data_size(redundant);
        if payload.len() > max {
            return Err(QuipError::ValueTooLarge { len: payload.len(), max });
        }
        if !is_valid_route(routing) {
            return Err(QuipError::InvalidConfig(format!("invalid routing byte 0x{:02X}", routing)));
        }
        if !is_known_opcode(opcode) {
            return Err(QuipError::InvalidConfig(format!("invalid opcode 0x{:02X}", opcode)));
        }

        let mut raw = Vec::with_capacity(self.packet_size);
        raw.push(routing);
        raw.extend_from_slice(&sequence_id.to_be_bytes());
        raw.push(opcode);
        raw.push(if redundant { FLAG_REDUNDANT } else { 0 });
        raw.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        raw.push(0);

        if redundant {
            raw.extend_from_slice(&redundancy::expand(payload));
        } else {
            raw.extend_from_slice(payload);
        }
        raw.resize(self.packet_size - CHECKSUM_SIZE, PAD);

        let checksum = crc32fast::hash(&raw);
        raw.extend_from_slice(&checksum.to_be_bytes());
        Ok(raw)
    }

    /// Validate and unpack one packet. Every failure is `Corrupted`.
    pub fn decode(&self, raw: &[u8]) -> Result<Packet> {
        if raw.len() != self.packet_size {
            return Err(QuipError::corrupted(format!(
                "packet is {} bytes, expected {}",
                raw.len(),
                self.packet_size
            )));
        }

        let routing = raw[0];
        if !is_valid_route(routing) {
            return Err(QuipError::corrupted(format!("invalid routing byte 0x{:02X}", routing)));
        }

        let (covered, trailer) = raw.split_at(self.packet_size - CHECKSUM_SIZE);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(covered);
        if expected != actual {
            return Err(QuipError::corrupted(format!(
                "checksum mismatch: expected {:#010x}, got {:#010x}",
                expected, actual
            )));
        }

        let sequence_id = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let opcode = raw[5];
        if !is_known_opcode(opcode) {
            return Err(QuipError::corrupted(format!("unknown opcode 0x{:02X}", opcode)));
        }

        let flags = raw[6];
        if flags & !FLAG_REDUNDANT != 0 {
            return Err(QuipError::corrupted(format!("unknown flags 0x{:02X}", flags)));
        }
        let redundant = flags & FLAG_REDUNDANT != 0;

        let len = u16::from_be_bytes([raw[7], raw[8]]) as usize;
        let max = self.data_size(redundant);
        if len > max {
            return Err(QuipError::corrupted(format!(
                "declared length {} exceeds data size {} (redundant: {})",
                len, max, redundant
            )));
        }

        let body = &covered[HEADER_SIZE..];
        let payload = if redundant {
            redundancy::resolve(body, len)?
        } else {
            body[..len].to_vec()
        };

        Ok(Packet { routing, sequence_id, opcode, redundant, payload })
    }
}

/// Id that follows `id`, wrapping after `MAX_SEQUENCE_ID`.
pub fn next_sequence_id(id: u32) -> u32 {
    if id == MAX_SEQUENCE_ID { RESET_ID } else { id + 1 }
}

// ============================================================================
// Sessions
// ============================================================================

/// Sequence counter for one outbound transfer.
#[derive(Debug, Clone)]
pub struct EncodingSession {
    next: u32,
}

impl EncodingSession {
    pub fn new() -> Self {
        EncodingSession { next: RESET_ID }
    }

    pub fn starting_at(id: u32) -> Self {
        EncodingSession { next: id }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = next_sequence_id(id);
        id
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

impl Default for EncodingSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the last accepted id of an inbound packet stream.
#[derive(Debug, Clone, Default)]
pub struct DecodingSession {
    last: Option<u32>,
}

impl DecodingSession {
    pub fn new() -> Self {
        DecodingSession { last: None }
    }

    pub fn expected(&self) -> u32 {
        self.last.map(next_sequence_id).unwrap_or(RESET_ID)
    }

    /// Accept `id` if it is the reset id or directly follows the last one.
    pub fn accept(&mut self, id: u32) -> Result<()> {
        let expected = self.expected();
        if id == RESET_ID || id == expected {
            self.last = Some(id);
            Ok(())
        } else {
            Err(QuipError::OutOfSequence { expected, actual: id })
        }
    }

    /// Continue from `id` after a gap has been noted.
    pub fn resync(&mut self, id: u32) {
        self.last = Some(id);
    }

    pub fn last_accepted(&self) -> Option<u32> {
        self.last
    }
}

// ============================================================================
// Tests
// ============================================================================
