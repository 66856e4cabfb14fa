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

//! QUIP protocol constants

/// Packet size used by the payload controller and the companion board
pub const DEFAULT_PACKET_SIZE: usize = 128;

/// Routing (1) + sequence id (4) + opcode (1) + flags (1) + length (2) + reserved (1)
pub const HEADER_SIZE: usize = 10;

/// CRC-32 trailer
pub const CHECKSUM_SIZE: usize = 4;

/// Fills unused payload space and stands in for missing scaffold bytes
pub const PAD: u8 = 0x1A;

/// Sequence id reserved for the metadata packet; also resets a decoding session
pub const RESET_ID: u32 = 0;

/// Largest sequence id before wrapping back to 0
pub const MAX_SEQUENCE_ID: u32 = u32::MAX;

/// Header flag: body carries three replicas of the payload
pub const FLAG_REDUNDANT: u8 = 0x01;

/// Extension used for packet files in a packet store directory
pub const PACKET_EXT: &str = "pkt";

/// Delimiter between metadata fields
pub const METADATA_DELIMITER: char = ' ';

/// Metadata token: redundancy coding on
pub const TOKEN_REDUNDANT: &str = "TMR+";

/// Metadata token: redundancy coding off
pub const TOKEN_PLAIN: &str = "TMR-";

/// First acknowledgement byte; the low nibble carries the low bits of the sequence id
pub const ACK_BASE: u8 = 0xE0;

/// Last acknowledgement byte
pub const ACK_MAX: u8 = 0xEF;

/// Metadata width excluding the two names with every numeric field at full
/// width: five delimiters, count (10), size (20), checksum (8) and token (4)
pub const METADATA_FIXED_LEN: usize = 47;

/// Smallest packet whose metadata can carry one-character names
pub const MIN_PACKET_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE + METADATA_FIXED_LEN + 2;

/// Default number of packets written per ready signal
pub const DEFAULT_PACKETS_PER_ACK: usize = 4;

// ============================================================================
// Opcodes
// ============================================================================

/// Ordinary file data
pub const OP_DATA: u8 = b'D';

/// Transfer metadata (sequence id 0)
pub const OP_METADATA: u8 = b'M';

/// Last data packet of a file
pub const OP_END: u8 = b'E';

/// Completion marker written by the flow controller after the last batch
pub const OP_COMPLETE: u8 = b'C';

// ============================================================================
// Routing designators
// ============================================================================

/// Payload controller (the satellite experiment computer)
pub const ROUTE_PAYLOAD: u8 = 0x01;

/// Companion controller board
pub const ROUTE_COMPANION: u8 = 0x02;

/// Ground relay, forwarded through the companion board
pub const ROUTE_GROUND: u8 = 0x03;

/// Every routing byte a packet may carry
pub const VALID_ROUTES: [u8; 3] = [ROUTE_PAYLOAD, ROUTE_COMPANION, ROUTE_GROUND];

pub fn is_valid_route(routing: u8) -> bool {
    VALID_ROUTES.contains(&routing)
}

pub fn is_known_opcode(opcode: u8) -> bool {
    matches!(opcode, OP_DATA | OP_METADATA | OP_END | OP_COMPLETE)
}

/// Acknowledgement byte for an accepted packet
pub fn ack_for(sequence_id: u32) -> u8 {
    ACK_BASE | (sequence_id & 0x0F) as u8
}

/// Parse a routing designator name as accepted on the command line
pub fn parse_route(name: &str) -> Result<u8, String> {
    match name.to_lowercase().as_str() {
        "payload" => Ok(ROUTE_PAYLOAD),
        "companion" => Ok(ROUTE_COMPANION),
        "ground" => Ok(ROUTE_GROUND),
        _ => Err(format!("Invalid route: {}. Must be 'payload', 'companion', or 'ground'", name)),
    }
}
