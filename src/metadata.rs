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

//! Init packet payload: `"<filename> <count> <size> <destination> <crc32> <token>"`

use crate::error::{QuipError, Result};
use crate::protocol::*;

/// Everything the receiver needs before it can interpret data packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub filename: String,
    /// One past the last data id; counts the metadata packet itself.
    pub packet_count: u32,
    pub file_size: u64,
    pub destination: String,
    pub checksum: u32,
    pub redundant: bool,
}

impl TransferMetadata {
    /// Data ids carried by this transfer.
    pub fn data_ids(&self) -> std::ops::Range<u32> {
        1..self.packet_count
    }

    pub fn terminal_id(&self) -> u32 {
        self.packet_count - 1
    }
}

pub struct MetadataCodec;

impl MetadataCodec {
    /// Check that metadata for these names fits in `capacity` bytes whatever
    /// the count, size and checksum turn out to be.
    pub fn check_fits(filename: &str, destination: &str, capacity: usize) -> Result<()> {
        check_token("filename", filename).map_err(QuipError::InvalidMetadata)?;
        check_token("destination", destination).map_err(QuipError::InvalidMetadata)?;

        let len = filename.len() + destination.len() + METADATA_FIXED_LEN;
        if len > capacity {
            return Err(QuipError::ValueTooLarge { len, max: capacity });
        }
        Ok(())
    }

    pub fn encode(meta: &TransferMetadata) -> Result<Vec<u8>> {
        check_token("filename", &meta.filename).map_err(QuipError::InvalidMetadata)?;
        check_token("destination", &meta.destination).map_err(QuipError::InvalidMetadata)?;
        if meta.packet_count < 2 {
            return Err(QuipError::InvalidMetadata(format!(
                "packet count {} leaves no data packet",
                meta.packet_count
            )));
        }

        let token = if meta.redundant { TOKEN_REDUNDANT } else { TOKEN_PLAIN };
        let fields = [
            meta.filename.clone(),
            meta.packet_count.to_string(),
            meta.file_size.to_string(),
            meta.destination.clone(),
            format!("{:08x}", meta.checksum),
            token.to_string(),
        ];
        Ok(fields.join(&METADATA_DELIMITER.to_string()).into_bytes())
    }

    /// Parse a metadata payload. Trailing padding is ignored.
    pub fn decode(payload: &[u8]) -> Result<TransferMetadata> {
        let end = payload.iter().rposition(|&b| b != PAD).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&payload[..end])
            .map_err(|_| QuipError::corrupted("metadata is not valid UTF-8"))?;

        let fields: Vec<&str> = text.split(METADATA_DELIMITER).collect();
        if fields.len() != 6 {
            return Err(QuipError::corrupted(format!(
                "metadata has {} fields, expected 6",
                fields.len()
            )));
        }

        check_token("filename", fields[0]).map_err(QuipError::Corrupted)?;
        check_token("destination", fields[3]).map_err(QuipError::Corrupted)?;

        let packet_count: u32 = fields[1]
            .parse()
            .map_err(|_| QuipError::corrupted(format!("bad packet count '{}'", fields[1])))?;
        if packet_count < 2 {
            return Err(QuipError::corrupted(format!("packet count {} too small", packet_count)));
        }
        let file_size: u64 = fields[2]
            .parse()
            .map_err(|_| QuipError::corrupted(format!("bad file size '{}'", fields[2])))?;
        let checksum = u32::from_str_radix(fields[4], 16)
            .map_err(|_| QuipError::corrupted(format!("bad checksum '{}'", fields[4])))?;
        let redundant = match fields[5] {
            TOKEN_REDUNDANT => true,
            TOKEN_PLAIN => false,
            other => return Err(QuipError::corrupted(format!("bad redundancy token '{}'", other))),
        };

        Ok(TransferMetadata {
            filename: fields[0].to_string(),
            packet_count,
            file_size,
            destination: fields[3].to_string(),
            checksum,
            redundant,
        })
    }
}

fn check_token(what: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} is empty", what));
    }
    if value.contains(METADATA_DELIMITER) {
        return Err(format!("{} '{}' contains the field delimiter", what, value));
    }
    if value.contains('/') || value.contains('\\') || value == ".." {
        return Err(format!("{} '{}' is not a plain name", what, value));
    }
    if value.bytes().any(|b| b == PAD || b < 0x20) {
        return Err(format!("{} contains control bytes", what));
    }
    Ok(())
}
