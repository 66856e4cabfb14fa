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

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{QuipError, Result};
use crate::metadata::{MetadataCodec, TransferMetadata};
use crate::packet::{EncodingSession, PacketCodec};
use crate::protocol::*;
use crate::store::PacketStore;

/// Splits a file into numbered packets plus the metadata packet.
#[derive(Debug, Clone)]
pub struct FileEncoder {
    codec: PacketCodec,
    routing: u8,
    redundant: bool,
    destination: String,
}

impl FileEncoder {
    pub fn new(codec: PacketCodec, routing: u8, redundant: bool) -> Self {
        FileEncoder {
            codec,
            routing,
            redundant,
            destination: ".".to_string(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Write the packets for `source` into `store`.
    ///
    /// Stale packets are removed first so repeated runs produce identical
    /// packet sets. Names that cannot fit the metadata packet and unreadable
    /// sources are refused before the store is touched. A failed write leaves
    /// whatever was written; re-running clears it again.
    pub fn encode_file<S: PacketStore>(&self, source: &Path, store: &mut S) -> Result<TransferMetadata> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| QuipError::InvalidMetadata(format!("no usable filename in {}", source.display())))?
            .to_string();
        MetadataCodec::check_fits(&filename, &self.destination, self.codec.data_size(false))?;

        let file = File::open(source).map_err(|e| match e.kind() {
            ErrorKind::NotFound => QuipError::NotFound(source.display().to_string()),
            _ => QuipError::Io(e),
        })?;
        let mut reader = BufReader::new(file);

        let stale = store.clear()?;
        if stale > 0 {
            debug!(stale, "removed stale packets");
        }

        let data_size = self.codec.data_size(self.redundant);
        let mut session = EncodingSession::starting_at(1);
        let mut hasher = crc32fast::Hasher::new();
        let mut file_size = 0u64;
        let mut terminated = false;

        let mut current = read_chunk(&mut reader, data_size)?;
        while !current.is_empty() {
            let next = read_chunk(&mut reader, data_size)?;
            hasher.update(&current);
            file_size += current.len() as u64;

            let id = session.next_id();
            let opcode = if next.is_empty() && current.len() < data_size {
                terminated = true;
                OP_END
            } else {
                OP_DATA
            };
            self.write_packet(store, id, opcode, &current)?;
            current = next;
        }

        // Last chunk was full (or the file was empty): the terminal packet is empty
        if !terminated {
            let id = session.next_id();
            self.write_packet(store, id, OP_END, &[])?;
        }

        let metadata = TransferMetadata {
            filename,
            packet_count: session.peek(),
            file_size,
            destination: self.destination.clone(),
            checksum: hasher.finalize(),
            redundant: self.redundant,
        };
        let payload = MetadataCodec::encode(&metadata)?;
        let raw = self.codec.encode(&payload, RESET_ID, self.routing, OP_METADATA, false)?;
        store.put(RESET_ID, &raw)?;

        info!(
            file = %metadata.filename,
            packets = metadata.packet_count,
            bytes = metadata.file_size,
            redundant = metadata.redundant,
            "encoded file"
        );
        Ok(metadata)
    }

    fn write_packet<S: PacketStore>(&self, store: &mut S, id: u32, opcode: u8, data: &[u8]) -> Result<()> {
        let raw = self.codec.encode(data, id, self.routing, opcode, self.redundant)?;
        store.put(id, &raw)?;
        debug!(id, len = data.len(), opcode = %(opcode as char), "wrote packet");
        Ok(())
    }
}

/// Read up to `size` bytes, stopping early only at end of file.
fn read_chunk<R: Read>(reader: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
