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

//! Inbound reconstruction: bulk pass, targeted fill passes, finalization.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Fault, QuipError, Result};
use crate::metadata::{MetadataCodec, TransferMetadata};
use crate::packet::{Packet, PacketCodec};
use crate::protocol::*;
use crate::scaffold::{Scaffold, ScaffoldPaths, read_ledger};
use crate::signal::CancelToken;
use crate::store::PacketStore;

/// How the fill pass repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// One attempt, for bounded execution.
    Rush,
    /// Retry every `interval` until nothing is missing or the caller cancels.
    Poll { interval: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Verified and promoted to this path.
    Complete(PathBuf),
    /// Ids still missing; scaffold and ledger are on disk.
    Incomplete(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub metadata: TransferMetadata,
    pub missing: Vec<u32>,
}

pub struct FileDecoder<S: PacketStore> {
    store: S,
    codec: PacketCodec,
    work_dir: PathBuf,
    output_dir: PathBuf,
}

impl<S: PacketStore> FileDecoder<S> {
    pub fn new(store: S, codec: PacketCodec, work_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        let output_dir = output_dir.into();
        fs::create_dir_all(&work_dir)?;
        fs::create_dir_all(&output_dir)?;
        Ok(FileDecoder { store, codec, work_dir, output_dir })
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn scaffold_paths(&self, metadata: &TransferMetadata) -> ScaffoldPaths {
        ScaffoldPaths::new(&self.work_dir, &metadata.filename)
    }

    /// Read the metadata packet. Absence or corruption is fatal for the transfer.
    pub fn read_metadata(&self) -> Result<TransferMetadata> {
        let raw = self.store.get(RESET_ID)?;
        let packet = self.codec.decode(&raw)?;
        if packet.sequence_id != RESET_ID || packet.opcode != OP_METADATA {
            return Err(QuipError::corrupted(format!(
                "packet 0 is not a metadata packet (id {}, opcode 0x{:02X})",
                packet.sequence_id, packet.opcode
            )));
        }
        MetadataCodec::decode(&packet.payload)
    }

    /// Decode every data packet into a fresh scaffold.
    ///
    /// Absent or corrupted packets are recorded as missing. The scaffold and
    /// ledger are written to disk before returning, including on error.
    pub fn bulk_decode(&mut self) -> Result<BulkReport> {
        let metadata = self.read_metadata()?;
        let paths = self.scaffold_paths(&metadata);
        if paths.exists() {
            info!(file = %metadata.filename, "discarding in-progress scaffold");
            paths.discard()?;
        }

        let mut scaffold = Scaffold::new(self.codec.data_size(metadata.redundant));
        for id in metadata.data_ids() {
            match self.fetch(&metadata, id) {
                Ok(packet) => scaffold.insert(id, &packet.payload)?,
                Err(Fault::Recoverable { sequence_id, reason }) => {
                    warn!(id = sequence_id, %reason, "packet missing");
                    scaffold.mark_missing(sequence_id)?;
                }
                Err(Fault::Fatal(e)) => {
                    save_best_effort(&scaffold, &paths);
                    return Err(e);
                }
            }
        }
        scaffold.save(&paths)?;

        let missing = scaffold.missing();
        info!(
            file = %metadata.filename,
            packets = metadata.packet_count,
            missing = missing.len(),
            "bulk pass finished"
        );
        Ok(BulkReport { metadata, missing })
    }

    /// Retry exactly the ids given against the saved scaffold.
    ///
    /// Returns the given ids that are still missing. Ids outside the transfer
    /// are dropped with a warning.
    pub fn fill(&mut self, ids: &[u32]) -> Result<Vec<u32>> {
        let metadata = self.read_metadata()?;
        let paths = self.scaffold_paths(&metadata);
        let mut scaffold = Scaffold::load(&paths, self.codec.data_size(metadata.redundant))?;

        let mut still_missing = Vec::new();
        for &id in ids {
            if !metadata.data_ids().contains(&id) {
                warn!(id, file = %metadata.filename, "id is not part of this transfer");
                continue;
            }
            match self.fetch(&metadata, id) {
                Ok(packet) => {
                    scaffold.insert(id, &packet.payload)?;
                    debug!(id, "filled");
                }
                Err(Fault::Recoverable { sequence_id, reason }) => {
                    // A span that already holds data is never overwritten with placeholders
                    if scaffold.is_missing(sequence_id) {
                        debug!(id = sequence_id, %reason, "still missing");
                        still_missing.push(sequence_id);
                    }
                }
                Err(Fault::Fatal(e)) => {
                    save_best_effort(&scaffold, &paths);
                    return Err(e);
                }
            }
        }
        scaffold.save(&paths)?;
        Ok(still_missing)
    }

    /// Run fill passes over `ids` until they are all present, then finalize.
    ///
    /// Cancellation is checked before every attempt and interrupts the sleep
    /// between attempts.
    pub fn poll_fill(&mut self, ids: Vec<u32>, mode: FillMode, cancel: &CancelToken) -> Result<DecodeStatus> {
        let mut missing = ids;
        loop {
            if cancel.is_cancelled() {
                info!(missing = missing.len(), "fill cancelled");
                return Ok(DecodeStatus::Incomplete(missing));
            }

            missing = self.fill(&missing)?;
            if missing.is_empty() {
                let metadata = self.read_metadata()?;
                let ledger = read_ledger(&self.scaffold_paths(&metadata).ledger)?;
                if !ledger.is_empty() {
                    return Ok(DecodeStatus::Incomplete(ledger.into_iter().collect()));
                }
                return self.finalize_with(&metadata).map(DecodeStatus::Complete);
            }

            match mode {
                FillMode::Rush => return Ok(DecodeStatus::Incomplete(missing)),
                FillMode::Poll { interval } => {
                    debug!(missing = missing.len(), ?interval, "waiting for stragglers");
                    if cancel.sleep(interval) {
                        info!(missing = missing.len(), "fill cancelled");
                        return Ok(DecodeStatus::Incomplete(missing));
                    }
                }
            }
        }
    }

    /// Bulk pass, then finalize if nothing is missing.
    pub fn decode(&mut self) -> Result<DecodeStatus> {
        let report = self.bulk_decode()?;
        if !report.missing.is_empty() {
            return Ok(DecodeStatus::Incomplete(report.missing));
        }
        self.finalize_with(&report.metadata).map(DecodeStatus::Complete)
    }

    /// Verify the saved scaffold and promote it to the output directory.
    pub fn finalize(&mut self) -> Result<PathBuf> {
        let metadata = self.read_metadata()?;
        self.finalize_with(&metadata)
    }

    fn finalize_with(&self, metadata: &TransferMetadata) -> Result<PathBuf> {
        let paths = self.scaffold_paths(metadata);
        let scaffold = Scaffold::load(&paths, self.codec.data_size(metadata.redundant))?;
        if !scaffold.is_complete() {
            return Err(QuipError::Incomplete { missing: scaffold.missing() });
        }

        let mut bytes = scaffold.into_bytes();
        let size = usize::try_from(metadata.file_size)
            .map_err(|_| QuipError::corrupted(format!("file size {} not addressable", metadata.file_size)))?;
        if bytes.len() < size {
            return Err(QuipError::corrupted(format!(
                "scaffold holds {} bytes, metadata declares {}",
                bytes.len(),
                size
            )));
        }
        bytes.truncate(size);

        let actual = crc32fast::hash(&bytes);
        if actual != metadata.checksum {
            warn!(
                file = %metadata.filename,
                expected = format_args!("{:08x}", metadata.checksum),
                actual = format_args!("{:08x}", actual),
                "file checksum mismatch, scaffold kept"
            );
            return Err(QuipError::corrupted(format!(
                "file checksum mismatch: expected {:08x}, got {:08x}",
                metadata.checksum, actual
            )));
        }

        let dest_dir = self.output_dir.join(&metadata.destination);
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(&metadata.filename);

        fs::write(&paths.scaffold, &bytes)?;
        if fs::rename(&paths.scaffold, &dest).is_err() {
            // Work and output directories may sit on different filesystems
            fs::copy(&paths.scaffold, &dest)?;
            fs::remove_file(&paths.scaffold)?;
        }
        paths.discard()?;

        info!(file = %metadata.filename, path = %dest.display(), "transfer verified");
        Ok(dest)
    }

    /// Fetch and validate data packet `id` against the transfer metadata.
    fn fetch(&self, metadata: &TransferMetadata, id: u32) -> std::result::Result<Packet, Fault> {
        let raw = self.store.get(id).map_err(|e| Fault::classify(id, e))?;
        let packet = self.codec.decode(&raw).map_err(|e| Fault::classify(id, e))?;
        self.check_packet(metadata, id, &packet)
            .map_err(|e| Fault::classify(id, e))?;
        Ok(packet)
    }

    fn check_packet(&self, metadata: &TransferMetadata, id: u32, packet: &Packet) -> Result<()> {
        if packet.sequence_id != id {
            return Err(QuipError::corrupted(format!("slot {} holds packet {}", id, packet.sequence_id)));
        }
        if packet.redundant != metadata.redundant {
            return Err(QuipError::corrupted(format!("packet {} has the wrong coding mode", id)));
        }

        let data_size = self.codec.data_size(metadata.redundant) as u64;
        let terminal = id == metadata.terminal_id();
        let expected_opcode = if terminal { OP_END } else { OP_DATA };
        if packet.opcode != expected_opcode {
            return Err(QuipError::corrupted(format!(
                "packet {} has opcode 0x{:02X}, expected 0x{:02X}",
                id, packet.opcode, expected_opcode
            )));
        }

        let expected_len = if terminal {
            metadata
                .file_size
                .checked_sub((id as u64 - 1) * data_size)
                .filter(|len| *len <= data_size)
                .ok_or_else(|| QuipError::corrupted("file size disagrees with packet count"))?
        } else {
            data_size
        };
        if packet.payload.len() as u64 != expected_len {
            return Err(QuipError::corrupted(format!(
                "packet {} carries {} bytes, expected {}",
                id,
                packet.payload.len(),
                expected_len
            )));
        }
        Ok(())
    }
}

fn save_best_effort(scaffold: &Scaffold, paths: &ScaffoldPaths) {
    if let Err(e) = scaffold.save(paths) {
        warn!(error = %e, path = %paths.scaffold.display(), "could not save scaffold");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FileEncoder;
    use crate::store::{DirStore, MemoryStore};
    use std::thread;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        content: Vec<u8>,
        metadata: TransferMetadata,
    }

    impl Fixture {
        fn decoder<S: PacketStore>(&self, store: S, codec: PacketCodec) -> FileDecoder<S> {
            FileDecoder::new(store, codec, self.tmp.path().join("work"), self.tmp.path().join("out")).unwrap()
        }

        fn output(&self) -> PathBuf {
            self.tmp.path().join("out").join(&self.metadata.filename)
        }
    }

    fn encode<S: PacketStore>(store: &mut S, codec: PacketCodec, len: usize, redundant: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let source = tmp.path().join("payload.bin");
        std::fs::write(&source, &content).unwrap();
        let metadata = FileEncoder::new(codec, ROUTE_PAYLOAD, redundant)
            .encode_file(&source, store)
            .unwrap();
        Fixture { tmp, content, metadata }
    }

    fn codec() -> PacketCodec {
        PacketCodec::new(DEFAULT_PACKET_SIZE).unwrap()
    }

    #[test]
    fn test_roundtrip_sizes_and_modes() {
        for redundant in [false, true] {
            for len in [0, 1, 37, 38, 113, 114, 115, 300, 5000] {
                let mut store = MemoryStore::new();
                let fx = encode(&mut store, codec(), len, redundant);
                let mut decoder = fx.decoder(store, codec());

                let status = decoder.decode().unwrap();
                assert_eq!(status, DecodeStatus::Complete(fx.output()), "len {} redundant {}", len, redundant);
                assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
                assert!(!decoder.scaffold_paths(&fx.metadata).exists());
                assert!(!decoder.scaffold_paths(&fx.metadata).ledger.exists());
            }
        }
    }

    #[test]
    fn test_300_bytes_redundant_data_size_114() {
        // 10-byte header + 3 * 114 body + 4-byte trailer
        let codec = PacketCodec::new(HEADER_SIZE + 3 * 114 + CHECKSUM_SIZE).unwrap();
        assert_eq!(codec.data_size(true), 114);

        let tmp = tempfile::tempdir().unwrap();
        let mut store = DirStore::open(tmp.path().join("inbox")).unwrap();
        let fx = encode(&mut store, codec, 300, true);

        assert_eq!(store.list().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(fx.metadata.packet_count, 4);
        assert!(codec.decode(&store.get(3).unwrap()).unwrap().is_terminal());

        let mut decoder = fx.decoder(store, codec);
        assert_eq!(decoder.decode().unwrap(), DecodeStatus::Complete(fx.output()));
        assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
    }

    #[test]
    fn test_missing_packets_then_fill() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 1000, false);
        let held_back: Vec<(u32, Vec<u8>)> = [3, 7].iter().map(|&id| (id, store.get(id).unwrap())).collect();
        for (id, _) in &held_back {
            store.delete(*id).unwrap();
        }

        let mut decoder = fx.decoder(store, codec());
        let report = decoder.bulk_decode().unwrap();
        assert_eq!(report.missing, vec![3, 7]);

        let paths = decoder.scaffold_paths(&fx.metadata);
        assert!(paths.scaffold.exists());
        assert_eq!(std::fs::read_to_string(&paths.ledger).unwrap(), "3\n7\n");
        assert!(!fx.output().exists());

        for (id, raw) in &held_back {
            decoder.store_mut().put(*id, raw).unwrap();
        }
        let status = decoder.poll_fill(report.missing, FillMode::Rush, &CancelToken::new()).unwrap();
        assert_eq!(status, DecodeStatus::Complete(fx.output()));
        assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
    }

    #[test]
    fn test_fill_only_touches_given_ids() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 1000, false);
        let raw3 = store.get(3).unwrap();
        let raw7 = store.get(7).unwrap();
        store.delete(3).unwrap();
        store.delete(7).unwrap();

        let mut decoder = fx.decoder(store, codec());
        decoder.bulk_decode().unwrap();

        decoder.store_mut().put(3, &raw3).unwrap();
        decoder.store_mut().put(7, &raw7).unwrap();
        assert!(decoder.fill(&[3]).unwrap().is_empty());

        let paths = decoder.scaffold_paths(&fx.metadata);
        assert_eq!(std::fs::read_to_string(&paths.ledger).unwrap(), "7\n");

        // Packet 7 is available but was not asked for
        let status = decoder.poll_fill(vec![], FillMode::Rush, &CancelToken::new()).unwrap();
        assert_eq!(status, DecodeStatus::Incomplete(vec![7]));
        assert!(matches!(decoder.finalize(), Err(QuipError::Incomplete { ref missing }) if missing == &vec![7]));

        assert_eq!(decoder.poll_fill(vec![7], FillMode::Rush, &CancelToken::new()).unwrap(),
            DecodeStatus::Complete(fx.output()));
    }

    #[test]
    fn test_fill_drops_foreign_ids() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 200, false);
        store.delete(1).unwrap();
        let mut decoder = fx.decoder(store, codec());
        assert_eq!(decoder.bulk_decode().unwrap().missing, vec![1]);
        assert_eq!(decoder.fill(&[0, 1, 99]).unwrap(), vec![1]);
    }

    #[test]
    fn test_corrupted_trailer_is_missing() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 600, true);
        let mut raw = store.get(2).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        store.put(2, &raw).unwrap();

        assert!(matches!(codec().decode(&raw), Err(QuipError::Corrupted(_))));

        let mut decoder = fx.decoder(store, codec());
        assert_eq!(decoder.decode().unwrap(), DecodeStatus::Incomplete(vec![2]));
    }

    #[test]
    fn test_single_replica_damage_is_repaired() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 300, true);
        let codec = codec();

        // Rewrite packet 4 with damage in its second replica and a fresh checksum
        let mut raw = store.get(4).unwrap();
        for b in &mut raw[HEADER_SIZE + 38..HEADER_SIZE + 50] {
            *b ^= 0xA5;
        }
        let end = raw.len() - CHECKSUM_SIZE;
        let crc = crc32fast::hash(&raw[..end]);
        raw[end..].copy_from_slice(&crc.to_be_bytes());
        store.put(4, &raw).unwrap();

        let mut decoder = fx.decoder(store, codec);
        assert_eq!(decoder.decode().unwrap(), DecodeStatus::Complete(fx.output()));
        assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
    }

    #[test]
    fn test_misplaced_packet_is_missing() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 500, false);
        let raw = store.get(2).unwrap();
        store.put(3, &raw).unwrap();

        let mut decoder = fx.decoder(store, codec());
        assert_eq!(decoder.bulk_decode().unwrap().missing, vec![3]);
    }

    #[test]
    fn test_metadata_absent_or_corrupted_is_fatal() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 300, false);

        let mut raw = store.get(0).unwrap();
        raw[20] ^= 0xFF;
        store.put(0, &raw).unwrap();
        let mut decoder = fx.decoder(store, codec());
        assert!(matches!(decoder.bulk_decode(), Err(QuipError::Corrupted(_))));

        decoder.store_mut().delete(0).unwrap();
        assert!(matches!(decoder.bulk_decode(), Err(QuipError::NotFound(_))));
        assert!(!decoder.work_dir().join("payload.bin.scaffold").exists());
    }

    #[test]
    fn test_checksum_mismatch_keeps_scaffold() {
        let mut store = MemoryStore::new();
        let codec = codec();
        let fx = encode(&mut store, codec, 400, false);

        let forged = TransferMetadata { checksum: fx.metadata.checksum ^ 1, ..fx.metadata.clone() };
        let payload = MetadataCodec::encode(&forged).unwrap();
        let raw = codec.encode(&payload, RESET_ID, ROUTE_PAYLOAD, OP_METADATA, false).unwrap();
        store.put(RESET_ID, &raw).unwrap();

        let mut decoder = fx.decoder(store, codec);
        assert!(matches!(decoder.decode(), Err(QuipError::Corrupted(_))));

        let paths = decoder.scaffold_paths(&fx.metadata);
        assert!(paths.scaffold.exists());
        assert!(paths.ledger.exists());
        assert!(!fx.output().exists());
    }

    #[test]
    fn test_existing_output_is_replaced() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 250, false);
        std::fs::create_dir_all(fx.output().parent().unwrap()).unwrap();
        std::fs::write(fx.output(), b"stale copy").unwrap();

        let mut decoder = fx.decoder(store, codec());
        decoder.decode().unwrap();
        assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
    }

    #[test]
    fn test_new_bulk_pass_starts_fresh() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 500, false);
        let raw = store.get(2).unwrap();
        store.delete(2).unwrap();

        let mut decoder = fx.decoder(store, codec());
        assert_eq!(decoder.bulk_decode().unwrap().missing, vec![2]);

        decoder.store_mut().put(2, &raw).unwrap();
        assert!(decoder.bulk_decode().unwrap().missing.is_empty());
        let paths = decoder.scaffold_paths(&fx.metadata);
        assert_eq!(std::fs::read_to_string(&paths.ledger).unwrap(), "");
    }

    #[test]
    fn test_poll_fill_picks_up_stragglers() {
        let tmp = tempfile::tempdir().unwrap();
        let store_dir = tmp.path().join("inbox");
        let mut store = DirStore::open(&store_dir).unwrap();
        let fx = encode(&mut store, codec(), 800, false);
        let late = store.get(5).unwrap();
        store.delete(5).unwrap();

        let mut decoder = fx.decoder(store, codec());
        let missing = decoder.bulk_decode().unwrap().missing;
        assert_eq!(missing, vec![5]);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            let mut store = DirStore::open(store_dir).unwrap();
            store.put(5, &late).unwrap();
        });

        let mode = FillMode::Poll { interval: Duration::from_millis(20) };
        let status = decoder.poll_fill(missing, mode, &CancelToken::new()).unwrap();
        writer.join().unwrap();

        assert_eq!(status, DecodeStatus::Complete(fx.output()));
        assert_eq!(std::fs::read(fx.output()).unwrap(), fx.content);
    }

    #[test]
    fn test_poll_fill_cancelled() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 800, false);
        store.delete(4).unwrap();

        let mut decoder = fx.decoder(store, codec());
        let missing = decoder.bulk_decode().unwrap().missing;

        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let mode = FillMode::Poll { interval: Duration::from_secs(60) };
        let status = decoder.poll_fill(missing, mode, &cancel).unwrap();
        stopper.join().unwrap();

        assert_eq!(status, DecodeStatus::Incomplete(vec![4]));
        assert!(decoder.scaffold_paths(&fx.metadata).scaffold.exists());
    }

    #[test]
    fn test_poll_fill_already_cancelled_does_nothing() {
        let mut store = MemoryStore::new();
        let fx = encode(&mut store, codec(), 300, false);
        let mut decoder = fx.decoder(store, codec());

        let cancel = CancelToken::new();
        cancel.cancel();
        // No scaffold exists yet, so any fill attempt would fail with NotFound
        let status = decoder.poll_fill(vec![1], FillMode::Rush, &cancel).unwrap();
        assert_eq!(status, DecodeStatus::Incomplete(vec![1]));
    }
}
