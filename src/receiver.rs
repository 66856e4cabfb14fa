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

//! Receive-side link handling: frame packets off the wire, stage them, ack.

use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::QuipError;
use crate::packet::{DecodingSession, PacketCodec};
use crate::protocol::*;
use crate::serial::Link;
use crate::store::PacketStore;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Quip(#[from] QuipError),

    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitPacket;
pub struct StorePacket;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    link: Box<dyn Link>,
    store: Box<dyn PacketStore + Send>,
    codec: PacketCodec,
    session: DecodingSession,
    buffer: Vec<u8>,
    filled: usize,
    idle_timeouts: u32,
    max_idle_timeouts: u32,
    accepted: usize,
    rejected: usize,
    // Set after a failed decode until a frame decodes again
    hunting: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            link: self.link,
            store: self.store,
            codec: self.codec,
            session: self.session,
            buffer: self.buffer,
            filled: self.filled,
            idle_timeouts: self.idle_timeouts,
            max_idle_timeouts: self.max_idle_timeouts,
            accepted: self.accepted,
            rejected: self.rejected,
            hunting: self.hunting,
        })
    }

    /// Drop the leading byte and everything before the next byte that could
    /// start a frame, keeping the rest as the start of the next frame.
    fn slide(&mut self) {
        let len = self.buffer.len();
        match self.buffer[1..].iter().position(|&b| is_valid_route(b)) {
            Some(offset) => {
                let start = offset + 1;
                self.buffer.copy_within(start.., 0);
                self.filled = len - start;
            }
            None => self.filled = 0,
        }
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<AwaitPacket> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;
        let filled = fsm.filled;

        match fsm.link.read_timeout(&mut fsm.buffer[filled..], READ_TIMEOUT) {
            Ok(n) => {
                fsm.idle_timeouts = 0;
                fsm.filled += n;
                if fsm.filled == fsm.buffer.len() {
                    let next = fsm.transition::<StorePacket>();
                    Ok(next as Box<dyn ReceiverState>)
                } else {
                    Ok(Box::new(fsm) as Box<dyn ReceiverState>)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Silence ends a burst; a partial frame will never complete
                if fsm.filled > 0 {
                    warn!(bytes = fsm.filled, "discarding partial packet");
                    fsm.filled = 0;
                }
                fsm.idle_timeouts += 1;
                if fsm.idle_timeouts > fsm.max_idle_timeouts {
                    return Err(fsm.io_error(e));
                }
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl ReceiverState for ReceiverFsm<StorePacket> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let packet = match fsm.codec.decode(&fsm.buffer) {
            Ok(packet) => packet,
            Err(e) => {
                if !fsm.hunting {
                    warn!(error = %e, "dropping corrupted packet, hunting for next frame");
                    fsm.rejected += 1;
                    fsm.hunting = true;
                }
                fsm.slide();
                let next = fsm.transition::<AwaitPacket>();
                return Ok(next as Box<dyn ReceiverState>);
            }
        };
        fsm.filled = 0;
        if fsm.hunting {
            info!(id = packet.sequence_id, "frame alignment recovered");
            fsm.hunting = false;
        }

        let id = packet.sequence_id;
        if let Err(QuipError::OutOfSequence { expected, actual }) = fsm.session.accept(id) {
            warn!(expected, actual, "sequence gap on link");
            fsm.session.resync(actual);
        }

        if packet.is_complete_marker() {
            info!(
                accepted = fsm.accepted,
                rejected = fsm.rejected,
                last = ?fsm.session.last_accepted(),
                "completion marker received"
            );
            return Err(ReceiverError::TransferComplete);
        }

        fsm.store.put(id, &fsm.buffer)?;
        if let Err(e) = fsm.link.write_all(&[ack_for(id)]) {
            // The packet is already staged; a lost ack only slows the sender
            warn!(id, error = %e, "ack write failed");
        }
        fsm.accepted += 1;
        debug!(id, opcode = %(packet.opcode as char), "stored packet");

        let next = fsm.transition::<AwaitPacket>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<AwaitPacket> {
    /// `max_idle_timeouts` consecutive one-second read timeouts end the session.
    pub fn new(
        link: Box<dyn Link>,
        store: Box<dyn PacketStore + Send>,
        codec: PacketCodec,
        max_idle_timeouts: u32,
    ) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<AwaitPacket>,
            link,
            store,
            codec,
            session: DecodingSession::new(),
            buffer: vec![0; codec.packet_size()],
            filled: 0,
            idle_timeouts: 0,
            max_idle_timeouts,
            accepted: 0,
            rejected: 0,
            hunting: false,
        })
    }
}

/// Step the receiver until the completion marker arrives.
pub fn run(mut state: Box<dyn ReceiverState>) -> Result<(), ReceiverError> {
    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(ReceiverError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockLink;
    use crate::store::{DirStore, MemoryStore};

    fn codec() -> PacketCodec {
        PacketCodec::new(DEFAULT_PACKET_SIZE).unwrap()
    }

    fn packet(id: u32, opcode: u8) -> Vec<u8> {
        codec().encode(&[id as u8; 9], id, ROUTE_COMPANION, opcode, false).unwrap()
    }

    fn wire(frames: &[Vec<u8>]) -> Vec<Option<u8>> {
        frames.iter().flatten().map(|&b| Some(b)).collect()
    }

    #[test]
    fn test_receive_and_ack() {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().join("inbox");
        let frames = vec![
            packet(0, OP_METADATA),
            packet(1, OP_DATA),
            packet(2, OP_END),
            packet(3, OP_COMPLETE),
        ];

        let link = Box::new(MockLink::new(wire(&frames), vec![ack_for(0), ack_for(1), ack_for(2)]));
        let store = Box::new(DirStore::open(&inbox).unwrap());
        run(ReceiverFsm::new(link, store, codec(), 2)).unwrap();

        let store = DirStore::open(&inbox).unwrap();
        assert_eq!(store.list().unwrap(), vec![0, 1, 2]);
        assert_eq!(store.get(2).unwrap(), frames[2]);
    }

    #[test]
    fn test_corrupted_packet_not_acked() {
        let mut bad = packet(1, OP_DATA);
        bad[40] ^= 0x08;
        let frames = vec![packet(0, OP_METADATA), bad, packet(2, OP_END), packet(3, OP_COMPLETE)];

        let link = Box::new(MockLink::new(wire(&frames), vec![ack_for(0), ack_for(2)]));
        run(ReceiverFsm::new(link, Box::new(MemoryStore::new()), codec(), 2)).unwrap();
    }

    #[test]
    fn test_failed_ack_keeps_receiving() {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().join("inbox");
        let frames = vec![
            packet(0, OP_METADATA),
            packet(1, OP_DATA),
            packet(2, OP_END),
            packet(3, OP_COMPLETE),
        ];

        let link = Box::new(MockLink::new(wire(&frames), vec![ack_for(1), ack_for(2)]).failing(&[0]));
        let store = Box::new(DirStore::open(&inbox).unwrap());
        run(ReceiverFsm::new(link, store, codec(), 2)).unwrap();

        assert_eq!(DirStore::open(&inbox).unwrap().list().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_realigns_after_lost_byte() {
        let tmp = tempfile::tempdir().unwrap();
        let inbox = tmp.path().join("inbox");
        let mut short = packet(1, OP_DATA);
        short.remove(60);
        let frames = vec![
            packet(0, OP_METADATA),
            short,
            packet(2, OP_DATA),
            packet(3, OP_END),
            packet(4, OP_COMPLETE),
        ];

        // No silence on the line, so only the byte stream can realign
        let link = Box::new(MockLink::new(wire(&frames), vec![ack_for(0), ack_for(2), ack_for(3)]));
        let store = Box::new(DirStore::open(&inbox).unwrap());
        run(ReceiverFsm::new(link, store, codec(), 2)).unwrap();

        let store = DirStore::open(&inbox).unwrap();
        assert_eq!(store.list().unwrap(), vec![0, 2, 3]);
        assert_eq!(store.get(3).unwrap(), frames[3]);
    }

    #[test]
    fn test_partial_frame_discarded_on_silence() {
        let mut responses: Vec<Option<u8>> = packet(1, OP_DATA)[..50].iter().map(|&b| Some(b)).collect();
        responses.push(None);
        responses.extend(wire(&[packet(2, OP_DATA), packet(3, OP_COMPLETE)]));

        let link = Box::new(MockLink::new(responses, vec![ack_for(2)]));
        run(ReceiverFsm::new(link, Box::new(MemoryStore::new()), codec(), 2)).unwrap();
    }

    #[test]
    fn test_idle_limit() {
        let link = Box::new(MockLink::new(vec![None, None, None], vec![]));
        let result = run(ReceiverFsm::new(link, Box::new(MemoryStore::new()), codec(), 2));
        match result {
            Err(ReceiverError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_idle_timeouts_reset_by_traffic() {
        let mut responses = vec![None, None];
        responses.extend(wire(&[packet(0, OP_METADATA)]));
        responses.extend([None, None]);
        responses.extend(wire(&[packet(1, OP_COMPLETE)]));

        let link = Box::new(MockLink::new(responses, vec![ack_for(0)]));
        run(ReceiverFsm::new(link, Box::new(MemoryStore::new()), codec(), 2)).unwrap();
    }
}
