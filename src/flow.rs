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

//! Transmit-side pacing: one batch of packets per ready signal.

use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::QuipError;
use crate::packet::{PacketCodec, next_sequence_id};
use crate::protocol::*;
use crate::serial::Link;
use crate::signal::{CancelToken, ReadySignal};
use crate::store::PacketStore;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Quip(#[from] QuipError),

    #[error("Transfer complete")]
    TransferComplete,

    #[error("Transfer cancelled")]
    Cancelled,
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitReady;
pub struct TransmitBatch;
pub struct SendCompletion;

// ============================================================================
// FSM Structure
// ============================================================================

/// Settings the flow controller needs beyond its collaborators
#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    pub packets_per_ack: usize,
    pub codec: PacketCodec,
    pub routing: u8,
}

pub struct FlowFsm<State> {
    state: PhantomData<State>,
    link: Box<dyn Link>,
    store: Box<dyn PacketStore + Send>,
    signal: ReadySignal,
    cancel: CancelToken,
    config: FlowConfig,
    // Descending, so the tail holds the lowest ids
    pending: Vec<u32>,
    highest_sent: Option<u32>,
    batches_sent: usize,
}

// ============================================================================
// Trait
// ============================================================================

pub trait FlowState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn FlowState>, FlowError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> FlowFsm<S> {
    fn transition<T>(self) -> Box<FlowFsm<T>> {
        Box::new(FlowFsm {
            state: PhantomData,
            link: self.link,
            store: self.store,
            signal: self.signal,
            cancel: self.cancel,
            config: self.config,
            pending: self.pending,
            highest_sent: self.highest_sent,
            batches_sent: self.batches_sent,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl FlowState for FlowFsm<AwaitReady> {
    fn step(self: Box<Self>) -> Result<Box<dyn FlowState>, FlowError> {
        let fsm = *self;
        if !fsm.signal.wait(&fsm.cancel) {
            info!(pending = fsm.pending.len(), "flow cancelled");
            return Err(FlowError::Cancelled);
        }

        if fsm.pending.is_empty() {
            let next = fsm.transition::<SendCompletion>();
            Ok(next as Box<dyn FlowState>)
        } else {
            let next = fsm.transition::<TransmitBatch>();
            Ok(next as Box<dyn FlowState>)
        }
    }
}

impl FlowState for FlowFsm<TransmitBatch> {
    fn step(self: Box<Self>) -> Result<Box<dyn FlowState>, FlowError> {
        let mut fsm = *self;
        let take = fsm.config.packets_per_ack.min(fsm.pending.len());
        let split = fsm.pending.len() - take;

        let mut batch = Vec::with_capacity(take * fsm.config.codec.packet_size());
        let mut ids = Vec::with_capacity(take);
        for &id in fsm.pending[split..].iter().rev() {
            match fsm.store.get(id) {
                Ok(raw) => {
                    batch.extend_from_slice(&raw);
                    ids.push(id);
                }
                Err(QuipError::NotFound(what)) => {
                    warn!(id, %what, "packet vanished from store, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        match fsm.link.write_all(&batch) {
            Ok(()) => {
                fsm.pending.truncate(split);
                fsm.highest_sent = ids.iter().copied().chain(fsm.highest_sent).max();
                fsm.batches_sent += 1;
                debug!(?ids, remaining = fsm.pending.len(), "sent batch");
            }
            Err(e) => {
                // Batch stays pending and goes out again on the next signal
                warn!(error = %e, ?ids, "batch write failed, will retry");
            }
        }

        let next = fsm.transition::<AwaitReady>();
        Ok(next as Box<dyn FlowState>)
    }
}

impl FlowState for FlowFsm<SendCompletion> {
    fn step(self: Box<Self>) -> Result<Box<dyn FlowState>, FlowError> {
        let mut fsm = *self;
        let id = fsm.highest_sent.map(next_sequence_id).unwrap_or(RESET_ID);
        let marker = fsm.config.codec.encode(&[], id, fsm.config.routing, OP_COMPLETE, false)?;

        match fsm.link.write_all(&marker) {
            Ok(()) => {
                info!(batches = fsm.batches_sent, marker_id = id, "flow complete");
                Err(FlowError::TransferComplete)
            }
            Err(e) => {
                warn!(error = %e, "completion marker write failed, will retry");
                if !fsm.signal.wait(&fsm.cancel) {
                    return Err(FlowError::Cancelled);
                }
                Ok(Box::new(fsm) as Box<dyn FlowState>)
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl FlowFsm<AwaitReady> {
    pub fn new(
        link: Box<dyn Link>,
        store: Box<dyn PacketStore + Send>,
        signal: ReadySignal,
        cancel: CancelToken,
        config: FlowConfig,
    ) -> Result<Box<dyn FlowState>, FlowError> {
        if config.packets_per_ack == 0 {
            return Err(QuipError::InvalidConfig("packets per acknowledgement must be at least 1".into()).into());
        }

        let mut pending = store.list()?;
        pending.reverse();
        info!(packets = pending.len(), ppa = config.packets_per_ack, "flow starting");

        Ok(Box::new(FlowFsm {
            state: PhantomData::<AwaitReady>,
            link,
            store,
            signal,
            cancel,
            config,
            pending,
            highest_sent: None,
            batches_sent: 0,
        }))
    }
}

/// Step the controller until the completion marker is out.
pub fn run(mut state: Box<dyn FlowState>) -> Result<(), FlowError> {
    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(FlowError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
