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

//! Transfer settings shared by the encoder, decoder and link commands.

use std::time::Duration;

use crate::decoder::FillMode;
use crate::error::Result;
use crate::flow::FlowConfig;
use crate::packet::PacketCodec;
use crate::protocol::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub packet_size: usize,
    pub routing: u8,
    pub redundant: bool,
    pub destination: String,
    pub packets_per_ack: usize,
    /// Delay between fill attempts; `None` means a single rush attempt
    pub poll_interval: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            packet_size: DEFAULT_PACKET_SIZE,
            routing: ROUTE_PAYLOAD,
            redundant: false,
            destination: ".".to_string(),
            packets_per_ack: DEFAULT_PACKETS_PER_ACK,
            poll_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl TransferConfig {
    pub fn codec(&self) -> Result<PacketCodec> {
        PacketCodec::new(self.packet_size)
    }

    pub fn fill_mode(&self) -> FillMode {
        match self.poll_interval {
            Some(interval) => FillMode::Poll { interval },
            None => FillMode::Rush,
        }
    }

    pub fn flow(&self) -> Result<FlowConfig> {
        Ok(FlowConfig {
            packets_per_ack: self.packets_per_ack,
            codec: self.codec()?,
            routing: self.routing,
        })
    }
}
