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

//! QUIP: packetized file transfer for a lossy half-duplex serial link.
//!
//! Files are split into fixed-size packets staged in a packet store,
//! paced onto the link in batches, and rebuilt on the far side in a
//! scaffold that tolerates missing, late, and out-of-order packets.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod redundancy;
pub mod scaffold;
pub mod serial;
pub mod signal;
pub mod store;

pub use error::{Fault, QuipError, Result};
