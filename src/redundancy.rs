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

//! Triple replication with majority-vote recovery.
//!
//! The payload is written three times back to back. Votes are taken at
//! offsets `i`, `i + L` and `i + 2L`, so a burst that damages a contiguous
//! run of bytes only ever reaches one of the three replicas.

use crate::error::{QuipError, Result};

/// Expand `payload` into three consecutive copies.
pub fn expand(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 3);
    for _ in 0..3 {
        out.extend_from_slice(payload);
    }
    out
}

/// Recover `len` bytes from a body produced by [`expand`].
///
/// Fails with `Corrupted` if the body is too short or if any offset has three
/// distinct votes.
pub fn resolve(body: &[u8], len: usize) -> Result<Vec<u8>> {
    if body.len() < len * 3 {
        return Err(QuipError::corrupted(format!(
            "redundant body holds {} bytes, need {}",
            body.len(),
            len * 3
        )));
    }

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(vote(body[i], body[i + len], body[i + 2 * len]).ok_or_else(|| {
            QuipError::corrupted(format!("replicas disagree at offset {}", i))
        })?);
    }
    Ok(out)
}

fn vote(a: u8, b: u8, c: u8) -> Option<u8> {
    if a == b || a == c {
        Some(a)
    } else if b == c {
        Some(b)
    } else {
        None
    }
}
