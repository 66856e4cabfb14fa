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

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum QuipError {
    /// Checksum, vote, or structural mismatch. The packet is treated as absent.
    #[error("corrupted: {0}")]
    Corrupted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {len} bytes exceeds capacity of {max} bytes")]
    ValueTooLarge { len: usize, max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("out of sequence: expected id {expected}, got {actual}")]
    OutOfSequence { expected: u32, actual: u32 },

    #[error("transfer incomplete, {} packet(s) missing", missing.len())]
    Incomplete { missing: Vec<u32> },
}

pub type Result<T> = std::result::Result<T, QuipError>;

impl QuipError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        QuipError::Corrupted(reason.into())
    }

    /// Whether the failure only means "this packet is not usable yet".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QuipError::Corrupted(_) | QuipError::NotFound(_))
    }
}

/// Outcome of fetching one packet during reconstruction.
///
/// A recoverable fault becomes a ledger entry; a fatal one ends the pass.
#[derive(Debug)]
pub enum Fault {
    Recoverable { sequence_id: u32, reason: QuipError },
    Fatal(QuipError),
}

impl Fault {
    pub fn classify(sequence_id: u32, err: QuipError) -> Self {
        if err.is_recoverable() {
            Fault::Recoverable { sequence_id, reason: err }
        } else {
            Fault::Fatal(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let fault = Fault::classify(3, QuipError::corrupted("bad crc"));
        assert!(matches!(fault, Fault::Recoverable { sequence_id: 3, .. }));

        let fault = Fault::classify(4, QuipError::NotFound("4.pkt".into()));
        assert!(matches!(fault, Fault::Recoverable { sequence_id: 4, .. }));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let fault = Fault::classify(5, QuipError::from(io));
        assert!(matches!(fault, Fault::Fatal(QuipError::Io(_))));
    }

    #[test]
    fn test_display() {
        let err = QuipError::ValueTooLarge { len: 200, max: 114 };
        assert_eq!(err.to_string(), "payload of 200 bytes exceeds capacity of 114 bytes");

        let err = QuipError::Incomplete { missing: vec![3, 7] };
        assert_eq!(err.to_string(), "transfer incomplete, 2 packet(s) missing");
    }
}
