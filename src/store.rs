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

//! Packet staging area on either side of the link.
//!
//! A directory of `<id>.pkt` files is the production store; the in-memory
//! store backs tests and loopback runs.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{QuipError, Result};
use crate::protocol::PACKET_EXT;

pub trait PacketStore {
    /// Raw bytes of packet `id`, or `NotFound`.
    fn get(&self, id: u32) -> Result<Vec<u8>>;

    fn put(&mut self, id: u32, raw: &[u8]) -> Result<()>;

    /// Ids currently present, ascending.
    fn list(&self) -> Result<Vec<u32>>;

    /// Remove packet `id`. Removing an absent packet is not an error.
    fn delete(&mut self, id: u32) -> Result<()>;

    /// Remove every packet, returning how many were removed.
    fn clear(&mut self) -> Result<usize> {
        let ids = self.list()?;
        for &id in &ids {
            self.delete(id)?;
        }
        Ok(ids.len())
    }
}

impl<S: PacketStore + ?Sized> PacketStore for &mut S {
    fn get(&self, id: u32) -> Result<Vec<u8>> {
        (**self).get(id)
    }

    fn put(&mut self, id: u32, raw: &[u8]) -> Result<()> {
        (**self).put(id, raw)
    }

    fn list(&self) -> Result<Vec<u32>> {
        (**self).list()
    }

    fn delete(&mut self, id: u32) -> Result<()> {
        (**self).delete(id)
    }
}

// ============================================================================
// Directory Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open `dir` as a packet store, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DirStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", id, PACKET_EXT))
    }
}

impl PacketStore for DirStore {
    fn get(&self, id: u32) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => QuipError::NotFound(path.display().to_string()),
            _ => QuipError::Io(e),
        })
    }

    fn put(&mut self, id: u32, raw: &[u8]) -> Result<()> {
        fs::write(self.path_for(id), raw)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PACKET_EXT) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn delete(&mut self, id: u32) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory Store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    packets: BTreeMap<u32, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl PacketStore for MemoryStore {
    fn get(&self, id: u32) -> Result<Vec<u8>> {
        self.packets
            .get(&id)
            .cloned()
            .ok_or_else(|| QuipError::NotFound(format!("packet {}", id)))
    }

    fn put(&mut self, id: u32, raw: &[u8]) -> Result<()> {
        self.packets.insert(id, raw.to_vec());
        Ok(())
    }

    fn list(&self) -> Result<Vec<u32>> {
        Ok(self.packets.keys().copied().collect())
    }

    fn delete(&mut self, id: u32) -> Result<()> {
        self.packets.remove(&id);
        Ok(())
    }
}
