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

//! Reconstruction buffer for one inbound transfer.
//!
//! Data id `n` owns bytes `[(n - 1) * data_size, n * data_size)`. Spans that
//! have not arrived hold `PAD` so later spans keep their offsets. The set of
//! missing ids is the ledger, persisted next to the scaffold file so a fill
//! pass can resume after a restart.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{QuipError, Result};
use crate::protocol::PAD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    data_size: usize,
    buffer: Vec<u8>,
    missing: BTreeSet<u32>,
}

impl Scaffold {
    pub fn new(data_size: usize) -> Self {
        Scaffold {
            data_size,
            buffer: Vec::new(),
            missing: BTreeSet::new(),
        }
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    fn span(&self, id: u32) -> Result<Range<usize>> {
        if id == 0 {
            return Err(QuipError::InvalidConfig("sequence id 0 carries no file data".into()));
        }
        let start = (id as usize - 1) * self.data_size;
        Ok(start..start + self.data_size)
    }

    fn reserve(&mut self, span: &Range<usize>) {
        if self.buffer.len() < span.end {
            self.buffer.resize(span.end, PAD);
        }
    }

    /// Write the payload of data packet `id` into its span.
    pub fn insert(&mut self, id: u32, data: &[u8]) -> Result<()> {
        if data.len() > self.data_size {
            return Err(QuipError::ValueTooLarge { len: data.len(), max: self.data_size });
        }
        let span = self.span(id)?;
        self.reserve(&span);

        let region = &mut self.buffer[span];
        region[..data.len()].copy_from_slice(data);
        region[data.len()..].fill(PAD);
        self.missing.remove(&id);
        Ok(())
    }

    /// Record `id` as missing and hold its span with placeholder bytes.
    pub fn mark_missing(&mut self, id: u32) -> Result<()> {
        let span = self.span(id)?;
        self.reserve(&span);
        self.buffer[span].fill(PAD);
        self.missing.insert(id);
        Ok(())
    }

    pub fn missing(&self) -> Vec<u32> {
        self.missing.iter().copied().collect()
    }

    pub fn is_missing(&self, id: u32) -> bool {
        self.missing.contains(&id)
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn save(&self, paths: &ScaffoldPaths) -> Result<()> {
        write_atomic(&paths.scaffold, &self.buffer)?;
        write_ledger(&paths.ledger, &self.missing)
    }

    pub fn load(paths: &ScaffoldPaths, data_size: usize) -> Result<Self> {
        let buffer = fs::read(&paths.scaffold).map_err(|e| match e.kind() {
            ErrorKind::NotFound => QuipError::NotFound(paths.scaffold.display().to_string()),
            _ => QuipError::Io(e),
        })?;
        let missing = read_ledger(&paths.ledger)?;
        Ok(Scaffold { data_size, buffer, missing })
    }
}

// ============================================================================
// On-disk layout
// ============================================================================

/// Scaffold and ledger files for one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldPaths {
    pub scaffold: PathBuf,
    pub ledger: PathBuf,
}

impl ScaffoldPaths {
    pub fn new(work_dir: &Path, filename: &str) -> Self {
        ScaffoldPaths {
            scaffold: work_dir.join(format!("{}.scaffold", filename)),
            ledger: work_dir.join(format!("{}.missing", filename)),
        }
    }

    pub fn exists(&self) -> bool {
        self.scaffold.exists()
    }

    /// Remove both files; absent files are fine.
    pub fn discard(&self) -> Result<()> {
        for path in [&self.scaffold, &self.ledger] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub fn read_ledger(path: &Path) -> Result<BTreeSet<u32>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u32>()
                .map_err(|_| QuipError::corrupted(format!("bad ledger entry '{}' in {}", line, path.display())))
        })
        .collect()
}

pub fn write_ledger(path: &Path, missing: &BTreeSet<u32>) -> Result<()> {
    let mut text = String::new();
    for id in missing {
        text.push_str(&id.to_string());
        text.push('\n');
    }
    write_atomic(path, text.as_bytes())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_aligns_spans() {
        let mut scaffold = Scaffold::new(4);
        scaffold.insert(2, b"efgh").unwrap();
        assert_eq!(scaffold.as_bytes(), &[PAD, PAD, PAD, PAD, b'e', b'f', b'g', b'h']);
        scaffold.insert(1, b"abcd").unwrap();
        scaffold.insert(3, b"ij").unwrap();
        assert_eq!(&scaffold.as_bytes()[..10], b"abcdefghij");
        assert_eq!(scaffold.as_bytes().len(), 12);
    }

    #[test]
    fn test_out_of_order_matches_in_order() {
        let chunks: Vec<Vec<u8>> = (0..9u8).map(|i| vec![i; if i == 8 { 3 } else { 5 }]).collect();

        let mut ordered = Scaffold::new(5);
        for (i, chunk) in chunks.iter().enumerate() {
            ordered.insert(i as u32 + 1, chunk).unwrap();
        }

        let mut shuffled = Scaffold::new(5);
        for &i in &[7usize, 2, 8, 0, 5, 3, 1, 6, 4] {
            shuffled.insert(i as u32 + 1, &chunks[i]).unwrap();
        }

        assert_eq!(ordered.into_bytes(), shuffled.into_bytes());
    }

    #[test]
    fn test_missing_then_filled() {
        let mut scaffold = Scaffold::new(3);
        scaffold.insert(1, b"abc").unwrap();
        scaffold.mark_missing(2).unwrap();
        scaffold.insert(3, b"ghi").unwrap();
        assert_eq!(scaffold.missing(), vec![2]);
        assert!(!scaffold.is_complete());
        assert_eq!(&scaffold.as_bytes()[3..6], &[PAD; 3]);

        scaffold.insert(2, b"def").unwrap();
        assert!(scaffold.is_complete());
        assert_eq!(scaffold.as_bytes(), b"abcdefghi");
    }

    #[test]
    fn test_insert_rejects_oversize_and_id_zero() {
        let mut scaffold = Scaffold::new(3);
        assert!(matches!(scaffold.insert(1, b"abcd"), Err(QuipError::ValueTooLarge { len: 4, max: 3 })));
        assert!(matches!(scaffold.insert(0, b"a"), Err(QuipError::InvalidConfig(_))));
    }

    #[test]
    fn test_save_load() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ScaffoldPaths::new(tmp.path(), "img.raw");
        assert_eq!(paths.scaffold, tmp.path().join("img.raw.scaffold"));
        assert_eq!(paths.ledger, tmp.path().join("img.raw.missing"));

        let mut scaffold = Scaffold::new(2);
        scaffold.insert(1, b"ab").unwrap();
        scaffold.mark_missing(2).unwrap();
        scaffold.mark_missing(4).unwrap();
        scaffold.insert(3, b"ef").unwrap();
        scaffold.save(&paths).unwrap();

        assert_eq!(std::fs::read_to_string(&paths.ledger).unwrap(), "2\n4\n");
        let loaded = Scaffold::load(&paths, 2).unwrap();
        assert_eq!(loaded, scaffold);

        paths.discard().unwrap();
        assert!(!paths.exists());
        paths.discard().unwrap();
    }

    #[test]
    fn test_load_missing_scaffold() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ScaffoldPaths::new(tmp.path(), "nothing");
        assert!(matches!(Scaffold::load(&paths, 8), Err(QuipError::NotFound(_))));
    }

    #[test]
    fn test_ledger_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.missing");
        std::fs::write(&path, "3\nseven\n").unwrap();
        assert!(matches!(read_ledger(&path), Err(QuipError::Corrupted(_))));
        assert!(read_ledger(&tmp.path().join("absent.missing")).unwrap().is_empty());
    }
}
