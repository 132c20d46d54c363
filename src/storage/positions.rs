//! Positions file (`pos`)
//!
//! Each per-term block is reachable via the dictionary's `positions_offset`:
//! `{doc_count varint, for each doc: docId varint (absolute, not delta),
//!   pos_count varint, positions as delta+varint}`.
//!
//! Two access modes: a bulk read returning every document's positions, and a
//! targeted read that scans the block for one docId and short-circuits.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use super::codec::{read_delta_varint, read_varint_u32, write_varint_u32};
use super::footer::{append_crc32_footer, verify_crc32_footer};
use super::{FORMAT_VERSION, HEADER_LEN, POSITIONS_MAGIC};
use crate::error::{EngineError, Result};

/// Writer for positions files
pub struct PositionsWriter {
    file: File,
    file_name: String,
    body: Vec<u8>,
}

impl PositionsWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pos".to_string());
        Ok(Self {
            file,
            file_name,
            body: Vec::new(),
        })
    }

    /// Write one per-term block and return its file offset
    pub fn write_positions(&mut self, doc_ids: &[u32], positions: &[Vec<u32>]) -> Result<u64> {
        if doc_ids.len() != positions.len() {
            return Err(EngineError::Validation(format!(
                "docIds and positions length mismatch: {} vs {}",
                doc_ids.len(),
                positions.len()
            )));
        }
        for window in doc_ids.windows(2) {
            if window[1] <= window[0] {
                return Err(EngineError::Validation(
                    "docIds must be strictly increasing".into(),
                ));
            }
        }
        for doc_positions in positions {
            for window in doc_positions.windows(2) {
                if window[1] <= window[0] {
                    return Err(EngineError::Validation(
                        "positions within a document must be strictly increasing".into(),
                    ));
                }
            }
        }

        let offset = HEADER_LEN + self.body.len() as u64;
        write_varint_u32(&mut self.body, doc_ids.len() as u32)?;
        for (index, &doc_id) in doc_ids.iter().enumerate() {
            let doc_positions = &positions[index];
            write_varint_u32(&mut self.body, doc_id)?;
            write_varint_u32(&mut self.body, doc_positions.len() as u32)?;
            let mut current = 0u32;
            for (pos_index, &position) in doc_positions.iter().enumerate() {
                let delta = if pos_index == 0 {
                    position
                } else {
                    position - current
                };
                write_varint_u32(&mut self.body, delta)?;
                current = position;
            }
        }
        Ok(offset)
    }

    pub fn close(mut self) -> Result<()> {
        self.file.write_all(&POSITIONS_MAGIC.to_be_bytes())?;
        self.file.write_all(&FORMAT_VERSION.to_be_bytes())?;
        self.file.write_all(&self.body)?;
        append_crc32_footer(&mut self.file)?;
        verify_crc32_footer(&mut self.file, &self.file_name)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Random-access reader for positions files
pub struct PositionsReader {
    file: Mutex<File>,
    file_name: String,
    data_len: u64,
}

impl PositionsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pos".to_string());
        let mut file = File::open(path)?;
        let data_len = verify_crc32_footer(&mut file, &file_name)?;

        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if u32::from_be_bytes(magic) != POSITIONS_MAGIC {
            return Err(EngineError::format(&file_name, "positions magic mismatch"));
        }
        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        let version = u16::from_be_bytes(version);
        if version != FORMAT_VERSION {
            return Err(EngineError::format(
                &file_name,
                format!("unsupported positions version {version}"),
            ));
        }

        Ok(Self {
            file: Mutex::new(file),
            file_name,
            data_len,
        })
    }

    fn check_offset(&self, offset: u64) -> Result<()> {
        if offset < HEADER_LEN || offset >= self.data_len {
            return Err(EngineError::format(
                &self.file_name,
                format!("positions offset {offset} outside data region"),
            ));
        }
        Ok(())
    }

    /// Bulk read: every document's positions in the block at `offset`
    pub fn read_positions(&self, offset: u64) -> Result<BTreeMap<u32, Vec<u32>>> {
        self.check_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        let doc_count = read_varint_u32(&mut reader)? as usize;
        let mut by_doc = BTreeMap::new();
        for _ in 0..doc_count {
            let doc_id = read_varint_u32(&mut reader)?;
            let pos_count = read_varint_u32(&mut reader)? as usize;
            let positions = read_delta_varint(&mut reader, pos_count)?;
            by_doc.insert(doc_id, positions);
        }
        Ok(by_doc)
    }

    /// Targeted read: scan the block at `offset` for `doc_id`, returning an
    /// empty array when the document is absent
    pub fn read_positions_for_doc(&self, offset: u64, doc_id: u32) -> Result<Vec<u32>> {
        self.check_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        let doc_count = read_varint_u32(&mut reader)? as usize;
        for _ in 0..doc_count {
            let current_doc = read_varint_u32(&mut reader)?;
            let pos_count = read_varint_u32(&mut reader)? as usize;
            let positions = read_delta_varint(&mut reader, pos_count)?;
            if current_doc == doc_id {
                return Ok(positions);
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos");

        let doc_ids = vec![1u32, 4, 9];
        let positions = vec![vec![0u32, 5, 11], vec![2u32], vec![7u32, 8]];
        let mut writer = PositionsWriter::create(&path).unwrap();
        let offset = writer.write_positions(&doc_ids, &positions).unwrap();
        writer.close().unwrap();

        let reader = PositionsReader::open(&path).unwrap();
        let by_doc = reader.read_positions(offset).unwrap();
        assert_eq!(by_doc.len(), 3);
        assert_eq!(by_doc[&1], vec![0, 5, 11]);
        assert_eq!(by_doc[&9], vec![7, 8]);
    }

    #[test]
    fn test_targeted_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos");

        let mut writer = PositionsWriter::create(&path).unwrap();
        let offset = writer
            .write_positions(&[3, 8], &[vec![1, 2], vec![40, 41, 45]])
            .unwrap();
        writer.close().unwrap();

        let reader = PositionsReader::open(&path).unwrap();
        assert_eq!(reader.read_positions_for_doc(offset, 8).unwrap(), vec![40, 41, 45]);
        assert!(reader.read_positions_for_doc(offset, 99).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_monotone_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos");
        let mut writer = PositionsWriter::create(&path).unwrap();
        let err = writer.write_positions(&[1], &[vec![4, 4]]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
