//! Postings file (`inv`)
//!
//! Each posting list is reachable only through the dictionary's
//! `postings_offset` and lays out as:
//! `{doc_count varint, skip_count varint,
//!   skip_count x (skip_doc_id u32, skip_delta_offset u32),
//!   delta-encoded docIds (varints), term_freqs (varints)}`.
//!
//! A skip entry is emitted every 128 documents; entry `i` references
//! `doc_ids[(i+1)*128 - 1]` and the byte offset of that delta within the
//! delta region.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use super::codec::{read_varint_u32, varint_u32_size, write_varint_u32};
use super::footer::{append_crc32_footer, verify_crc32_footer};
use super::{FORMAT_VERSION, HEADER_LEN, POSTINGS_MAGIC, SKIP_INTERVAL};
use crate::error::{EngineError, Result};

/// A decoded posting list: parallel docId / term frequency arrays
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostingList {
    pub doc_ids: Vec<u32>,
    pub term_freqs: Vec<u32>,
}

impl PostingList {
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }
}

/// Skip entry pointing into a posting list's delta region
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkipEntry {
    pub doc_id: u32,
    pub delta_offset: u32,
}

/// Writer for postings files
pub struct PostingsWriter {
    file: File,
    file_name: String,
    body: Vec<u8>,
}

impl PostingsWriter {
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
            .unwrap_or_else(|| "inv".to_string());
        Ok(Self {
            file,
            file_name,
            body: Vec::new(),
        })
    }

    /// Write one posting list and return its file offset
    pub fn write_posting_list(&mut self, doc_ids: &[u32], term_freqs: &[u32]) -> Result<u64> {
        if doc_ids.len() != term_freqs.len() {
            return Err(EngineError::Validation(format!(
                "docIds and termFreqs length mismatch: {} vs {}",
                doc_ids.len(),
                term_freqs.len()
            )));
        }
        for window in doc_ids.windows(2) {
            if window[1] <= window[0] {
                return Err(EngineError::Validation(
                    "docIds must be strictly increasing".into(),
                ));
            }
        }

        let offset = HEADER_LEN + self.body.len() as u64;
        let doc_count = doc_ids.len();
        let skip_count = doc_count / SKIP_INTERVAL;

        // Deltas and the byte offset of each delta within the delta region
        let mut deltas = Vec::with_capacity(doc_count);
        let mut delta_offsets = Vec::with_capacity(doc_count);
        let mut cursor = 0u32;
        for (index, &doc_id) in doc_ids.iter().enumerate() {
            let delta = if index == 0 {
                doc_id
            } else {
                doc_id - doc_ids[index - 1]
            };
            deltas.push(delta);
            delta_offsets.push(cursor);
            cursor += varint_u32_size(delta) as u32;
        }

        write_varint_u32(&mut self.body, doc_count as u32)?;
        write_varint_u32(&mut self.body, skip_count as u32)?;
        for skip_index in 0..skip_count {
            let target = (skip_index + 1) * SKIP_INTERVAL - 1;
            self.body.extend_from_slice(&doc_ids[target].to_be_bytes());
            self.body
                .extend_from_slice(&delta_offsets[target].to_be_bytes());
        }
        for delta in deltas {
            write_varint_u32(&mut self.body, delta)?;
        }
        for &tf in term_freqs {
            write_varint_u32(&mut self.body, tf)?;
        }

        Ok(offset)
    }

    pub fn close(mut self) -> Result<()> {
        self.file.write_all(&POSTINGS_MAGIC.to_be_bytes())?;
        self.file.write_all(&FORMAT_VERSION.to_be_bytes())?;
        self.file.write_all(&self.body)?;
        append_crc32_footer(&mut self.file)?;
        verify_crc32_footer(&mut self.file, &self.file_name)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Random-access reader for postings files
#[derive(Debug)]
pub struct PostingsReader {
    file: Mutex<File>,
    file_name: String,
    data_len: u64,
}

impl PostingsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "inv".to_string());
        let mut file = File::open(path)?;
        let data_len = verify_crc32_footer(&mut file, &file_name)?;

        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if u32::from_be_bytes(magic) != POSTINGS_MAGIC {
            return Err(EngineError::format(&file_name, "postings magic mismatch"));
        }
        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        let version = u16::from_be_bytes(version);
        if version != FORMAT_VERSION {
            return Err(EngineError::format(
                &file_name,
                format!("unsupported postings version {version}"),
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
                format!("postings offset {offset} outside data region"),
            ));
        }
        Ok(())
    }

    /// Decode the posting list at `offset`
    pub fn read_posting_list(&self, offset: u64) -> Result<PostingList> {
        self.check_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        let doc_count = read_varint_u32(&mut reader)? as usize;
        let skip_count = read_varint_u32(&mut reader)? as usize;
        // Skip region: 8 fixed bytes per entry
        let mut skip_buf = [0u8; 8];
        for _ in 0..skip_count {
            reader.read_exact(&mut skip_buf)?;
        }

        let mut doc_ids = Vec::with_capacity(doc_count);
        let mut current = 0u32;
        for index in 0..doc_count {
            let delta = read_varint_u32(&mut reader)?;
            current = if index == 0 { delta } else { current + delta };
            doc_ids.push(current);
        }
        let mut term_freqs = Vec::with_capacity(doc_count);
        for _ in 0..doc_count {
            term_freqs.push(read_varint_u32(&mut reader)?);
        }

        Ok(PostingList {
            doc_ids,
            term_freqs,
        })
    }

    /// Decode only the skip entries of the posting list at `offset`
    pub fn read_skip_entries(&self, offset: u64) -> Result<Vec<SkipEntry>> {
        self.check_offset(offset)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        let _doc_count = read_varint_u32(&mut reader)?;
        let skip_count = read_varint_u32(&mut reader)? as usize;
        let mut entries = Vec::with_capacity(skip_count);
        let mut buf = [0u8; 4];
        for _ in 0..skip_count {
            reader.read_exact(&mut buf)?;
            let doc_id = u32::from_be_bytes(buf);
            reader.read_exact(&mut buf)?;
            let delta_offset = u32::from_be_bytes(buf);
            entries.push(SkipEntry {
                doc_id,
                delta_offset,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv");

        let doc_ids = vec![2u32, 5, 9, 200, 4000];
        let term_freqs = vec![1u32, 3, 2, 7, 1];
        let mut writer = PostingsWriter::create(&path).unwrap();
        let offset = writer.write_posting_list(&doc_ids, &term_freqs).unwrap();
        writer.close().unwrap();

        let reader = PostingsReader::open(&path).unwrap();
        let list = reader.read_posting_list(offset).unwrap();
        assert_eq!(list.doc_ids, doc_ids);
        assert_eq!(list.term_freqs, term_freqs);
        assert!(reader.read_skip_entries(offset).unwrap().is_empty());
    }

    #[test]
    fn test_skip_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv");

        let doc_ids: Vec<u32> = (0..300).map(|i| i * 3 + 1).collect();
        let term_freqs = vec![1u32; 300];
        let mut writer = PostingsWriter::create(&path).unwrap();
        let offset = writer.write_posting_list(&doc_ids, &term_freqs).unwrap();
        writer.close().unwrap();

        let reader = PostingsReader::open(&path).unwrap();
        let skips = reader.read_skip_entries(offset).unwrap();
        assert_eq!(skips.len(), 300 / SKIP_INTERVAL);
        assert_eq!(skips[0].doc_id, doc_ids[SKIP_INTERVAL - 1]);
        assert_eq!(skips[1].doc_id, doc_ids[2 * SKIP_INTERVAL - 1]);
    }

    #[test]
    fn test_multiple_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv");

        let mut writer = PostingsWriter::create(&path).unwrap();
        let first = writer.write_posting_list(&[1, 2, 3], &[1, 1, 2]).unwrap();
        let second = writer.write_posting_list(&[10, 30], &[4, 5]).unwrap();
        writer.close().unwrap();

        let reader = PostingsReader::open(&path).unwrap();
        assert_eq!(reader.read_posting_list(first).unwrap().doc_ids, vec![1, 2, 3]);
        assert_eq!(reader.read_posting_list(second).unwrap().term_freqs, vec![4, 5]);
    }

    #[test]
    fn test_rejects_non_monotone_doc_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv");
        let mut writer = PostingsWriter::create(&path).unwrap();
        let err = writer.write_posting_list(&[5, 5], &[1, 1]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_invalid_offset_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv");
        let mut writer = PostingsWriter::create(&path).unwrap();
        writer.write_posting_list(&[1], &[1]).unwrap();
        writer.close().unwrap();

        let reader = PostingsReader::open(&path).unwrap();
        assert!(reader.read_posting_list(0).is_err());
        assert!(reader.read_posting_list(1 << 40).is_err());
    }
}
