//! Term dictionary file (`dict`)
//!
//! Header: magic, format version, term count (patched at close). Body: one
//! entry per term, strictly ascending by term bytes:
//! `{term_len varint, term_bytes, doc_freq varint, postings_offset u64,
//! positions_offset u64}`.
//!
//! The reader verifies the CRC footer, then loads the entire dictionary into
//! an ordered map so lookups and prefix range scans stay in memory.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::Path;

use super::codec::{read_varint_u32, write_varint_u32};
use super::footer::{append_crc32_footer, verify_crc32_footer};
use super::{DICT_MAGIC, FORMAT_VERSION};
use crate::error::{EngineError, Result};

/// Dictionary entry: where a term's postings and positions live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermEntry {
    pub doc_freq: u32,
    pub postings_offset: u64,
    pub positions_offset: u64,
}

/// Writer for dictionary files. Terms must arrive in strictly ascending
/// byte-lex order; the term count header field is patched on close.
pub struct DictionaryWriter {
    file: File,
    file_name: String,
    body: Vec<u8>,
    term_count: u32,
    last_term: Option<String>,
}

impl DictionaryWriter {
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
            .unwrap_or_else(|| "dict".to_string());
        Ok(Self {
            file,
            file_name,
            body: Vec::new(),
            term_count: 0,
            last_term: None,
        })
    }

    pub fn write_term_entry(
        &mut self,
        term: &str,
        doc_freq: u32,
        postings_offset: u64,
        positions_offset: u64,
    ) -> Result<()> {
        if term.is_empty() {
            return Err(EngineError::Validation("term must not be empty".into()));
        }
        if let Some(last) = &self.last_term {
            if term.as_bytes() <= last.as_bytes() {
                return Err(EngineError::Validation(format!(
                    "terms must be strictly ascending: {term:?} after {last:?}"
                )));
            }
        }

        let term_bytes = term.as_bytes();
        write_varint_u32(&mut self.body, term_bytes.len() as u32)?;
        self.body.extend_from_slice(term_bytes);
        write_varint_u32(&mut self.body, doc_freq)?;
        self.body.extend_from_slice(&postings_offset.to_be_bytes());
        self.body.extend_from_slice(&positions_offset.to_be_bytes());

        self.term_count += 1;
        self.last_term = Some(term.to_string());
        Ok(())
    }

    pub fn term_count(&self) -> u32 {
        self.term_count
    }

    /// Write header + body, append the CRC footer, and self-verify.
    pub fn close(mut self) -> Result<()> {
        self.file.write_all(&DICT_MAGIC.to_be_bytes())?;
        self.file.write_all(&FORMAT_VERSION.to_be_bytes())?;
        self.file.write_all(&self.term_count.to_be_bytes())?;
        self.file.write_all(&self.body)?;
        append_crc32_footer(&mut self.file)?;
        verify_crc32_footer(&mut self.file, &self.file_name)?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Reader for dictionary files: verifies the footer, checks the header, and
/// materializes every entry into an ordered map.
#[derive(Debug)]
pub struct DictionaryReader {
    terms: BTreeMap<String, TermEntry>,
}

impl DictionaryReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dict".to_string());
        let mut file = File::open(path)?;
        let data_len = verify_crc32_footer(&mut file, &file_name)?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if u32::from_be_bytes(magic) != DICT_MAGIC {
            return Err(EngineError::format(&file_name, "dictionary magic mismatch"));
        }
        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        let version = u16::from_be_bytes(version);
        if version != FORMAT_VERSION {
            return Err(EngineError::format(
                &file_name,
                format!("unsupported dictionary version {version}"),
            ));
        }
        let mut count_buf = [0u8; 4];
        reader.read_exact(&mut count_buf)?;
        let term_count = u32::from_be_bytes(count_buf);

        let mut terms = BTreeMap::new();
        let mut last_term: Option<String> = None;
        for _ in 0..term_count {
            let term_len = read_varint_u32(&mut reader)? as usize;
            let mut term_bytes = vec![0u8; term_len];
            reader.read_exact(&mut term_bytes)?;
            let term = String::from_utf8(term_bytes).map_err(|_| {
                EngineError::format(&file_name, "dictionary term is not valid UTF-8")
            })?;
            if let Some(last) = &last_term {
                if term.as_bytes() <= last.as_bytes() {
                    return Err(EngineError::format(
                        &file_name,
                        format!("dictionary terms out of order: {term:?} after {last:?}"),
                    ));
                }
            }
            let doc_freq = read_varint_u32(&mut reader)?;
            let mut offset_buf = [0u8; 8];
            reader.read_exact(&mut offset_buf)?;
            let postings_offset = u64::from_be_bytes(offset_buf);
            reader.read_exact(&mut offset_buf)?;
            let positions_offset = u64::from_be_bytes(offset_buf);

            if reader.stream_position()? > data_len {
                return Err(EngineError::format(
                    &file_name,
                    "dictionary entry extends past the data region",
                ));
            }

            last_term = Some(term.clone());
            terms.insert(
                term,
                TermEntry {
                    doc_freq,
                    postings_offset,
                    positions_offset,
                },
            );
        }

        Ok(Self { terms })
    }

    pub fn get(&self, term: &str) -> Option<&TermEntry> {
        self.terms.get(term)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TermEntry)> {
        self.terms.iter()
    }

    /// Byte-lex range scan over terms starting with `prefix`
    pub fn prefix_range<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a TermEntry)> + 'a {
        self.terms
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(move |(term, _)| term.starts_with(prefix))
    }
}
