//! In-memory segment
//!
//! Accumulates per-term postings under concurrent append. Writers append
//! holding the read half of a flush lock, so any number of ingest workers
//! make progress at once; flush takes the write half, so no append ever
//! observes a partially written segment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::storage::{
    DictionaryWriter, PositionsWriter, PostingsWriter, SegmentMeta,
};
use crate::tokenize::Token;

/// Per-term accumulation: parallel docId/termFreq arrays plus the position
/// lists keyed by docId
#[derive(Debug, Default)]
struct TermPostings {
    doc_ids: Vec<u32>,
    term_freqs: Vec<u32>,
    positions: HashMap<u32, Vec<u32>>,
}

pub struct MemSegment {
    flush_lock: RwLock<()>,
    terms: DashMap<String, TermPostings>,
    doc_count: AtomicU32,
    byte_estimate: AtomicU64,
}

impl Default for MemSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl MemSegment {
    pub fn new() -> Self {
        Self {
            flush_lock: RwLock::new(()),
            terms: DashMap::new(),
            doc_count: AtomicU32::new(0),
            byte_estimate: AtomicU64::new(0),
        }
    }

    /// Append one document's tokens. Positions must be in source order.
    pub fn add_document(&self, doc_id: u32, tokens: &[Token]) -> Result<()> {
        let _append_guard = self.flush_lock.read();

        // Group positions per term, preserving the global source order
        let mut by_term: HashMap<&str, Vec<u32>> = HashMap::new();
        let mut last_position: Option<u32> = None;
        for token in tokens {
            if let Some(last) = last_position {
                if token.position <= last {
                    return Err(EngineError::Validation(format!(
                        "token positions must be strictly increasing: {} after {}",
                        token.position, last
                    )));
                }
            }
            last_position = Some(token.position);
            by_term.entry(&token.term).or_default().push(token.position);
        }

        let mut added_bytes = 0u64;
        for (term, positions) in by_term {
            added_bytes += term.len() as u64 + 8 + positions.len() as u64 * 4;
            let mut entry = self.terms.entry(term.to_string()).or_default();
            if entry.positions.contains_key(&doc_id) {
                return Err(EngineError::Validation(format!(
                    "docId {doc_id} appended twice for term {term:?}"
                )));
            }
            entry.doc_ids.push(doc_id);
            entry.term_freqs.push(positions.len() as u32);
            entry.positions.insert(doc_id, positions);
        }

        self.doc_count.fetch_add(1, Ordering::Relaxed);
        self.byte_estimate.fetch_add(added_bytes, Ordering::Relaxed);
        Ok(())
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count.load(Ordering::Relaxed)
    }

    pub fn byte_estimate(&self) -> u64 {
        self.byte_estimate.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count() == 0
    }

    pub fn should_flush(&self, max_docs: u32, max_bytes: u64) -> bool {
        self.doc_count() >= max_docs || self.byte_estimate() >= max_bytes
    }

    /// Flush the accumulated postings into a fresh segment directory,
    /// producing the three data files plus `meta.json` and an empty `del`.
    /// Runs under the write half of the flush lock: appends wait.
    pub fn flush(&self, segment_dir: &Path, segment_id: u64, level: u32) -> Result<SegmentMeta> {
        let _flush_guard = self.flush_lock.write();

        std::fs::create_dir_all(segment_dir)?;
        let term_keys: Vec<String> = self.terms.iter().map(|e| e.key().clone()).collect();
        let mut sorted_terms: Vec<(String, TermPostings)> = term_keys
            .into_iter()
            .filter_map(|term| self.terms.remove(&term))
            .collect();
        sorted_terms.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut dict_writer = DictionaryWriter::create(&segment_dir.join("dict"))?;
        let mut postings_writer = PostingsWriter::create(&segment_dir.join("inv"))?;
        let mut positions_writer = PositionsWriter::create(&segment_dir.join("pos"))?;

        let mut all_doc_ids = std::collections::BTreeSet::new();
        for (term, postings) in sorted_terms {
            // Re-sort tuples by docId; concurrent workers may interleave
            let mut tuples: Vec<(u32, u32)> = postings
                .doc_ids
                .iter()
                .copied()
                .zip(postings.term_freqs.iter().copied())
                .collect();
            tuples.sort_by_key(|(doc_id, _)| *doc_id);

            let doc_ids: Vec<u32> = tuples.iter().map(|(d, _)| *d).collect();
            let term_freqs: Vec<u32> = tuples.iter().map(|(_, tf)| *tf).collect();
            let doc_positions: Vec<Vec<u32>> = doc_ids
                .iter()
                .map(|doc_id| postings.positions.get(doc_id).cloned().unwrap_or_default())
                .collect();
            all_doc_ids.extend(doc_ids.iter().copied());

            let postings_offset = postings_writer.write_posting_list(&doc_ids, &term_freqs)?;
            let positions_offset = positions_writer.write_positions(&doc_ids, &doc_positions)?;
            dict_writer.write_term_entry(
                &term,
                doc_ids.len() as u32,
                postings_offset,
                positions_offset,
            )?;
        }

        let term_count = dict_writer.term_count();
        dict_writer.close()?;
        postings_writer.close()?;
        positions_writer.close()?;

        // Fresh segments start with no deletions
        std::fs::write(segment_dir.join("del"), [])?;

        let size_bytes = ["dict", "inv", "pos"]
            .iter()
            .map(|name| {
                std::fs::metadata(segment_dir.join(name))
                    .map(|m| m.len())
                    .unwrap_or(0)
            })
            .sum();

        let meta = SegmentMeta::new(
            segment_id,
            all_doc_ids.len() as u32,
            term_count,
            size_bytes,
            level,
        );
        meta.write_to(&segment_dir.join("meta.json"))?;

        debug!(
            segment_id,
            docs = meta.doc_count,
            terms = meta.term_count,
            "flushed in-memory segment"
        );

        self.doc_count.store(0, Ordering::Relaxed);
        self.byte_estimate.store(0, Ordering::Relaxed);
        Ok(meta)
    }
}
