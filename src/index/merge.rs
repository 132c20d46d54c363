//! Tiered segment merge
//!
//! A k-way ordered merge over the input dictionaries: for each term present
//! in at least one input, the contributing (docId, tf, positions) tuples are
//! concatenated in ascending docId order, dropping any docId struck out by
//! its segment's tombstone set. Deleted documents are simply not re-emitted.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::disk_segment::DiskSegment;
use crate::error::Result;
use crate::storage::{DictionaryWriter, PositionsWriter, PostingsWriter, SegmentMeta};

/// Merge `inputs` into a new segment directory at `level`, returning its
/// metadata. Input segments are left untouched.
pub fn merge_segments(
    inputs: &[Arc<DiskSegment>],
    segment_dir: &Path,
    segment_id: u64,
    level: u32,
) -> Result<SegmentMeta> {
    std::fs::create_dir_all(segment_dir)?;

    let mut all_terms: BTreeSet<String> = BTreeSet::new();
    for segment in inputs {
        all_terms.extend(segment.prefix_terms(""));
    }

    let mut dict_writer = DictionaryWriter::create(&segment_dir.join("dict"))?;
    let mut postings_writer = PostingsWriter::create(&segment_dir.join("inv"))?;
    let mut positions_writer = PositionsWriter::create(&segment_dir.join("pos"))?;

    let mut all_doc_ids: BTreeSet<u32> = BTreeSet::new();
    for term in &all_terms {
        // (docId, tf, positions) from every contributing segment, live only
        let mut tuples: Vec<(u32, u32, Vec<u32>)> = Vec::new();
        for segment in inputs {
            let Some(list) = segment.get_postings(term)? else {
                continue;
            };
            for (index, &doc_id) in list.doc_ids.iter().enumerate() {
                if segment.is_deleted(doc_id) {
                    continue;
                }
                let positions = segment.positions_for_doc(term, doc_id)?;
                tuples.push((doc_id, list.term_freqs[index], positions));
            }
        }
        if tuples.is_empty() {
            continue;
        }
        tuples.sort_by_key(|(doc_id, _, _)| *doc_id);

        let doc_ids: Vec<u32> = tuples.iter().map(|(d, _, _)| *d).collect();
        let term_freqs: Vec<u32> = tuples.iter().map(|(_, tf, _)| *tf).collect();
        let positions: Vec<Vec<u32>> = tuples.into_iter().map(|(_, _, p)| p).collect();
        all_doc_ids.extend(doc_ids.iter().copied());

        let postings_offset = postings_writer.write_posting_list(&doc_ids, &term_freqs)?;
        let positions_offset = positions_writer.write_positions(&doc_ids, &positions)?;
        dict_writer.write_term_entry(term, doc_ids.len() as u32, postings_offset, positions_offset)?;
    }

    let term_count = dict_writer.term_count();
    dict_writer.close()?;
    postings_writer.close()?;
    positions_writer.close()?;

    // The merged segment starts with a clean tombstone set
    std::fs::write(segment_dir.join("del"), [])?;

    let size_bytes = ["dict", "inv", "pos"]
        .iter()
        .map(|name| {
            std::fs::metadata(segment_dir.join(name))
                .map(|m| m.len())
                .unwrap_or(0)
        })
        .sum();

    let meta = SegmentMeta::new(segment_id, all_doc_ids.len() as u32, term_count, size_bytes, level);
    meta.write_to(&segment_dir.join("meta.json"))?;

    info!(
        segment_id,
        level,
        inputs = inputs.len(),
        docs = meta.doc_count,
        terms = meta.term_count,
        "merged segments"
    );
    Ok(meta)
}
