//! Immutable on-disk segment
//!
//! A segment directory holds `dict`, `inv`, `pos`, `meta.json`, and the
//! `del` tombstone set. Opening a segment verifies the CRC footer of all
//! three data files before anything else is trusted. The segment itself is
//! never rewritten; only its tombstone bitmap grows.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::storage::{
    DictionaryReader, PositionsReader, PostingList, PostingsReader, SegmentMeta, SegmentStatus,
};

pub struct DiskSegment {
    dir: PathBuf,
    meta: SegmentMeta,
    dictionary: DictionaryReader,
    postings: PostingsReader,
    positions: PositionsReader,
    /// Every docId present in this segment's postings
    doc_ids: RoaringBitmap,
    tombstones: Mutex<RoaringBitmap>,
    delete_on_drop: AtomicBool,
}

impl DiskSegment {
    /// Open a segment directory, verifying all three data files
    pub fn open(dir: &Path) -> Result<Self> {
        let meta = SegmentMeta::read_from(&dir.join("meta.json"))?;
        let dictionary = DictionaryReader::open(&dir.join("dict"))?;
        let postings = PostingsReader::open(&dir.join("inv"))?;
        let positions = PositionsReader::open(&dir.join("pos"))?;

        let mut doc_ids = RoaringBitmap::new();
        for (_, entry) in dictionary.iter() {
            let list = postings.read_posting_list(entry.postings_offset)?;
            for doc_id in list.doc_ids {
                doc_ids.insert(doc_id);
            }
        }

        let tombstones = Self::load_tombstones(&dir.join("del"))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            dictionary,
            postings,
            positions,
            doc_ids,
            tombstones: Mutex::new(tombstones),
            delete_on_drop: AtomicBool::new(false),
        })
    }

    fn load_tombstones(path: &Path) -> Result<RoaringBitmap> {
        match std::fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(RoaringBitmap::new()),
            Ok(bytes) => RoaringBitmap::deserialize_from(&bytes[..]).map_err(|e| {
                EngineError::format(path.display().to_string(), format!("bad tombstone set: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RoaringBitmap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn segment_id(&self) -> u64 {
        self.meta.segment_id
    }

    pub fn level(&self) -> u32 {
        self.meta.level
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count
    }

    pub fn size_bytes(&self) -> u64 {
        self.meta.size_bytes
    }

    pub fn term_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.dictionary.get(term).map(|e| e.doc_freq).unwrap_or(0)
    }

    /// Read the full posting list for a term, if present
    pub fn get_postings(&self, term: &str) -> Result<Option<PostingList>> {
        match self.dictionary.get(term) {
            Some(entry) => Ok(Some(self.postings.read_posting_list(entry.postings_offset)?)),
            None => Ok(None),
        }
    }

    /// Terms whose bytes start with `prefix`, in ascending order
    pub fn prefix_terms(&self, prefix: &str) -> Vec<String> {
        self.dictionary
            .prefix_range(prefix)
            .map(|(term, _)| term.clone())
            .collect()
    }

    /// Targeted positions read for one document; empty when absent
    pub fn positions_for_doc(&self, term: &str, doc_id: u32) -> Result<Vec<u32>> {
        match self.dictionary.get(term) {
            Some(entry) => self
                .positions
                .read_positions_for_doc(entry.positions_offset, doc_id),
            None => Ok(Vec::new()),
        }
    }

    /// All docIds that appear in this segment
    pub fn all_doc_ids(&self) -> &RoaringBitmap {
        &self.doc_ids
    }

    /// DocIds not struck out by a tombstone
    pub fn live_doc_ids(&self) -> RoaringBitmap {
        let tombstones = self.tombstones.lock();
        &self.doc_ids - &*tombstones
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.tombstones.lock().contains(doc_id)
    }

    pub fn contains_doc(&self, doc_id: u32) -> bool {
        self.doc_ids.contains(doc_id)
    }

    /// Strike a document out. Returns true when the segment held it.
    pub fn delete_doc(&self, doc_id: u32) -> bool {
        if !self.doc_ids.contains(doc_id) {
            return false;
        }
        self.tombstones.lock().insert(doc_id)
    }

    pub fn tombstones(&self) -> RoaringBitmap {
        self.tombstones.lock().clone()
    }

    pub fn live_doc_count(&self) -> u64 {
        self.doc_ids.len() - self.tombstones.lock().len()
    }

    /// Persist the tombstone set to the `del` file and fsync it
    pub fn persist_tombstones(&self) -> Result<()> {
        let bytes = {
            let tombstones = self.tombstones.lock();
            let mut bytes = Vec::new();
            tombstones
                .serialize_into(&mut bytes)
                .map_err(EngineError::Io)?;
            bytes
        };
        let path = self.dir.join("del");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)?;
        use std::io::Write;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Rewrite `meta.json` with the given lifecycle status
    pub fn mark_status(&self, status: SegmentStatus) -> Result<()> {
        let mut meta = self.meta.clone();
        meta.status = status;
        meta.write_to(&self.dir.join("meta.json"))
    }

    /// Arrange for the segment directory to be removed once the last
    /// reference (manager or in-flight query snapshot) drops
    pub fn mark_delete_on_drop(&self) {
        self.delete_on_drop.store(true, Ordering::SeqCst);
    }
}

impl Drop for DiskSegment {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::SeqCst) {
            debug!(segment_id = self.meta.segment_id, "removing retired segment files");
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                warn!(
                    segment_id = self.meta.segment_id,
                    error = %e,
                    "failed to remove retired segment directory"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::mem_segment::MemSegment;
    use crate::tokenize::CompositeTokenizer;

    fn build_segment(dir: &Path) -> PathBuf {
        let tokenizer = CompositeTokenizer::new(false);
        let mem = MemSegment::new();
        mem.add_document(1, &tokenizer.tokenize("the quick brown fox")).unwrap();
        mem.add_document(2, &tokenizer.tokenize("quick fox brown")).unwrap();
        let seg_dir = dir.join("seg-0");
        mem.flush(&seg_dir, 0, 0).unwrap();
        seg_dir
    }

    #[test]
    fn test_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = build_segment(dir.path());

        let segment = DiskSegment::open(&seg_dir).unwrap();
        assert_eq!(segment.doc_count(), 2);
        assert_eq!(segment.doc_freq("quick"), 2);
        assert_eq!(segment.doc_freq("missing"), 0);

        let list = segment.get_postings("fox").unwrap().unwrap();
        assert_eq!(list.doc_ids, vec![1, 2]);

        assert_eq!(segment.positions_for_doc("quick", 1).unwrap(), vec![1]);
        assert_eq!(segment.positions_for_doc("quick", 2).unwrap(), vec![0]);
    }

    #[test]
    fn test_prefix_terms() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = build_segment(dir.path());
        let segment = DiskSegment::open(&seg_dir).unwrap();
        assert_eq!(segment.prefix_terms("qu"), vec!["quick".to_string()]);
        assert!(segment.prefix_terms("zz").is_empty());
    }

    #[test]
    fn test_tombstones_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = build_segment(dir.path());

        {
            let segment = DiskSegment::open(&seg_dir).unwrap();
            assert!(segment.delete_doc(1));
            assert!(!segment.delete_doc(42));
            segment.persist_tombstones().unwrap();
            assert_eq!(segment.live_doc_count(), 1);
        }

        let reopened = DiskSegment::open(&seg_dir).unwrap();
        assert!(reopened.is_deleted(1));
        assert!(!reopened.is_deleted(2));
        assert_eq!(reopened.live_doc_ids().iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_delete_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = build_segment(dir.path());

        {
            let segment = DiskSegment::open(&seg_dir).unwrap();
            segment.mark_delete_on_drop();
        }
        assert!(!seg_dir.exists());
    }

    #[test]
    fn test_corrupt_segment_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let seg_dir = build_segment(dir.path());

        let inv = seg_dir.join("inv");
        let mut bytes = std::fs::read(&inv).unwrap();
        bytes[3] ^= 0xFF;
        std::fs::write(&inv, &bytes).unwrap();

        assert!(matches!(
            DiskSegment::open(&seg_dir),
            Err(EngineError::Format { .. })
        ));
    }
}
