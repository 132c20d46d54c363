//! Index manager
//!
//! Owns the WAL, the manifest, and every segment file on disk. Ingest runs
//! as a single producer walking the source roots plus a pool of worker
//! threads consuming a bounded queue. Each batch is made durable through
//! the commit protocol:
//!
//! 1. WAL entries are appended (before any effect) and fsynced
//! 2. new segment files are written to a temporary directory and fsynced
//! 3. a fresh manifest is written to `manifest.tmp` and fsynced
//! 4. the manifest is atomically renamed into place
//! 5. tombstone files are persisted and fsynced
//! 6. the WAL is truncated (checkpoint)
//!
//! A crash before (4) leaves the previous manifest; the WAL replays on the
//! next open. A crash between (4) and (6) replays a WAL whose effects are
//! already on disk, which is why replay checks the DocStore first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use crossbeam::channel;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::disk_segment::DiskSegment;
use super::manifest::Manifest;
use super::mem_segment::MemSegment;
use super::merge::merge_segments;
use super::wal::{Wal, WalOp, WalRecord};
use crate::config::EngineConfig;
use crate::docstore::{DocStore, Document, FileInfo};
use crate::error::{EngineError, Result};
use crate::storage::SegmentStatus;
use crate::tokenize::CompositeTokenizer;

const MERGE_PUBLISH_RETRIES: usize = 3;

/// Aggregate counts for one ingest run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub failed: u32,
    pub elapsed_ms: u64,
}

/// Point-in-time view of the index
#[derive(Clone, Debug)]
pub struct IndexStatus {
    pub doc_count: u32,
    pub segment_count: usize,
    pub total_size_bytes: u64,
    pub pending_mem_docs: u32,
}

enum IngestMessage {
    Task { op: WalOp, info: FileInfo },
    Shutdown,
}

pub struct IndexManager {
    config: EngineConfig,
    doc_store: Arc<DocStore>,
    tokenizer: CompositeTokenizer,
    mem: MemSegment,
    wal: Wal,
    segments: ArcSwap<Vec<Arc<DiskSegment>>>,
    manifest: Mutex<Manifest>,
    commit_lock: Mutex<()>,
}

impl IndexManager {
    /// Open (or create) the index under `config.index_dir` and run recovery
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.index_dir)?;
        Self::remove_stale_temp_dirs(&config.index_dir)?;

        let doc_store = Arc::new(DocStore::open(&config.index_dir.join("documents.db"))?);
        let wal = Wal::open(&config.index_dir.join("wal"), config.wal_max_bytes)?;
        let manifest = Manifest::load(&config.index_dir)?;
        Self::remove_unreferenced_segment_dirs(&config.index_dir, &manifest)?;

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            let dir = config.index_dir.join(format!("seg-{}", entry.segment_id));
            let segment = DiskSegment::open(&dir)?;
            segments.push(Arc::new(segment));
        }

        let tokenizer = CompositeTokenizer::new(config.enable_stop_words);
        let manager = Self {
            doc_store,
            tokenizer,
            mem: MemSegment::new(),
            wal,
            segments: ArcSwap::from_pointee(segments),
            manifest: Mutex::new(manifest),
            config,
            commit_lock: Mutex::new(()),
        };

        manager.recover()?;
        Ok(manager)
    }

    /// Incomplete commits leave `tmp-seg-*` directories behind; rolling
    /// back means deleting them before anything references them.
    fn remove_stale_temp_dirs(index_dir: &Path) -> Result<()> {
        for entry in std::fs::read_dir(index_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("tmp-seg-") {
                warn!(dir = %entry.path().display(), "removing leftover temporary segment");
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    /// Segment directories the manifest does not reference are either
    /// uncommitted flushes or retired segments whose deferred removal was
    /// cut short by a crash. Only the manifest confers liveness.
    fn remove_unreferenced_segment_dirs(index_dir: &Path, manifest: &Manifest) -> Result<()> {
        let referenced: HashSet<u64> = manifest.segments.iter().map(|e| e.segment_id).collect();
        for entry in std::fs::read_dir(index_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_prefix("seg-").and_then(|r| r.parse::<u64>().ok()) else {
                continue;
            };
            if !referenced.contains(&id) {
                warn!(dir = %entry.path().display(), "removing unreferenced segment");
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn doc_store(&self) -> &Arc<DocStore> {
        &self.doc_store
    }

    /// Immutable handle to the segment set active right now. Segments
    /// referenced by a snapshot outlive any concurrent merge.
    pub fn get_active_segments(&self) -> Arc<Vec<Arc<DiskSegment>>> {
        self.segments.load_full()
    }

    pub fn status(&self) -> Result<IndexStatus> {
        let segments = self.get_active_segments();
        Ok(IndexStatus {
            doc_count: self.doc_store.total_doc_count()?,
            segment_count: segments.len(),
            total_size_bytes: segments.iter().map(|s| s.size_bytes()).sum(),
            pending_mem_docs: self.mem.doc_count(),
        })
    }

    // ---- recovery ----------------------------------------------------

    fn recover(&self) -> Result<()> {
        let records = self.wal.replay()?;
        if !records.is_empty() {
            info!(entries = records.len(), "replaying WAL");
        }
        for record in records {
            match record.op {
                WalOp::Add | WalOp::Update => {
                    if self.is_already_applied(&record)? {
                        continue;
                    }
                    let path = PathBuf::from(&record.path);
                    if path.exists() {
                        // A stale row with a different mtime/size must go
                        // before the fresh ingest lands
                        self.apply_delete(&record.path)?;
                        if let Err(e) = self.ingest_file(&path) {
                            warn!(path = %record.path, error = %e, "WAL replay ingest failed");
                        }
                    } else {
                        self.apply_delete(&record.path)?;
                    }
                }
                WalOp::Delete => {
                    self.apply_delete(&record.path)?;
                }
            }
        }

        let _commit_guard = self.commit_lock.lock();
        if !self.mem.is_empty() {
            self.commit_locked(true)?;
        } else {
            self.wal.checkpoint()?;
        }
        Ok(())
    }

    /// Replay idempotence: an entry whose document is present with the same
    /// mtime and size has already taken effect.
    fn is_already_applied(&self, record: &WalRecord) -> Result<bool> {
        let Some(document) = self.doc_store.find_by_path(&record.path)? else {
            return Ok(false);
        };
        Ok(document.mtime.timestamp_millis() == record.mtime_ms
            && document.size_bytes as i64 == record.size)
    }

    // ---- ingest ------------------------------------------------------

    /// Scan the source roots, diff against the DocStore, and apply the
    /// resulting ADD / UPDATE / DELETE operations.
    pub fn update(&self, roots: &[PathBuf]) -> Result<IndexReport> {
        let start = Instant::now();
        let files = collect_files(roots)?;
        debug!(files = files.len(), "scan finished");

        let mut additions = Vec::new();
        let mut updates = Vec::new();
        let mut scanned: HashSet<String> = HashSet::with_capacity(files.len());
        for info in files {
            let normalized = crate::docstore::normalize_path(&info.path.to_string_lossy());
            scanned.insert(normalized.clone());
            match self.doc_store.find_by_path(&normalized)? {
                None => additions.push(info),
                Some(existing) => {
                    let changed = existing.mtime.timestamp_millis() != info.mtime.timestamp_millis()
                        || existing.size_bytes != info.size_bytes;
                    if changed {
                        updates.push(info);
                    }
                }
            }
        }

        // Paths under the scanned roots that vanished from disk
        let root_prefixes: Vec<String> = roots
            .iter()
            .map(|r| {
                let canonical = r.canonicalize().unwrap_or_else(|_| r.clone());
                crate::docstore::normalize_path(&canonical.to_string_lossy())
            })
            .collect();
        let mut deletions = Vec::new();
        for document in self.doc_store.all_documents()? {
            let under_root = root_prefixes
                .iter()
                .any(|p| document.path == *p || document.path.starts_with(&format!("{p}/")));
            if under_root && !scanned.contains(&document.path) {
                deletions.push(document);
            }
        }

        let deleted = deletions.len() as u32;
        for document in deletions {
            self.wal.append(&WalRecord::new(
                WalOp::Delete,
                document.path.clone(),
                document.mtime.timestamp_millis(),
                document.size_bytes as i64,
            ))?;
            self.apply_delete(&document.path)?;
        }

        let (added, updated, failed) = self.run_pipeline(additions, updates)?;

        {
            let _commit_guard = self.commit_lock.lock();
            self.commit_locked(true)?;
            self.maybe_merge()?;
        }

        let report = IndexReport {
            added,
            updated,
            deleted,
            failed,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(?report, "ingest finished");
        Ok(report)
    }

    /// Producer/consumer pipeline: one producer feeds a bounded queue; N
    /// workers tokenize and append to the shared in-memory segment.
    fn run_pipeline(
        &self,
        additions: Vec<FileInfo>,
        updates: Vec<FileInfo>,
    ) -> Result<(u32, u32, u32)> {
        let added = AtomicU32::new(0);
        let updated = AtomicU32::new(0);
        let failed = AtomicU32::new(0);
        let workers = self.config.index_threads.clamp(1, 64);
        let (sender, receiver) = channel::bounded::<IngestMessage>(self.config.queue_capacity);

        std::thread::scope(|scope| -> Result<()> {
            for _ in 0..workers {
                let receiver = receiver.clone();
                let added = &added;
                let updated = &updated;
                let failed = &failed;
                scope.spawn(move || {
                    while let Ok(message) = receiver.recv() {
                        let (op, info) = match message {
                            IngestMessage::Shutdown => break,
                            IngestMessage::Task { op, info } => (op, info),
                        };
                        match self.process_task(op, &info) {
                            Ok(()) => {
                                let counter = if op == WalOp::Add { added } else { updated };
                                counter.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(path = %info.path.display(), error = %e, "ingest failed");
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        if let Err(e) = self.maybe_flush() {
                            warn!(error = %e, "mid-batch flush failed");
                        }
                    }
                });
            }

            // Producer: log the intent, then enqueue. The send blocks when
            // the queue is full.
            for (op, info) in additions
                .into_iter()
                .map(|i| (WalOp::Add, i))
                .chain(updates.into_iter().map(|i| (WalOp::Update, i)))
            {
                self.wal.append(&WalRecord::new(
                    op,
                    crate::docstore::normalize_path(&info.path.to_string_lossy()),
                    info.mtime.timestamp_millis(),
                    info.size_bytes as i64,
                ))?;
                sender
                    .send(IngestMessage::Task { op, info })
                    .map_err(|_| EngineError::Validation("ingest queue closed".into()))?;
            }
            for _ in 0..workers {
                sender
                    .send(IngestMessage::Shutdown)
                    .map_err(|_| EngineError::Validation("ingest queue closed".into()))?;
            }
            Ok(())
        })?;

        Ok((
            added.load(Ordering::Relaxed),
            updated.load(Ordering::Relaxed),
            failed.load(Ordering::Relaxed),
        ))
    }

    fn process_task(&self, op: WalOp, info: &FileInfo) -> Result<()> {
        if op == WalOp::Update {
            self.apply_delete(&crate::docstore::normalize_path(
                &info.path.to_string_lossy(),
            ))?;
        }
        self.ingest_file(&info.path)
    }

    /// Read, tokenize, register, and buffer one file
    fn ingest_file(&self, path: &Path) -> Result<()> {
        let doc_id = self.doc_store.next_doc_id()?;
        let document = Document::of_file(doc_id, path, &self.config.note_paths)?;

        let bytes = std::fs::read(path)?;
        // Decode errors become U+FFFD replacement characters
        let content = String::from_utf8_lossy(&bytes);
        let tokens = self.tokenizer.tokenize(&content);
        let token_count = tokens.len() as u32;

        self.doc_store.insert(&document)?;
        self.doc_store
            .update(doc_id, document.size_bytes, document.mtime, token_count)?;
        self.mem.add_document(doc_id, &tokens)?;
        Ok(())
    }

    /// Remove a path from the DocStore and strike its docId out of every
    /// active segment
    fn apply_delete(&self, path: &str) -> Result<Option<u32>> {
        let Some(doc_id) = self.doc_store.delete_by_path(path)? else {
            return Ok(None);
        };
        for segment in self.get_active_segments().iter() {
            segment.delete_doc(doc_id);
        }
        debug!(path, doc_id, "deleted document");
        Ok(Some(doc_id))
    }

    // ---- commit ------------------------------------------------------

    /// Flush if the in-memory segment crossed a threshold. Contention is
    /// fine: whoever holds the commit lock is already flushing.
    fn maybe_flush(&self) -> Result<()> {
        if !self
            .mem
            .should_flush(self.config.mem_max_docs, self.config.mem_max_bytes)
        {
            return Ok(());
        }
        if let Some(_guard) = self.commit_lock.try_lock() {
            // Mid-batch flush: keep the WAL; replay is idempotent
            self.commit_locked(false)?;
        }
        Ok(())
    }

    /// Run the commit protocol. `checkpoint` truncates the WAL afterwards
    /// and is reserved for batch-final commits.
    fn commit_locked(&self, checkpoint: bool) -> Result<()> {
        self.wal.sync()?;

        if !self.mem.is_empty() {
            let segment_id = self.manifest.lock().allocate_segment_id();
            let tmp_dir = self.config.index_dir.join(format!("tmp-seg-{segment_id}"));
            let final_dir = self.config.index_dir.join(format!("seg-{segment_id}"));

            match self.mem.flush(&tmp_dir, segment_id, 0) {
                Ok(_meta) => {}
                Err(e) => {
                    // Roll back: drop the partial files, keep the old manifest
                    let _ = std::fs::remove_dir_all(&tmp_dir);
                    return Err(e);
                }
            }
            std::fs::rename(&tmp_dir, &final_dir)?;
            let segment = Arc::new(DiskSegment::open(&final_dir)?);

            {
                let mut manifest = self.manifest.lock();
                manifest.add_segment(segment_id, 0);
                manifest.publish(&self.config.index_dir)?;
            }
            let mut active: Vec<Arc<DiskSegment>> = self.get_active_segments().as_ref().clone();
            active.push(segment);
            self.segments.store(Arc::new(active));
        } else {
            // Delete-only batch: publish the (tombstone-bearing) set anyway
            let mut manifest = self.manifest.lock();
            manifest.mark_updated();
            manifest.publish(&self.config.index_dir)?;
        }

        for segment in self.get_active_segments().iter() {
            segment.persist_tombstones()?;
        }
        self.doc_store.persist()?;

        if checkpoint {
            self.wal.checkpoint()?;
        }
        Ok(())
    }

    // ---- merge -------------------------------------------------------

    /// Tiered merge: whenever a level accumulates `merge_factor` segments,
    /// merge them into one segment a level up.
    fn maybe_merge(&self) -> Result<()> {
        loop {
            let snapshot = self.get_active_segments();
            let Some(inputs) = self.pick_merge_inputs(&snapshot) else {
                return Ok(());
            };
            self.run_merge(&inputs)?;
        }
    }

    fn pick_merge_inputs(&self, active: &[Arc<DiskSegment>]) -> Option<Vec<Arc<DiskSegment>>> {
        let mut by_level: std::collections::BTreeMap<u32, Vec<Arc<DiskSegment>>> =
            std::collections::BTreeMap::new();
        for segment in active {
            by_level
                .entry(segment.level())
                .or_default()
                .push(Arc::clone(segment));
        }
        for (_, mut segments) in by_level {
            if segments.len() >= self.config.merge_factor {
                segments.sort_by_key(|s| s.segment_id());
                segments.truncate(self.config.merge_factor);
                return Some(segments);
            }
        }
        None
    }

    fn run_merge(&self, inputs: &[Arc<DiskSegment>]) -> Result<()> {
        let target_level = inputs[0].level() + 1;
        let (segment_id, planned_generation) = {
            let mut manifest = self.manifest.lock();
            (manifest.allocate_segment_id(), manifest.generation)
        };

        for segment in inputs {
            segment.mark_status(SegmentStatus::Merging)?;
        }

        let tmp_dir = self.config.index_dir.join(format!("tmp-seg-{segment_id}"));
        let final_dir = self.config.index_dir.join(format!("seg-{segment_id}"));
        if let Err(e) = merge_segments(inputs, &tmp_dir, segment_id, target_level) {
            let _ = std::fs::remove_dir_all(&tmp_dir);
            for segment in inputs {
                let _ = segment.mark_status(SegmentStatus::Active);
            }
            return Err(e);
        }
        std::fs::rename(&tmp_dir, &final_dir)?;
        let merged = Arc::new(DiskSegment::open(&final_dir)?);

        let input_ids: HashSet<u64> = inputs.iter().map(|s| s.segment_id()).collect();
        let mut attempts = 0;
        loop {
            let mut manifest = self.manifest.lock();
            if manifest.generation != planned_generation {
                attempts += 1;
                if attempts > MERGE_PUBLISH_RETRIES {
                    return Err(EngineError::ConcurrentModification(
                        "manifest changed repeatedly during merge publication".into(),
                    ));
                }
                continue;
            }
            for id in &input_ids {
                manifest.remove_segment(*id);
            }
            manifest.add_segment(segment_id, target_level);
            manifest.publish(&self.config.index_dir)?;
            break;
        }

        let mut active: Vec<Arc<DiskSegment>> = self
            .get_active_segments()
            .iter()
            .filter(|s| !input_ids.contains(&s.segment_id()))
            .cloned()
            .collect();
        active.push(merged);
        self.segments.store(Arc::new(active));

        // Retire the inputs; files disappear once the last snapshot drops
        for segment in inputs {
            segment.mark_status(SegmentStatus::Deleted)?;
            segment.mark_delete_on_drop();
        }
        Ok(())
    }

    // ---- rebuild -----------------------------------------------------

    /// Drop every segment, the WAL, and all DocStore rows, then re-ingest
    pub fn rebuild(&self, roots: &[PathBuf]) -> Result<IndexReport> {
        {
            let _commit_guard = self.commit_lock.lock();
            self.doc_store.clear()?;
            self.doc_store.persist()?;
            self.wal.checkpoint()?;

            let old = self.get_active_segments();
            {
                let mut manifest = self.manifest.lock();
                let ids: Vec<u64> = manifest.segments.iter().map(|e| e.segment_id).collect();
                for id in ids {
                    manifest.remove_segment(id);
                }
                manifest.publish(&self.config.index_dir)?;
            }
            self.segments.store(Arc::new(Vec::new()));
            for segment in old.iter() {
                segment.mark_status(SegmentStatus::Deleted)?;
                segment.mark_delete_on_drop();
            }
            info!("index cleared for rebuild");
        }
        self.update(roots)
    }
}

/// Recursively collect regular files under the roots, skipping hidden
/// entries and anything unreadable
fn collect_files(roots: &[PathBuf]) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    for root in roots {
        let canonical = root.canonicalize().unwrap_or_else(|_| root.clone());
        collect_into(&canonical, &mut files);
    }
    Ok(files)
}

fn collect_into(path: &Path, files: &mut Vec<FileInfo>) {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false);
    if hidden {
        return;
    }

    let Ok(metadata) = std::fs::metadata(path) else {
        warn!(path = %path.display(), "skipping unreadable entry");
        return;
    };
    if metadata.is_dir() {
        let Ok(entries) = std::fs::read_dir(path) else {
            warn!(path = %path.display(), "skipping unreadable directory");
            return;
        };
        let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        children.sort();
        for child in children {
            collect_into(&child, files);
        }
    } else if metadata.is_file() {
        let Ok(modified) = metadata.modified() else {
            return;
        };
        files.push(FileInfo {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            mtime: modified.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> EngineConfig {
        EngineConfig::new(dir.join("index")).with_threads(2)
    }

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_index_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        write_file(&data, "a.md", "hello search engine");
        write_file(&data, "b.md", "another hello file");

        let manager = IndexManager::open(test_config(dir.path())).unwrap();
        let report = manager.update(&[data]).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.failed, 0);

        let status = manager.status().unwrap();
        assert_eq!(status.doc_count, 2);
        assert_eq!(status.segment_count, 1);
        assert_eq!(status.pending_mem_docs, 0);
    }

    #[test]
    fn test_incremental_update_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let keep = write_file(&data, "keep.md", "keep me around");
        let doomed = write_file(&data, "delete.md", "delete me soon");

        let manager = IndexManager::open(test_config(dir.path())).unwrap();
        manager.update(&[data.clone()]).unwrap();
        assert_eq!(manager.status().unwrap().doc_count, 2);

        std::fs::remove_file(&doomed).unwrap();
        let report = manager.update(&[data]).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.added, 0);
        assert_eq!(manager.status().unwrap().doc_count, 1);

        let store = manager.doc_store();
        assert!(store
            .find_by_path(&crate::docstore::normalize_path(
                &keep.canonicalize().unwrap().to_string_lossy()
            ))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_update_reassigns_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let file = write_file(&data, "a.md", "first contents");

        let manager = IndexManager::open(test_config(dir.path())).unwrap();
        manager.update(&[data.clone()]).unwrap();
        let normalized = crate::docstore::normalize_path(
            &file.canonicalize().unwrap().to_string_lossy(),
        );
        let first_id = manager
            .doc_store()
            .find_by_path(&normalized)
            .unwrap()
            .unwrap()
            .doc_id;

        // Rewrite with different size so the diff flags an UPDATE
        std::fs::write(&file, "second contents, now longer").unwrap();
        let report = manager.update(&[data]).unwrap();
        assert_eq!(report.updated, 1);

        let second_id = manager
            .doc_store()
            .find_by_path(&normalized)
            .unwrap()
            .unwrap()
            .doc_id;
        assert!(second_id > first_id);
    }

    #[test]
    fn test_recovery_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        for i in 0..10 {
            write_file(&data, &format!("doc{i}.md"), &format!("readme body {i}"));
        }

        let config = test_config(dir.path());
        {
            let manager = IndexManager::open(config.clone()).unwrap();
            manager.update(&[data.clone()]).unwrap();
        }

        let manager = IndexManager::open(config).unwrap();
        let status = manager.status().unwrap();
        assert_eq!(status.doc_count, 10);
        assert!(status.segment_count >= 1);
    }

    #[test]
    fn test_wal_replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let file = write_file(&data, "a.md", "stable body");

        let config = test_config(dir.path());
        let manager = IndexManager::open(config.clone()).unwrap();
        manager.update(&[data]).unwrap();
        let count_before = manager.status().unwrap().doc_count;

        // Simulate a crash between manifest rename and checkpoint: the WAL
        // still holds an entry whose effect is already on disk
        let metadata = std::fs::metadata(&file).unwrap();
        let mtime: chrono::DateTime<chrono::Utc> = metadata.modified().unwrap().into();
        manager
            .wal
            .append(&WalRecord::new(
                WalOp::Add,
                crate::docstore::normalize_path(
                    &file.canonicalize().unwrap().to_string_lossy(),
                ),
                mtime.timestamp_millis(),
                metadata.len() as i64,
            ))
            .unwrap();
        manager.wal.sync().unwrap();
        drop(manager);

        let manager = IndexManager::open(config).unwrap();
        assert_eq!(manager.status().unwrap().doc_count, count_before);
    }

    #[test]
    fn test_tiered_merge_promotes_level() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let mut config = test_config(dir.path());
        config.merge_factor = 3;
        let manager = IndexManager::open(config).unwrap();

        // Three separate batches, one level-0 segment each
        for batch in 0..3 {
            write_file(&data, &format!("f{batch}.md"), &format!("batch {batch} text"));
            manager.update(&[data.clone()]).unwrap();
        }

        let segments = manager.get_active_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].level(), 1);
        assert_eq!(manager.status().unwrap().doc_count, 3);
    }

    #[test]
    fn test_snapshot_survives_merge() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let mut config = test_config(dir.path());
        config.merge_factor = 2;
        let manager = IndexManager::open(config).unwrap();

        write_file(&data, "one.md", "first body");
        manager.update(&[data.clone()]).unwrap();
        let snapshot = manager.get_active_segments();
        let held_dir = snapshot[0].dir().to_path_buf();

        // Second batch triggers a merge that retires the held segment
        write_file(&data, "two.md", "second body");
        manager.update(&[data]).unwrap();

        // Files referenced by the live snapshot are still readable
        assert!(held_dir.exists());
        assert!(snapshot[0].get_postings("first").unwrap().is_some());

        drop(snapshot);
        assert!(!held_dir.exists());
    }

    #[test]
    fn test_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        write_file(&data, "a.md", "alpha body");
        write_file(&data, "b.md", "beta body");

        let manager = IndexManager::open(test_config(dir.path())).unwrap();
        manager.update(&[data.clone()]).unwrap();
        std::fs::remove_file(data.join("b.md")).unwrap();

        let report = manager.rebuild(&[data]).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(manager.status().unwrap().doc_count, 1);
    }

    #[test]
    fn test_hidden_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join(".git")).unwrap();
        write_file(&data, "visible.md", "normal file");
        write_file(&data, ".hidden", "secret");
        write_file(&data.join(".git"), "config", "git internals");

        let files = collect_files(&[data]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("visible.md"));
    }
}
