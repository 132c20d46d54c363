//! Segment-set manifest
//!
//! The manifest file is the single source of truth for which segments
//! participate in queries. It is only ever replaced wholesale: a fresh copy
//! is written to `manifest.tmp`, fsynced, and renamed over `manifest` in one
//! atomic step; the containing directory is fsynced after the rename. The
//! rename is the commit protocol's linearization point.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const MANIFEST_FILE: &str = "manifest";
pub const MANIFEST_TMP_FILE: &str = "manifest.tmp";

/// One active segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub segment_id: u64,
    pub level: u32,
}

/// Ordered list of active segments plus id allocation state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Incremented on every published change; used to detect a manifest
    /// that moved under a writer
    pub generation: u64,
    pub next_segment_id: u64,
    pub segments: Vec<ManifestEntry>,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: 0,
            segments: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn allocate_segment_id(&mut self) -> u64 {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        id
    }

    pub fn add_segment(&mut self, segment_id: u64, level: u32) {
        self.segments.push(ManifestEntry { segment_id, level });
        self.touch();
    }

    pub fn remove_segment(&mut self, segment_id: u64) -> Option<ManifestEntry> {
        let position = self
            .segments
            .iter()
            .position(|e| e.segment_id == segment_id)?;
        self.touch();
        Some(self.segments.remove(position))
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }

    /// Record a publication that did not change the segment list
    pub fn mark_updated(&mut self) {
        self.touch();
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Load the manifest under `index_dir`; a missing file is an empty set
    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = index_dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::format(path.display().to_string(), e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Publish: write `manifest.tmp`, fsync, atomically rename into place,
    /// fsync the directory
    pub fn publish(&self, index_dir: &Path) -> Result<()> {
        let tmp_path = index_dir.join(MANIFEST_TMP_FILE);
        let final_path = index_dir.join(MANIFEST_FILE);

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::format(tmp_path.display().to_string(), e.to_string()))?;
        let mut tmp = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)?;
        tmp.write_all(&json)?;
        tmp.sync_all()?;
        drop(tmp);

        std::fs::rename(&tmp_path, &final_path)?;
        if let Ok(dir) = File::open(index_dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
