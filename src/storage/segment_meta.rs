//! Segment descriptor (`meta.json`)

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Lifecycle state of a segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentStatus {
    Active,
    Merging,
    Deleted,
}

/// Segment metadata, stored next to the three data files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMeta {
    pub segment_id: u64,
    pub doc_count: u32,
    pub term_count: u32,
    pub size_bytes: u64,
    pub status: SegmentStatus,
    pub level: u32,
    pub create_time: DateTime<Utc>,
}

impl SegmentMeta {
    pub fn new(segment_id: u64, doc_count: u32, term_count: u32, size_bytes: u64, level: u32) -> Self {
        Self {
            segment_id,
            doc_count,
            term_count,
            size_bytes,
            status: SegmentStatus::Active,
            level,
            create_time: Utc::now(),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::format(path.display().to_string(), e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::format(path.display().to_string(), e.to_string()))
    }
}
