use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Term frequency saturation parameter
pub const BM25_K1: f64 = 1.2;
/// Length normalization parameter
pub const BM25_B: f64 = 0.75;

/// Flush when the in-memory segment reaches this many documents
pub const MEM_SEGMENT_MAX_DOCS: u32 = 10_000;
/// Flush when the in-memory segment estimate reaches this many bytes (64 MiB)
pub const MEM_SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;
/// Segments sharing a level are merged once this many accumulate
pub const MERGE_FACTOR: usize = 10;

/// WAL file rotation threshold (16 MiB)
pub const WAL_MAX_BYTES: u64 = 16 * 1024 * 1024;
/// Capacity of the bounded file ingest queue
pub const INGEST_QUEUE_CAPACITY: usize = 1000;
/// Worker thread count bounds
pub const MAX_INDEX_THREADS: usize = 64;

/// Characters of context kept on each side of a snippet hit
pub const SNIPPET_CONTEXT_CHARS: usize = 80;
/// Maximum snippets emitted per hit
pub const MAX_SNIPPETS: usize = 3;

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the manifest, WAL, segments, and document store
    pub index_dir: PathBuf,
    /// Ingest worker threads, clamped to [1, 64]
    pub index_threads: usize,
    /// Drop English stop words during tokenization
    pub enable_stop_words: bool,
    /// Paths treated as notes when classifying documents
    pub note_paths: Vec<PathBuf>,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    pub mem_max_docs: u32,
    pub mem_max_bytes: u64,
    pub merge_factor: usize,
    pub wal_max_bytes: u64,
    pub queue_capacity: usize,
    pub snippet_context_chars: usize,
    pub max_snippets: usize,
}

impl EngineConfig {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            ..Default::default()
        }
    }

    /// Set the worker thread count, clamped to [1, 64]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.index_threads = threads.clamp(1, MAX_INDEX_THREADS);
        self
    }

    pub fn with_stop_words(mut self, enabled: bool) -> Self {
        self.enable_stop_words = enabled;
        self
    }

    pub fn with_note_paths(mut self, note_paths: Vec<PathBuf>) -> Self {
        self.note_paths = note_paths;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./index"),
            index_threads: num_cpus::get().clamp(1, MAX_INDEX_THREADS),
            enable_stop_words: true,
            note_paths: Vec::new(),
            bm25_k1: BM25_K1,
            bm25_b: BM25_B,
            mem_max_docs: MEM_SEGMENT_MAX_DOCS,
            mem_max_bytes: MEM_SEGMENT_MAX_BYTES,
            merge_factor: MERGE_FACTOR,
            wal_max_bytes: WAL_MAX_BYTES,
            queue_capacity: INGEST_QUEUE_CAPACITY,
            snippet_context_chars: SNIPPET_CONTEXT_CHARS,
            max_snippets: MAX_SNIPPETS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.index_threads >= 1);
        assert!(config.index_threads <= MAX_INDEX_THREADS);
        assert!(config.enable_stop_words);
        assert_eq!(config.merge_factor, 10);
        assert_eq!(config.mem_max_docs, 10_000);
    }

    #[test]
    fn test_thread_clamping() {
        let config = EngineConfig::new("/tmp/idx").with_threads(0);
        assert_eq!(config.index_threads, 1);

        let config = EngineConfig::new("/tmp/idx").with_threads(500);
        assert_eq!(config.index_threads, 64);
    }
}
