//! Document metadata store
//!
//! An embedded fjall keyspace holds one row per live document plus a path
//! index and a persistent docId counter. DocIds are handed out monotonically
//! and never reused; deleting a document removes its row, so the count and
//! average-length statistics are live-doc-only by construction.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Coarse document classification inferred from the file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocType {
    Code,
    Note,
    Doc,
    Data,
    Config,
    Other,
}

impl DocType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CODE" => Some(DocType::Code),
            "NOTE" => Some(DocType::Note),
            "DOC" => Some(DocType::Doc),
            "DATA" => Some(DocType::Data),
            "CONFIG" => Some(DocType::Config),
            "OTHER" => Some(DocType::Other),
            _ => None,
        }
    }
}

const CODE_EXTENSIONS: &[&str] = &[
    "java", "kt", "py", "js", "ts", "cpp", "c", "h", "hpp", "rs", "go", "rb", "php", "swift",
    "cs", "scala", "groovy", "sql", "sh", "bash", "zsh", "ps1", "vim", "lua", "perl", "r",
    "matlab", "dart", "kotlin",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "xml", "yaml", "yml", "toml", "ini", "conf", "cfg", "properties", "env", "gradle",
    "maven", "cmake", "dockerfile", "gitignore",
];

const DOC_EXTENSIONS: &[&str] = &[
    "md", "txt", "rst", "adoc", "org", "wiki", "doc", "docx", "pdf", "html", "htm",
];

const DATA_EXTENSIONS: &[&str] = &["csv", "tsv", "xlsx", "xls", "db", "sqlite", "parquet"];

/// Immutable metadata record for one indexed file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: u32,
    /// Absolute path with forward slashes
    pub path: String,
    pub extension: String,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub doc_type: DocType,
    pub token_count: u32,
}

impl Document {
    /// Build a document record from on-disk file metadata
    pub fn of_file(doc_id: u32, path: &Path, note_paths: &[PathBuf]) -> Result<Self> {
        let absolute = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let normalized = normalize_path(&absolute.to_string_lossy());
        let extension = extract_extension(&normalized);
        let metadata = std::fs::metadata(&absolute)?;
        let mtime: DateTime<Utc> = metadata.modified()?.into();

        let doc_type = infer_doc_type(&absolute, &extension, note_paths);
        Ok(Self {
            doc_id,
            path: normalized,
            extension,
            size_bytes: metadata.len(),
            mtime,
            doc_type,
            token_count: 0,
        })
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

fn infer_doc_type(path: &Path, extension: &str, note_paths: &[PathBuf]) -> DocType {
    let normalized: HashSet<PathBuf> = note_paths
        .iter()
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();
    if normalized.contains(path) {
        return DocType::Note;
    }
    if CODE_EXTENSIONS.contains(&extension) {
        DocType::Code
    } else if CONFIG_EXTENSIONS.contains(&extension) {
        DocType::Config
    } else if DOC_EXTENSIONS.contains(&extension) {
        DocType::Doc
    } else if DATA_EXTENSIONS.contains(&extension) {
        DocType::Data
    } else {
        DocType::Other
    }
}

pub(crate) fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/")
}

fn extract_extension(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => file_name[dot + 1..].to_lowercase(),
        _ => file_name.to_lowercase(),
    }
}

/// File facts handed from the discovery walk to the ingest workers
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
}

const DOCS_PARTITION: &str = "docs";
const PATHS_PARTITION: &str = "paths";
const META_PARTITION: &str = "meta";
const NEXT_DOC_ID_KEY: &[u8] = b"next_doc_id";

fn store_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::DocStore(err.to_string())
}

/// fjall-backed document metadata table
pub struct DocStore {
    keyspace: Keyspace,
    docs: PartitionHandle,
    paths: PartitionHandle,
    meta: PartitionHandle,
    id_lock: Mutex<()>,
}

impl DocStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let keyspace = Config::new(dir).open().map_err(store_err)?;
        let docs = keyspace
            .open_partition(DOCS_PARTITION, PartitionCreateOptions::default())
            .map_err(store_err)?;
        let paths = keyspace
            .open_partition(PATHS_PARTITION, PartitionCreateOptions::default())
            .map_err(store_err)?;
        let meta = keyspace
            .open_partition(META_PARTITION, PartitionCreateOptions::default())
            .map_err(store_err)?;
        Ok(Self {
            keyspace,
            docs,
            paths,
            meta,
            id_lock: Mutex::new(()),
        })
    }

    fn doc_key(doc_id: u32) -> [u8; 4] {
        doc_id.to_be_bytes()
    }

    /// Allocate the next docId. Ids are monotone and never reused.
    pub fn next_doc_id(&self) -> Result<u32> {
        let _guard = self.id_lock.lock();
        let next = match self.meta.get(NEXT_DOC_ID_KEY).map_err(store_err)? {
            Some(bytes) if bytes.len() == 4 => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            _ => 1,
        };
        self.meta
            .insert(NEXT_DOC_ID_KEY, (next + 1).to_be_bytes())
            .map_err(store_err)?;
        Ok(next)
    }

    /// Insert a new document; fails when the path is already present
    pub fn insert(&self, document: &Document) -> Result<()> {
        let path_key = document.path.as_bytes();
        if self.paths.get(path_key).map_err(store_err)?.is_some() {
            return Err(EngineError::DocStore(format!(
                "duplicate path: {}",
                document.path
            )));
        }
        let value = bincode::serialize(document)?;
        self.docs
            .insert(Self::doc_key(document.doc_id), value)
            .map_err(store_err)?;
        self.paths
            .insert(path_key, Self::doc_key(document.doc_id))
            .map_err(store_err)?;
        Ok(())
    }

    /// Update size, mtime, and token count for an existing document
    pub fn update(
        &self,
        doc_id: u32,
        size_bytes: u64,
        mtime: DateTime<Utc>,
        token_count: u32,
    ) -> Result<()> {
        let mut document = self
            .find_by_id(doc_id)?
            .ok_or_else(|| EngineError::DocStore(format!("unknown docId {doc_id}")))?;
        document.size_bytes = size_bytes;
        document.mtime = mtime;
        document.token_count = token_count;
        let value = bincode::serialize(&document)?;
        self.docs
            .insert(Self::doc_key(doc_id), value)
            .map_err(store_err)?;
        Ok(())
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<Document>> {
        let normalized = normalize_path(path);
        match self.paths.get(normalized.as_bytes()).map_err(store_err)? {
            Some(bytes) if bytes.len() == 4 => {
                let doc_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                self.find_by_id(doc_id)
            }
            _ => Ok(None),
        }
    }

    pub fn find_by_id(&self, doc_id: u32) -> Result<Option<Document>> {
        match self.docs.get(Self::doc_key(doc_id)).map_err(store_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a document by path, returning its docId
    pub fn delete_by_path(&self, path: &str) -> Result<Option<u32>> {
        let normalized = normalize_path(path);
        let Some(document) = self.find_by_path(&normalized)? else {
            return Ok(None);
        };
        self.docs
            .remove(Self::doc_key(document.doc_id))
            .map_err(store_err)?;
        self.paths
            .remove(normalized.as_bytes())
            .map_err(store_err)?;
        Ok(Some(document.doc_id))
    }

    /// Visit every live document in ascending docId order
    fn scan<F: FnMut(&Document)>(&self, mut visit: F) -> Result<()> {
        for item in self.docs.iter() {
            let (_key, value) = item.map_err(store_err)?;
            let document: Document = bincode::deserialize(&value)?;
            visit(&document);
        }
        Ok(())
    }

    fn collect_ids<F: Fn(&Document) -> bool>(&self, predicate: F) -> Result<Vec<u32>> {
        let mut doc_ids = Vec::new();
        self.scan(|document| {
            if predicate(document) {
                doc_ids.push(document.doc_id);
            }
        })?;
        Ok(doc_ids)
    }

    pub fn find_doc_ids_by_extension(&self, extension: &str) -> Result<Vec<u32>> {
        let wanted = extension.to_lowercase();
        self.collect_ids(|d| d.extension == wanted)
    }

    pub fn find_doc_ids_by_type(&self, doc_type: DocType) -> Result<Vec<u32>> {
        self.collect_ids(|d| d.doc_type == doc_type)
    }

    pub fn find_doc_ids_by_mtime_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<u32>> {
        self.collect_ids(|d| d.mtime >= from && d.mtime <= to)
    }

    pub fn find_doc_ids_by_size_range(&self, min: u64, max: u64) -> Result<Vec<u32>> {
        self.collect_ids(|d| d.size_bytes >= min && d.size_bytes <= max)
    }

    pub fn find_doc_ids_by_path_prefix(&self, prefix: &str) -> Result<Vec<u32>> {
        let normalized = normalize_path(prefix);
        self.collect_ids(|d| d.path.starts_with(&normalized))
    }

    pub fn find_doc_ids_by_file_name(&self, file_name: &str) -> Result<Vec<u32>> {
        let wanted = normalize_path(file_name).to_lowercase();
        self.collect_ids(|d| {
            let path_lower = d.path.to_lowercase();
            path_lower == wanted || path_lower.ends_with(&format!("/{wanted}"))
        })
    }

    /// All live documents, ascending by docId
    pub fn all_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        self.scan(|d| documents.push(d.clone()))?;
        Ok(documents)
    }

    /// Count of live documents
    pub fn total_doc_count(&self) -> Result<u32> {
        let mut count = 0u32;
        self.scan(|_| count += 1)?;
        Ok(count)
    }

    /// Average token count over live documents
    pub fn average_doc_length(&self) -> Result<f64> {
        let mut count = 0u64;
        let mut total = 0u64;
        self.scan(|d| {
            count += 1;
            total += d.token_count as u64;
        })?;
        if count == 0 {
            Ok(0.0)
        } else {
            Ok(total as f64 / count as f64)
        }
    }

    /// Remove every document row (the docId counter is kept)
    pub fn clear(&self) -> Result<()> {
        let doc_keys: Vec<Vec<u8>> = self
            .docs
            .iter()
            .filter_map(|item| item.ok().map(|(k, _)| k.to_vec()))
            .collect();
        for key in doc_keys {
            self.docs.remove(key).map_err(store_err)?;
        }
        let path_keys: Vec<Vec<u8>> = self
            .paths
            .iter()
            .filter_map(|item| item.ok().map(|(k, _)| k.to_vec()))
            .collect();
        for key in path_keys {
            self.paths.remove(key).map_err(store_err)?;
        }
        Ok(())
    }

    /// Flush the store to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_doc(doc_id: u32, path: &str, size: u64, token_count: u32) -> Document {
        Document {
            doc_id,
            path: path.to_string(),
            extension: extract_extension(path),
            size_bytes: size,
            mtime: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            doc_type: DocType::Doc,
            token_count,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();

        let doc = sample_doc(1, "/notes/readme.md", 64, 10);
        store.insert(&doc).unwrap();

        assert_eq!(store.find_by_id(1).unwrap().unwrap().path, "/notes/readme.md");
        assert_eq!(
            store.find_by_path("/notes/readme.md").unwrap().unwrap().doc_id,
            1
        );
        assert!(store.find_by_id(99).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();
        store.insert(&sample_doc(1, "/a.md", 1, 1)).unwrap();
        assert!(store.insert(&sample_doc(2, "/a.md", 1, 1)).is_err());
    }

    #[test]
    fn test_next_doc_id_monotone() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();
        let first = store.next_doc_id().unwrap();
        let second = store.next_doc_id().unwrap();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_delete_does_not_recycle_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();
        let id = store.next_doc_id().unwrap();
        store.insert(&sample_doc(id, "/a.md", 1, 1)).unwrap();
        assert_eq!(store.delete_by_path("/a.md").unwrap(), Some(id));
        assert!(store.next_doc_id().unwrap() > id);
        assert_eq!(store.total_doc_count().unwrap(), 0);
    }

    #[test]
    fn test_field_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();
        store.insert(&sample_doc(1, "/docs/a.md", 6, 4)).unwrap();
        store.insert(&sample_doc(2, "/docs/b.md", 18, 8)).unwrap();
        let mut code = sample_doc(3, "/src/main.rs", 100, 40);
        code.doc_type = DocType::Code;
        store.insert(&code).unwrap();

        assert_eq!(store.find_doc_ids_by_extension("md").unwrap(), vec![1, 2]);
        assert_eq!(store.find_doc_ids_by_type(DocType::Code).unwrap(), vec![3]);
        assert_eq!(store.find_doc_ids_by_size_range(1, 20).unwrap(), vec![1, 2]);
        assert_eq!(
            store.find_doc_ids_by_path_prefix("/docs").unwrap(),
            vec![1, 2]
        );
        assert_eq!(store.find_doc_ids_by_file_name("B.MD").unwrap(), vec![2]);
    }

    #[test]
    fn test_live_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::open(dir.path()).unwrap();
        store.insert(&sample_doc(1, "/a.md", 6, 10)).unwrap();
        store.insert(&sample_doc(2, "/b.md", 18, 30)).unwrap();

        assert_eq!(store.total_doc_count().unwrap(), 2);
        assert!((store.average_doc_length().unwrap() - 20.0).abs() < f64::EPSILON);

        store.delete_by_path("/b.md").unwrap();
        assert_eq!(store.total_doc_count().unwrap(), 1);
        assert!((store.average_doc_length().unwrap() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extension_and_type_inference() {
        assert_eq!(extract_extension("/x/y/readme.md"), "md");
        assert_eq!(extract_extension("/x/Makefile"), "makefile");
        let t = infer_doc_type(Path::new("/x/main.rs"), "rs", &[]);
        assert_eq!(t, DocType::Code);
        let t = infer_doc_type(Path::new("/x/app.yaml"), "yaml", &[]);
        assert_eq!(t, DocType::Config);
    }
}
