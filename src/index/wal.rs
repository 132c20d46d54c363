//! Write-ahead log
//!
//! An append-only log of intended mutations under `wal/`. Record framing:
//! `op u8 | timestamp i64 | path_len varint | path bytes | mtime i64 |
//! size i64` (fixed-width integers big-endian, times in ms since epoch).
//!
//! `current.wal` rotates to `rotated-<n>.wal` past the size threshold.
//! Replay walks rotated files in numeric order, then the current file,
//! stopping at a torn tail record in the final file; torn records anywhere
//! else are corruption. A checkpoint truncates everything.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::storage::{read_varint_u32, write_varint_u32};

/// Intended mutation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalOp {
    Add = 1,
    Delete = 2,
    Update = 3,
}

impl WalOp {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WalOp::Add),
            2 => Some(WalOp::Delete),
            3 => Some(WalOp::Update),
            _ => None,
        }
    }
}

/// One logged mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalRecord {
    pub op: WalOp,
    pub timestamp_ms: i64,
    pub path: String,
    pub mtime_ms: i64,
    pub size: i64,
}

impl WalRecord {
    pub fn new(op: WalOp, path: impl Into<String>, mtime_ms: i64, size: i64) -> Self {
        Self {
            op,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            path: path.into(),
            mtime_ms,
            size,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.op as u8);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        let path_bytes = self.path.as_bytes();
        write_varint_u32(out, path_bytes.len() as u32)?;
        out.extend_from_slice(path_bytes);
        out.extend_from_slice(&self.mtime_ms.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        Ok(())
    }

    /// Decode the remainder of a record once the op byte has been read
    fn decode_body<R: Read>(op_byte: u8, reader: &mut R, file_name: &str) -> Result<Self> {
        let op = WalOp::from_u8(op_byte)
            .ok_or_else(|| EngineError::format(file_name, format!("unknown WAL op {op_byte}")))?;

        let mut i64_buf = [0u8; 8];
        reader.read_exact(&mut i64_buf)?;
        let timestamp_ms = i64::from_be_bytes(i64_buf);

        let path_len = read_varint_u32(reader)? as usize;
        let mut path_bytes = vec![0u8; path_len];
        reader.read_exact(&mut path_bytes)?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| EngineError::format(file_name, "WAL path is not valid UTF-8"))?;

        reader.read_exact(&mut i64_buf)?;
        let mtime_ms = i64::from_be_bytes(i64_buf);
        reader.read_exact(&mut i64_buf)?;
        let size = i64::from_be_bytes(i64_buf);

        Ok(Self {
            op,
            timestamp_ms,
            path,
            mtime_ms,
            size,
        })
    }
}

struct WalInner {
    file: File,
    len: u64,
    next_rotation: u64,
}

/// Append-only WAL with rotation and checkpoint truncation
pub struct Wal {
    dir: PathBuf,
    max_bytes: u64,
    inner: Mutex<WalInner>,
}

impl Wal {
    pub fn open(dir: &Path, max_bytes: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let current = dir.join("current.wal");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&current)?;
        let len = file.metadata()?.len();
        let next_rotation = Self::rotated_indices(dir)?
            .last()
            .map(|n| n + 1)
            .unwrap_or(0);
        Ok(Self {
            dir: dir.to_path_buf(),
            max_bytes,
            inner: Mutex::new(WalInner {
                file,
                len,
                next_rotation,
            }),
        })
    }

    fn rotated_indices(dir: &Path) -> Result<Vec<u64>> {
        let mut indices = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name
                .strip_prefix("rotated-")
                .and_then(|r| r.strip_suffix(".wal"))
            {
                if let Ok(index) = rest.parse::<u64>() {
                    indices.push(index);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Append one record, rotating first when past the size threshold
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.len >= self.max_bytes {
            self.rotate(&mut inner)?;
        }
        let mut encoded = Vec::with_capacity(32 + record.path.len());
        record.encode(&mut encoded)?;
        inner.file.write_all(&encoded)?;
        inner.len += encoded.len() as u64;
        Ok(())
    }

    fn rotate(&self, inner: &mut WalInner) -> Result<()> {
        inner.file.sync_all()?;
        let rotated = self.dir.join(format!("rotated-{}.wal", inner.next_rotation));
        std::fs::rename(self.dir.join("current.wal"), &rotated)?;
        debug!(target = %rotated.display(), "rotated WAL file");
        inner.next_rotation += 1;
        inner.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.dir.join("current.wal"))?;
        inner.len = 0;
        Ok(())
    }

    /// fsync the current WAL file
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Read every record back: rotated files in numeric order, then the
    /// current file. A torn tail in the final file ends replay quietly;
    /// torn records elsewhere are surfaced as corruption.
    pub fn replay(&self) -> Result<Vec<WalRecord>> {
        let _guard = self.inner.lock();
        let mut files: Vec<PathBuf> = Self::rotated_indices(&self.dir)?
            .into_iter()
            .map(|n| self.dir.join(format!("rotated-{n}.wal")))
            .collect();
        files.push(self.dir.join("current.wal"));

        let mut records = Vec::new();
        let last_index = files.len() - 1;
        for (file_index, path) in files.iter().enumerate() {
            let file = match File::open(path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut reader = BufReader::new(file);
            loop {
                let mut op_buf = [0u8; 1];
                if reader.read(&mut op_buf)? == 0 {
                    break; // clean EOF at a record boundary
                }
                match WalRecord::decode_body(op_buf[0], &mut reader, &file_name) {
                    Ok(record) => records.push(record),
                    Err(EngineError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        // Torn tail record: only legal in the final file
                        if file_index != last_index {
                            return Err(EngineError::format(
                                &file_name,
                                "torn WAL record in a non-final file",
                            ));
                        }
                        warn!(file = %file_name, "dropping torn WAL tail record");
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(records)
    }

    /// Checkpoint: drop rotated files and truncate the current file
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for index in Self::rotated_indices(&self.dir)? {
            let path = self.dir.join(format!("rotated-{index}.wal"));
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to drop rotated WAL file");
            }
        }
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.sync_all()?;
        inner.len = 0;
        Ok(())
    }

    pub fn current_len(&self) -> u64 {
        self.inner.lock().len
    }
}
