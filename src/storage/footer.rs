//! CRC-32 file footers
//!
//! Every segment file ends with a 4-byte big-endian CRC-32 covering all
//! preceding bytes. Writers append the footer on close and self-verify;
//! readers verify before trusting any header field.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crc32fast::Hasher;

use crate::error::{EngineError, Result};

/// Compute the CRC-32 of the first `len` bytes of the file.
/// The file cursor is left at `len`.
pub fn compute_crc32(file: &mut File, len: u64) -> Result<u32> {
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8 * 1024];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = buf.len().min(remaining as usize);
        file.read_exact(&mut buf[..chunk])?;
        hasher.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    Ok(hasher.finalize())
}

/// Append a big-endian CRC-32 footer covering the current file contents
pub fn append_crc32_footer(file: &mut File) -> Result<()> {
    let data_len = file.seek(SeekFrom::End(0))?;
    let crc = compute_crc32(file, data_len)?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(&crc.to_be_bytes())?;
    Ok(())
}

/// Verify the footer and return the data length (file minus the last 4 bytes)
pub fn verify_crc32_footer(file: &mut File, file_name: &str) -> Result<u64> {
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < 4 {
        return Err(EngineError::format(
            file_name,
            "file too short to carry a CRC-32 footer",
        ));
    }
    let data_len = file_len - 4;
    file.seek(SeekFrom::Start(data_len))?;
    let mut footer = [0u8; 4];
    file.read_exact(&mut footer)?;
    let expected = u32::from_be_bytes(footer);
    let actual = compute_crc32(file, data_len)?;
    if actual != expected {
        return Err(EngineError::format(
            file_name,
            format!("CRC-32 mismatch: expected {expected:#010x}, computed {actual:#010x}"),
        ));
    }
    Ok(data_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn scratch_file(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn open_rw(path: &std::path::Path) -> File {
        OpenOptions::new().read(true).write(true).open(path).unwrap()
    }

    #[test]
    fn test_footer_round_trip() {
        let (_dir, path) = scratch_file(b"hello segment data");
        let mut file = open_rw(&path);
        append_crc32_footer(&mut file).unwrap();
        let data_len = verify_crc32_footer(&mut file, "data").unwrap();
        assert_eq!(data_len, 18);
    }

    #[test]
    fn test_corruption_detected() {
        let (_dir, path) = scratch_file(b"hello segment data");
        {
            let mut file = open_rw(&path);
            append_crc32_footer(&mut file).unwrap();
        }
        // Flip one byte inside the data region
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[3] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut file = open_rw(&path);
        let err = verify_crc32_footer(&mut file, "data").unwrap_err();
        assert!(matches!(err, EngineError::Format { .. }));
    }

    #[test]
    fn test_short_file_rejected() {
        let (_dir, path) = scratch_file(b"ab");
        let mut file = open_rw(&path);
        assert!(verify_crc32_footer(&mut file, "data").is_err());
    }
}
