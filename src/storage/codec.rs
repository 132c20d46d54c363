//! Variable-length integer codec
//!
//! Values are written as 7-bit groups, least-significant first; the high bit
//! of each byte is a continuation flag. A 32-bit value takes at most 5
//! bytes, a 64-bit value at most 10. Readers fail with a format error when
//! the terminator byte does not arrive within that budget.
//!
//! The delta helpers encode a strictly monotone non-negative sequence as the
//! first value followed by successive differences, reconstructed by prefix
//! sum on decode.

use std::io::{Read, Write};

use crate::error::{EngineError, Result};

/// Write a u32 as a varint
pub fn write_varint_u32<W: Write>(writer: &mut W, mut value: u32) -> Result<()> {
    while value & !0x7F != 0 {
        writer.write_all(&[(value as u8 & 0x7F) | 0x80])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8 & 0x7F])?;
    Ok(())
}

/// Write a u64 as a varint
pub fn write_varint_u64<W: Write>(writer: &mut W, mut value: u64) -> Result<()> {
    while value & !0x7F != 0 {
        writer.write_all(&[(value as u8 & 0x7F) | 0x80])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8 & 0x7F])?;
    Ok(())
}

/// Read a varint-encoded u32, failing if no terminator arrives within 5 bytes
pub fn read_varint_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 35 {
            return Err(EngineError::format("varint", "u32 varint exceeds 5 bytes"));
        }
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7F) as u32) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Read a varint-encoded u64, failing if no terminator arrives within 10 bytes
pub fn read_varint_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 70 {
            return Err(EngineError::format("varint", "u64 varint exceeds 10 bytes"));
        }
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Number of bytes `write_varint_u32` would produce
pub fn varint_u32_size(mut value: u32) -> usize {
    let mut size = 1;
    while value & !0x7F != 0 {
        size += 1;
        value >>= 7;
    }
    size
}

/// Number of bytes `write_varint_u64` would produce
pub fn varint_u64_size(mut value: u64) -> usize {
    let mut size = 1;
    while value & !0x7F != 0 {
        size += 1;
        value >>= 7;
    }
    size
}

fn check_monotone(values: &[u32]) -> Result<()> {
    for window in values.windows(2) {
        if window[1] < window[0] {
            return Err(EngineError::Validation(format!(
                "sequence is not monotone: {} follows {}",
                window[1], window[0]
            )));
        }
    }
    Ok(())
}

/// Convert a monotone sequence into first-value-then-deltas form
pub fn delta_encode(values: &[u32]) -> Result<Vec<u32>> {
    check_monotone(values)?;
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut deltas = Vec::with_capacity(values.len());
    deltas.push(values[0]);
    for window in values.windows(2) {
        deltas.push(window[1] - window[0]);
    }
    Ok(deltas)
}

/// Reconstruct the original sequence from deltas by prefix sum
pub fn delta_decode(deltas: &[u32]) -> Vec<u32> {
    let mut values = Vec::with_capacity(deltas.len());
    let mut current = 0u32;
    for (index, delta) in deltas.iter().enumerate() {
        current = if index == 0 { *delta } else { current + delta };
        values.push(current);
    }
    values
}

/// Delta-encode a monotone sequence and write it as varints
pub fn write_delta_varint<W: Write>(writer: &mut W, values: &[u32]) -> Result<()> {
    for delta in delta_encode(values)? {
        write_varint_u32(writer, delta)?;
    }
    Ok(())
}

/// Read `count` delta+varint values and reconstruct the original sequence
pub fn read_delta_varint<R: Read>(reader: &mut R, count: usize) -> Result<Vec<u32>> {
    let mut values = Vec::with_capacity(count);
    let mut current = 0u32;
    for index in 0..count {
        let delta = read_varint_u32(reader)?;
        current = if index == 0 { delta } else { current + delta };
        values.push(current);
    }
    Ok(values)
}

/// Exact byte count `write_delta_varint` would produce
pub fn estimate_delta_varint_size(values: &[u32]) -> Result<usize> {
    Ok(delta_encode(values)?
        .into_iter()
        .map(varint_u32_size)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_u32_round_trip() {
        let samples = [0u32, 1, 127, 128, 16_383, 16_384, 1_000_000, u32::MAX];
        for &value in &samples {
            let mut buf = Vec::new();
            write_varint_u32(&mut buf, value).unwrap();
            assert_eq!(buf.len(), varint_u32_size(value));
            let decoded = read_varint_u32(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_varint_u64_round_trip() {
        let samples = [0u64, 127, 128, 1 << 32, u64::MAX];
        for &value in &samples {
            let mut buf = Vec::new();
            write_varint_u64(&mut buf, value).unwrap();
            assert_eq!(buf.len(), varint_u64_size(value));
            let decoded = read_varint_u64(&mut buf.as_slice()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_varint_width_budget() {
        // Six continuation bytes never terminate within the u32 budget
        let overlong = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = read_varint_u32(&mut overlong.as_slice()).unwrap_err();
        assert!(matches!(err, EngineError::Format { .. }));
    }

    #[test]
    fn test_varint_truncated_input() {
        let truncated = [0x80u8, 0x80];
        assert!(read_varint_u32(&mut truncated.as_slice()).is_err());
    }

    #[test]
    fn test_delta_round_trip() {
        let values = vec![10u32, 15, 20, 25];
        let deltas = delta_encode(&values).unwrap();
        assert_eq!(deltas, vec![10, 5, 5, 5]);
        assert_eq!(delta_decode(&deltas), values);
    }

    #[test]
    fn test_delta_rejects_non_monotone() {
        let err = delta_encode(&[5u32, 3]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_delta_varint_stream() {
        let values = vec![3u32, 7, 7, 300, 100_000];
        let mut buf = Vec::new();
        write_delta_varint(&mut buf, &values).unwrap();
        assert_eq!(buf.len(), estimate_delta_varint_size(&values).unwrap());
        let decoded = read_delta_varint(&mut buf.as_slice(), values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_empty_sequence() {
        let mut buf = Vec::new();
        write_delta_varint(&mut buf, &[]).unwrap();
        assert!(buf.is_empty());
        assert_eq!(estimate_delta_varint_size(&[]).unwrap(), 0);
    }
}
