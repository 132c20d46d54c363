//! On-disk segment format
//!
//! A segment is three checksum-guarded files plus a JSON descriptor:
//!
//! - `dict`: term dictionary, strictly ascending by term bytes
//! - `inv`: postings lists with skip entries every 128 documents
//! - `pos`: per-term position blocks, delta-encoded within a document
//!
//! Every file ends with a 4-byte big-endian CRC-32 of all preceding bytes.
//! Readers verify the footer before trusting any header field.

mod codec;
mod dictionary;
mod footer;
mod positions;
mod postings;
mod segment_meta;

pub use codec::*;
pub use dictionary::*;
pub use footer::*;
pub use positions::*;
pub use postings::*;
pub use segment_meta::*;

/// Dictionary file magic, "LSDI"
pub const DICT_MAGIC: u32 = 0x4C53_4449;
/// Postings file magic, "LSPI"
pub const POSTINGS_MAGIC: u32 = 0x4C53_5049;
/// Positions file magic, "LSPS"
pub const POSITIONS_MAGIC: u32 = 0x4C53_5053;
/// On-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// A skip entry is emitted every this many documents in a postings list
pub const SKIP_INTERVAL: usize = 128;

/// Magic + version bytes at the head of every segment file
pub(crate) const HEADER_LEN: u64 = 4 + 2;
