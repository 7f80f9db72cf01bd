//! ZIP container reading and writing.
//!
//! Schedule files are ordinary ZIP archives, so this module carries a small
//! codec for exactly the subset they use.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: Entry decoding, with a per-extractor [`CrcPolicy`]
//! - [`writer`]: Deflate archive writer with explicit directory entries
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! ## Supported Features
//!
//! - Reading: ZIP64 archives, STORED and DEFLATE entries
//! - Writing: DEFLATE files and STORED directory entries, UTF-8 names
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No ZIP64 output

mod extractor;
mod parser;
mod structures;
mod writer;

pub use extractor::{CrcPolicy, ZipExtractor};
pub use parser::ZipParser;
pub use structures::*;
pub use writer::ZipWriter;
