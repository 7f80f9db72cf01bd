use flate2::Crc;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{EwsxError, Result};
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Upper bound on how far DEFLATE can expand its input
const MAX_DEFLATE_RATIO: u64 = 1032;
/// Largest buffer reserved up front from a size read out of the archive
const MAX_PREALLOC: u64 = 1 << 24;

/// Whether decoded entry data is checked against the stored CRC-32.
///
/// The policy belongs to one extractor, so relaxing it for a schedule
/// file never affects any other archive being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcPolicy {
    Verify,
    /// Tools that write schedule files do not always store a correct CRC
    #[default]
    Skip,
}

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
    crc: CrcPolicy,
}

impl<R: ReadAt> ZipExtractor<R> {
    /// Create an extractor that verifies checksums.
    pub fn new(reader: Arc<R>) -> Self {
        Self::with_crc_policy(reader, CrcPolicy::Verify)
    }

    pub fn with_crc_policy(reader: Arc<R>, crc: CrcPolicy) -> Self {
        Self {
            parser: ZipParser::new(reader),
            crc,
        }
    }

    pub fn crc_policy(&self) -> CrcPolicy {
        self.crc
    }

    /// List all entries in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Decode one entry's data into memory
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.flags & 0x0001 != 0 {
            return Err(EwsxError::Unsupported(format!(
                "{} is encrypted",
                entry.file_name
            )));
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.parser.reader().read_exact_at(data_offset, &mut raw).await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let ceiling = entry.compressed_size.saturating_mul(MAX_DEFLATE_RATIO);
                if entry.uncompressed_size > ceiling {
                    return Err(EwsxError::InvalidFormat(format!(
                        "{} claims {} bytes from {} compressed",
                        entry.file_name, entry.uncompressed_size, entry.compressed_size
                    )));
                }
                let hint = entry.uncompressed_size.min(MAX_PREALLOC) as usize;
                let mut out = Vec::with_capacity(hint);
                DeflateDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                out
            }
            CompressionMethod::Unknown(method) => {
                return Err(EwsxError::Unsupported(format!(
                    "compression method {} for {}",
                    method, entry.file_name
                )));
            }
        };

        if self.crc == CrcPolicy::Verify {
            if data.len() as u64 != entry.uncompressed_size {
                return Err(EwsxError::InvalidFormat(format!(
                    "{} decoded to {} bytes, expected {}",
                    entry.file_name,
                    data.len(),
                    entry.uncompressed_size
                )));
            }
            let mut crc = Crc::new();
            crc.update(&data);
            if crc.sum() != entry.crc32 {
                return Err(EwsxError::Checksum {
                    name: entry.file_name.clone(),
                    expected: entry.crc32,
                    actual: crc.sum(),
                });
            }
        }

        Ok(data)
    }

    /// Extract one entry to disk, creating parent directories as needed
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Decode before creating the file so a bad entry leaves nothing behind
        let data = self.extract_to_memory(entry).await?;

        let mut file = fs::File::create(output_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        Ok(())
    }
}
