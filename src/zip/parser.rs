//! Central directory reader.
//!
//! A schedule file is located from its tail: the EOCD record (and, for
//! large archives, the ZIP64 record it points to) gives the position of the
//! central directory, which in turn lists every entry with the offset of its
//! local header. Entry data is only touched when an entry is extracted.
//!
//! Anything malformed here makes the whole container unusable and is
//! reported as [`EwsxError::InvalidFormat`](crate::error::EwsxError); plain
//! read failures keep their `Io` error.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{EwsxError, Result};
use crate::io::ReadAt;

use super::structures::*;

/// An archive comment is at most `u16::MAX` bytes, so the EOCD record
/// always starts within this many bytes plus its own size from the end.
const EOCD_SEARCH_WINDOW: u64 = u16::MAX as u64 + EndOfCentralDirectory::SIZE as u64;

/// ZIP64 extended information extra field
const ZIP64_EXTRA_ID: u16 = 0x0001;
const SATURATED: u64 = 0xFFFF_FFFF;

/// Reads ZIP metadata from a [`ReadAt`] source.
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the EOCD record and return it with its absolute offset.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let record = EndOfCentralDirectory::SIZE;
        if self.size < record as u64 {
            return Err(invalid("file too small to be a zip archive"));
        }

        // Almost every writer leaves the comment empty
        let tail_offset = self.size - record as u64;
        let mut tail = vec![0u8; record];
        self.reader.read_exact_at(tail_offset, &mut tail).await?;
        if eocd_at(&tail, 0) {
            return Ok((EndOfCentralDirectory::from_bytes(&tail)?, tail_offset));
        }

        let window = EOCD_SEARCH_WINDOW.min(self.size);
        let window_start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(window_start, &mut buf).await?;

        let pos = (0..=buf.len() - record)
            .rev()
            .find(|&i| eocd_at(&buf, i))
            .ok_or_else(|| invalid("no End of Central Directory record found"))?;
        let eocd = EndOfCentralDirectory::from_bytes(&buf[pos..pos + record])?;
        Ok((eocd, window_start + pos as u64))
    }

    /// Follow the ZIP64 locator that precedes the EOCD at `eocd_offset`.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| invalid("ZIP64 locator missing"))?;
        let mut buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut buf).await?;
        let locator = Zip64EOCDLocator::from_bytes(&buf)?;

        let mut buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut buf)
            .await?;
        Zip64EOCD::from_bytes(&buf)
    }

    /// Every entry of the central directory, in stored order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, count) = if eocd.is_zip64() {
            let z = self.read_zip64_eocd(eocd_offset).await?;
            (z.cd_offset, z.cd_size, z.total_entries)
        } else {
            (
                u64::from(eocd.cd_offset),
                u64::from(eocd.cd_size),
                u64::from(eocd.total_entries),
            )
        };

        if cd_offset.saturating_add(cd_size) > self.size {
            return Err(invalid("central directory extends past end of file"));
        }

        let mut directory = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut directory).await?;

        // A corrupt count cannot claim more headers than the bytes can hold
        let mut entries = Vec::with_capacity(count.min(cd_size / CDFH_MIN_SIZE as u64) as usize);
        let mut cursor = Cursor::new(directory.as_slice());
        for _ in 0..count {
            let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
                EwsxError::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    invalid("truncated central directory")
                }
                other => other,
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Absolute offset of `entry`'s data.
    ///
    /// Name and extra lengths are taken from the local header, which does
    /// not have to agree with the central directory copy.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut header = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut header).await?;
        if &header[0..4] != LFH_SIGNATURE {
            return Err(invalid(format!(
                "bad Local File Header for {}",
                entry.file_name
            )));
        }

        let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
        let data_offset = entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len;

        if data_offset.saturating_add(entry.compressed_size) > self.size {
            return Err(invalid(format!(
                "data for {} extends past end of file",
                entry.file_name
            )));
        }
        Ok(data_offset)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// An EOCD signature at `pos` whose comment runs exactly to the end of `buf`.
fn eocd_at(buf: &[u8], pos: usize) -> bool {
    let end = pos + EndOfCentralDirectory::SIZE;
    if end > buf.len() || &buf[pos..pos + 4] != EndOfCentralDirectory::SIGNATURE {
        return false;
    }
    let comment_len = u16::from_le_bytes([buf[pos + 20], buf[pos + 21]]) as usize;
    comment_len == buf.len() - end
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(invalid("bad Central Directory File Header"));
    }

    // version made by, version needed
    cursor.set_position(cursor.position() + 4);
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let mut uncompressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = u64::from(cursor.read_u16::<LittleEndian>()?);
    let comment_len = u64::from(cursor.read_u16::<LittleEndian>()?);
    // disk number, internal and external attributes
    cursor.set_position(cursor.position() + 8);
    let mut lfh_offset = u64::from(cursor.read_u32::<LittleEndian>()?);

    let mut name = vec![0u8; name_len];
    cursor.read_exact(&mut name)?;
    // Older Windows builds write names in the local code page
    let file_name = String::from_utf8_lossy(&name).into_owned();
    let is_directory = file_name.ends_with('/') || file_name.ends_with('\\');

    let extra_end = cursor.position() + extra_len;
    while cursor.position() + 4 <= extra_end {
        let id = cursor.read_u16::<LittleEndian>()?;
        let len = cursor.read_u16::<LittleEndian>()?;
        let field_end = cursor.position() + u64::from(len);
        if id == ZIP64_EXTRA_ID {
            // Only the saturated header fields appear, in this order
            for value in [&mut uncompressed_size, &mut compressed_size, &mut lfh_offset] {
                if *value == SATURATED && cursor.position() + 8 <= field_end {
                    *value = cursor.read_u64::<LittleEndian>()?;
                }
            }
        }
        cursor.set_position(field_end);
    }

    cursor.set_position(extra_end + comment_len);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(invalid("truncated central directory"));
    }

    Ok(ZipFileEntry {
        file_name,
        flags,
        compression_method: CompressionMethod::from_u16(method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}
