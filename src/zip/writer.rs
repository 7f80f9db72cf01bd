//! Deflate ZIP writer for schedule files.
//!
//! Produces the plain (non-ZIP64) layout: each entry's Local File Header
//! followed by its data, then the Central Directory and the EOCD record.
//! Directories are written as explicit zero-length entries whose names end
//! in `/`, so empty directories such as `media/` survive a round trip.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::Crc;
use flate2::write::DeflateEncoder;
use std::io::Write;
use std::time::SystemTime;

use crate::error::{EwsxError, Result};

use super::structures::*;

const VERSION_NEEDED: u16 = 20;
/// MS-DOS host, APPNOTE version 2.0
const VERSION_MADE_BY: u16 = 20;
const DOS_DIRECTORY_ATTR: u32 = 0x10;

struct CentralRecord {
    name: String,
    method: CompressionMethod,
    time: u16,
    date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    lfh_offset: u32,
    external_attrs: u32,
}

/// Streaming writer over any [`Write`] sink.
pub struct ZipWriter<W: Write> {
    out: W,
    offset: u64,
    central: Vec<CentralRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            central: Vec::new(),
        }
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.central.len()
    }

    pub fn is_empty(&self) -> bool {
        self.central.is_empty()
    }

    /// Add an explicit directory entry. A trailing `/` is appended if missing.
    pub fn add_directory(&mut self, name: &str, modified: Option<SystemTime>) -> Result<()> {
        let mut name = entry_name(name)?;
        if !name.ends_with('/') {
            name.push('/');
        }
        self.write_entry(
            name,
            CompressionMethod::Stored,
            &[],
            0,
            0,
            modified,
            DOS_DIRECTORY_ATTR,
        )
    }

    /// Add a deflate-compressed file entry.
    pub fn add_file(&mut self, name: &str, data: &[u8], modified: Option<SystemTime>) -> Result<()> {
        let name = entry_name(name)?;
        if name.ends_with('/') {
            return Err(EwsxError::InvalidFormat(format!(
                "file entry {} ends with a separator",
                name
            )));
        }

        let mut crc = Crc::new();
        crc.update(data);

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let uncompressed_size = to_u32(data.len() as u64, &name)?;
        self.write_entry(
            name,
            CompressionMethod::Deflate,
            &compressed,
            crc.sum(),
            uncompressed_size,
            modified,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn write_entry(
        &mut self,
        name: String,
        method: CompressionMethod,
        payload: &[u8],
        crc32: u32,
        uncompressed_size: u32,
        modified: Option<SystemTime>,
        external_attrs: u32,
    ) -> Result<()> {
        if self.central.len() >= 0xFFFF {
            return Err(EwsxError::Unsupported(
                "more than 65534 entries needs ZIP64".to_string(),
            ));
        }
        let lfh_offset = to_u32(self.offset, &name)?;
        let compressed_size = to_u32(payload.len() as u64, &name)?;
        let name_len = u16::try_from(name.len())
            .map_err(|_| EwsxError::Unsupported(format!("entry name too long: {}", name)))?;
        let (time, date) = dos_datetime(modified.unwrap_or_else(SystemTime::now));

        let mut header = Vec::with_capacity(LFH_SIZE + name.len());
        header.extend_from_slice(LFH_SIGNATURE);
        header.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        header.write_u16::<LittleEndian>(FLAG_UTF8)?;
        header.write_u16::<LittleEndian>(method.as_u16())?;
        header.write_u16::<LittleEndian>(time)?;
        header.write_u16::<LittleEndian>(date)?;
        header.write_u32::<LittleEndian>(crc32)?;
        header.write_u32::<LittleEndian>(compressed_size)?;
        header.write_u32::<LittleEndian>(uncompressed_size)?;
        header.write_u16::<LittleEndian>(name_len)?;
        header.write_u16::<LittleEndian>(0)?; // extra field length
        header.extend_from_slice(name.as_bytes());

        self.out.write_all(&header)?;
        self.out.write_all(payload)?;
        self.offset += header.len() as u64 + payload.len() as u64;

        self.central.push(CentralRecord {
            name,
            method,
            time,
            date,
            crc32,
            compressed_size,
            uncompressed_size,
            lfh_offset,
            external_attrs,
        });
        Ok(())
    }

    /// Write the central directory and EOCD, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        let cd_offset = to_u32(self.offset, "central directory")?;
        let mut cd = Vec::new();

        for record in &self.central {
            cd.extend_from_slice(CDFH_SIGNATURE);
            cd.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
            cd.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            cd.write_u16::<LittleEndian>(FLAG_UTF8)?;
            cd.write_u16::<LittleEndian>(record.method.as_u16())?;
            cd.write_u16::<LittleEndian>(record.time)?;
            cd.write_u16::<LittleEndian>(record.date)?;
            cd.write_u32::<LittleEndian>(record.crc32)?;
            cd.write_u32::<LittleEndian>(record.compressed_size)?;
            cd.write_u32::<LittleEndian>(record.uncompressed_size)?;
            cd.write_u16::<LittleEndian>(record.name.len() as u16)?;
            cd.write_u16::<LittleEndian>(0)?; // extra field length
            cd.write_u16::<LittleEndian>(0)?; // comment length
            cd.write_u16::<LittleEndian>(0)?; // disk number start
            cd.write_u16::<LittleEndian>(0)?; // internal attributes
            cd.write_u32::<LittleEndian>(record.external_attrs)?;
            cd.write_u32::<LittleEndian>(record.lfh_offset)?;
            cd.extend_from_slice(record.name.as_bytes());
        }

        let cd_size = to_u32(cd.len() as u64, "central directory")?;
        let count = self.central.len() as u16;

        let mut eocd = Vec::with_capacity(EndOfCentralDirectory::SIZE);
        eocd.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        eocd.write_u16::<LittleEndian>(0)?; // this disk
        eocd.write_u16::<LittleEndian>(0)?; // disk with central directory
        eocd.write_u16::<LittleEndian>(count)?;
        eocd.write_u16::<LittleEndian>(count)?;
        eocd.write_u32::<LittleEndian>(cd_size)?;
        eocd.write_u32::<LittleEndian>(cd_offset)?;
        eocd.write_u16::<LittleEndian>(0)?; // comment length

        self.out.write_all(&cd)?;
        self.out.write_all(&eocd)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Archive-internal name: forward slashes, no leading separator.
fn entry_name(name: &str) -> Result<String> {
    let name = name.replace('\\', "/");
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return Err(EwsxError::InvalidFormat("empty entry name".to_string()));
    }
    Ok(name.to_string())
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| EwsxError::Unsupported(format!("{} exceeds 4 GiB (ZIP64 not written)", what)))
}
