mod local;

pub use local::LocalFileReader;

use async_trait::async_trait;

use crate::error::Result;

/// Random access reads from an archive source.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer, returning the byte count
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` when the source ends before the buffer is full,
    /// which for a zip archive means a header or entry points past the file's end.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read past end of archive at offset {}", offset + filled as u64),
                )
                .into());
            }
            filled += n;
        }
        Ok(())
    }
}
