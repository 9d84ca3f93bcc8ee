use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::range_reader::RangeReader;

/// Range reader over a local file.
///
/// Used to re-read the partially written output TIFF while the writer keeps
/// its own append handle on the same path. The size is captured at open, so
/// a fresh reader must be opened after each layer is flushed.
pub struct FileRangeReader {
    file: Mutex<File>,
    size: u64,
}

impl FileRangeReader {
    /// Open `path` for random-access reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, std::io::Error> {
        if offset + len as u64 > self.size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "range {offset}+{len} exceeds file size {size}",
                    size = self.size
                ),
            ));
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = BytesMut::zeroed(len);
        file.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, (0u8..64).collect::<Vec<_>>())
            .await
            .unwrap();

        let reader = FileRangeReader::open(&path).await.unwrap();
        assert_eq!(reader.size(), 64);

        let head = reader.read_exact_at(0, 4).await.unwrap();
        assert_eq!(&head[..], &[0, 1, 2, 3]);

        let mid = reader.read_exact_at(10, 3).await.unwrap();
        assert_eq!(&mid[..], &[10, 11, 12]);
    }

    #[tokio::test]
    async fn test_read_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, vec![0u8; 16]).await.unwrap();

        let reader = FileRangeReader::open(&path).await.unwrap();
        assert!(reader.read_exact_at(10, 10).await.is_err());
    }
}
