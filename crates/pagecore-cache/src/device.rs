//! Positioned-I/O devices backing the page cache.
//!
//! [`FileSwapDevice`] wraps the swap image with `pread`/`pwrite` style
//! calls via `std::os::unix::fs::FileExt`, which is thread-safe and does
//! not touch a shared seek position. [`MemSwapDevice`] serves tests and
//! benchmarks without disk latency.

use pagecore_error::{PcError, Result};
use pagecore_types::PageOffset;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Byte-addressed positioned I/O over the swap image.
///
/// Reads may stop short at end of file; that is reported through the
/// return count, not as an error. Writes either complete or fail.
pub trait SwapDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    ///
    /// A count below `buf.len()` means end of file was reached; the tail of
    /// `buf` is left untouched.
    fn read_at(&self, offset: PageOffset, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` at `offset`.
    ///
    /// A short write that cannot make progress surfaces as
    /// [`PcError::PartialWrite`] so the caller can keep the page dirty.
    fn write_at(&self, offset: PageOffset, data: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed swap device.
#[derive(Debug, Clone)]
pub struct FileSwapDevice {
    file: Arc<File>,
    len: u64,
}

impl FileSwapDevice {
    /// Open the swap image read-write. Fatal at startup when absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| PcError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| PcError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        trace!(
            target: "pagecore::device",
            event = "image_opened",
            path = %path.display(),
            len_bytes = len
        );
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl SwapDevice for FileSwapDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: PageOffset, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0_usize;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], offset.0 + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(source) => return Err(PcError::Read { offset, source }),
            }
        }
        Ok(filled)
    }

    fn write_at(&self, offset: PageOffset, data: &[u8]) -> Result<()> {
        let mut written = 0_usize;
        while written < data.len() {
            match self.file.write_at(&data[written..], offset.0 + written as u64) {
                Ok(0) => {
                    return Err(PcError::PartialWrite {
                        offset,
                        written,
                        expected: data.len(),
                    });
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(source) => return Err(PcError::Write { offset, source }),
            }
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(PcError::Io)
    }
}

/// In-memory swap device for tests and benchmarks.
///
/// Reads past the configured length behave like end of file; writes past it
/// fail like a full disk.
#[derive(Debug)]
pub struct MemSwapDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemSwapDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }

    /// Snapshot of the backing bytes (test assertions).
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Overwrite a region directly, bypassing the device interface.
    pub fn poke(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl SwapDevice for MemSwapDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.lock().len() as u64
    }

    fn read_at(&self, offset: PageOffset, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.bytes.lock();
        let Ok(start) = usize::try_from(offset.0) else {
            return Ok(0);
        };
        if start >= bytes.len() {
            return Ok(0);
        }
        let avail = bytes.len() - start;
        let count = avail.min(buf.len());
        buf[..count].copy_from_slice(&bytes[start..start + count]);
        Ok(count)
    }

    fn write_at(&self, offset: PageOffset, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let start = usize::try_from(offset.0).map_err(|_| PcError::PartialWrite {
            offset,
            written: 0,
            expected: data.len(),
        })?;
        let end = start.saturating_add(data.len());
        if end > bytes.len() {
            let fits = bytes.len().saturating_sub(start).min(data.len());
            bytes[start..start + fits].copy_from_slice(&data[..fits]);
            return Err(PcError::PartialWrite {
                offset,
                written: fits,
                expected: data.len(),
            });
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecore_types::PAGE_SIZE;

    #[test]
    fn mem_device_roundtrip() {
        let dev = MemSwapDevice::new(2 * PAGE_SIZE);
        dev.write_at(PageOffset(PAGE_SIZE as u64), &[0xAB_u8; PAGE_SIZE])
            .unwrap();
        let mut buf = vec![0_u8; PAGE_SIZE];
        let n = dev.read_at(PageOffset(PAGE_SIZE as u64), &mut buf).unwrap();
        assert_eq!(n, PAGE_SIZE);
        assert!(buf.iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn mem_device_reads_short_at_eof() {
        let dev = MemSwapDevice::new(5000);
        let mut buf = vec![0xFF_u8; PAGE_SIZE];
        let n = dev.read_at(PageOffset(4096), &mut buf).unwrap();
        assert_eq!(n, 904);
        // The tail is the caller's responsibility.
        assert!(buf[904..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn mem_device_read_past_end_is_empty() {
        let dev = MemSwapDevice::new(PAGE_SIZE);
        let mut buf = vec![0_u8; PAGE_SIZE];
        let n = dev.read_at(PageOffset(PAGE_SIZE as u64 * 4), &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn mem_device_write_past_end_is_partial() {
        let dev = MemSwapDevice::new(PAGE_SIZE + 100);
        let err = dev
            .write_at(PageOffset(PAGE_SIZE as u64), &[1_u8; PAGE_SIZE])
            .unwrap_err();
        match err {
            PcError::PartialWrite {
                written, expected, ..
            } => {
                assert_eq!(written, 100);
                assert_eq!(expected, PAGE_SIZE);
            }
            other => panic!("expected PartialWrite, got {other}"),
        }
    }

    #[test]
    fn file_device_open_missing_is_fatal() {
        let err = FileSwapDevice::open("/no/such/storage_swap.img").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn file_device_positioned_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swap.img");
        std::fs::write(&path, vec![0_u8; 4 * PAGE_SIZE]).unwrap();

        let dev = FileSwapDevice::open(&path).unwrap();
        assert_eq!(dev.len_bytes(), 4 * PAGE_SIZE as u64);

        dev.write_at(PageOffset(2 * PAGE_SIZE as u64), &[0x5A_u8; PAGE_SIZE])
            .unwrap();
        let mut buf = vec![0_u8; PAGE_SIZE];
        let n = dev
            .read_at(PageOffset(2 * PAGE_SIZE as u64), &mut buf)
            .unwrap();
        assert_eq!(n, PAGE_SIZE);
        assert!(buf.iter().all(|b| *b == 0x5A));
        dev.sync().unwrap();
    }
}
