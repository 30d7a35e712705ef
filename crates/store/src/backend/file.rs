//! File-backed block channel using position-based I/O (`pread`/`pwrite`).
//!
//! On Unix, reads are completely lock-free via [`std::os::unix::fs::FileExt`]:
//! `read_exact_at()` takes `&self` and never touches the file cursor, allowing
//! concurrent reads from multiple threads with zero synchronization.
//!
//! Writes and file extension are serialized via a [`parking_lot::Mutex`] guard
//! (a unit `()` sentinel, not wrapping the `File`) so a write never races a
//! `set_len`.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::{BlockChannel, validate_block_size};
use crate::error::{BlockId, Error, Result};

/// File-backed block channel.
///
/// The file holds nothing but blocks: block *i* starts at byte
/// `i * block_size`. The allocated block count is derived from the file
/// length, which must therefore be a multiple of the block size.
///
/// Durability requires the caller to invoke [`sync`](BlockChannel::sync)
/// after writes; block data is not guaranteed on disk until `fsync` completes.
pub struct FileChannel {
    /// The underlying file handle.
    file: File,
    /// Serializes writes and file extension operations.
    write_lock: Mutex<()>,
    /// Block size in bytes.
    block_size: usize,
    /// Allocated blocks (file length / block size).
    block_count: AtomicU64,
    /// Block count at the last successful sync.
    durable_blocks: AtomicU64,
    /// Set by `close`.
    closed: AtomicBool,
    /// Path, kept for diagnostics.
    path: PathBuf,
}

impl FileChannel {
    /// Opens an existing channel file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSize`] if `block_size` is unsupported.
    /// Returns [`Error::SizeMismatch`] if the file length is not a multiple of
    /// `block_size` (`actual` carries the stray trailing byte count).
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        let remainder = (len % block_size as u64) as usize;
        if remainder != 0 {
            return Err(Error::SizeMismatch { expected: block_size, actual: remainder });
        }
        let blocks = len / block_size as u64;

        tracing::debug!(path = %path.display(), blocks, block_size, "Opened file channel");

        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            block_size,
            block_count: AtomicU64::new(blocks),
            durable_blocks: AtomicU64::new(blocks),
            closed: AtomicBool::new(false),
            path,
        })
    }

    /// Creates a new, empty channel file (truncating any existing file).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSize`] if `block_size` is unsupported.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), block_size, "Created file channel");

        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            block_size,
            block_count: AtomicU64::new(0),
            durable_blocks: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            path,
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn ensure_allocated(&self, block_id: BlockId) -> Result<()> {
        if block_id >= self.block_count.load(Ordering::Acquire) {
            return Err(Error::NotFound { block_id });
        }
        Ok(())
    }
}

impl BlockChannel for FileChannel {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> Result<BlockId> {
        self.ensure_open()?;
        Ok(self.block_count.load(Ordering::Acquire))
    }

    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.ensure_allocated(block_id)?;

        let mut buf = vec![0u8; self.block_size];
        read_exact_at_offset(&self.file, &mut buf, self.block_offset(block_id))?;
        Ok(buf)
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if data.len() != self.block_size {
            return Err(Error::SizeMismatch { expected: self.block_size, actual: data.len() });
        }
        self.ensure_allocated(block_id)?;

        let _guard = self.write_lock.lock();
        write_all_at_offset(&self.file, data, self.block_offset(block_id))?;
        Ok(())
    }

    fn extend(&self, new_count: BlockId) -> Result<()> {
        self.ensure_open()?;

        let _guard = self.write_lock.lock();
        let current = self.block_count.load(Ordering::Acquire);
        if new_count <= current {
            return Ok(());
        }
        self.file.set_len(new_count * self.block_size as u64)?;
        self.block_count.store(new_count, Ordering::Release);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        let covered = self.block_count.load(Ordering::Acquire);
        // sync_all() so that file length changes from extend() are durable too.
        self.file.sync_all()?;
        self.durable_blocks.store(covered, Ordering::Release);
        Ok(())
    }

    fn durable_blocks(&self) -> BlockId {
        self.durable_blocks.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let result = self.sync();
        self.closed.store(true, Ordering::Release);
        tracing::debug!(path = %self.path.display(), "Closed file channel");
        result
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

/// Reads exactly `buf.len()` bytes from `file` at the given byte `offset`.
///
/// On Unix, this uses `pread(2)` via [`FileExt::read_exact_at`]: no lock,
/// no cursor mutation. On Windows, this falls back to `seek_read()` which
/// does update the cursor.
#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// Windows fallback: `seek_read` updates the file cursor, so this is NOT
/// lock-free.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

/// Windows fallback for positional writes.
#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::backend::DEFAULT_BLOCK_SIZE;

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_block_round_trip_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.gv");
        let pattern: Vec<u8> = (0..DEFAULT_BLOCK_SIZE).map(|i| i as u8).collect();

        {
            let channel = FileChannel::create(&path, DEFAULT_BLOCK_SIZE).unwrap();
            channel.extend(2).unwrap();
            channel.write_block(1, &pattern).unwrap();
            channel.sync().unwrap();
            channel.close().unwrap();
        }

        let channel = FileChannel::open(&path, DEFAULT_BLOCK_SIZE).unwrap();
        assert_eq!(channel.block_count().unwrap(), 2);
        assert_eq!(channel.read_block(1).unwrap(), pattern);
        assert_eq!(channel.durable_blocks(), 2);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_layout_is_dense_from_offset_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layout.gv");
        let channel = FileChannel::create(&path, 512).unwrap();
        channel.extend(3).unwrap();
        channel.write_block(2, &[0xAB; 512]).unwrap();
        channel.close().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), 3 * 512);
        assert!(raw[..1024].iter().all(|&b| b == 0));
        assert!(raw[1024..].iter().all(|&b| b == 0xAB));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_reopen_with_mismatched_length_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.gv");
        std::fs::write(&path, vec![0u8; 4096 + 100]).unwrap();

        let err = FileChannel::open(&path, 4096).err().unwrap();
        assert!(matches!(err, Error::SizeMismatch { expected: 4096, actual: 100 }), "got {err}");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_open_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = FileChannel::open(dir.path().join("missing.gv"), 4096).err().unwrap();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_create_rejects_invalid_block_size() {
        let dir = tempdir().unwrap();
        let err = FileChannel::create(dir.path().join("bad.gv"), 1000).err().unwrap();
        assert!(matches!(err, Error::InvalidBlockSize { size: 1000 }));
    }

    /// Concurrent read + write: one thread writes block X while another reads
    /// block Y. Verify no deadlock, no corruption, both complete.
    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_concurrent_read_write_different_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("concurrent.gv");
        let channel = Arc::new(FileChannel::create(&path, DEFAULT_BLOCK_SIZE).unwrap());
        channel.extend(8).unwrap();

        let mut block1 = vec![0xAAu8; DEFAULT_BLOCK_SIZE];
        block1[0] = 0x11;
        channel.write_block(1, &block1).unwrap();
        channel.sync().unwrap();

        let c_write = Arc::clone(&channel);
        let c_read = Arc::clone(&channel);

        let writer = std::thread::spawn(move || {
            for i in 0u8..50 {
                let mut data = vec![i; DEFAULT_BLOCK_SIZE];
                data[0] = 0xFF;
                c_write.write_block(5, &data).unwrap();
            }
        });

        let reader = std::thread::spawn(move || {
            for _ in 0..50 {
                let data = c_read.read_block(1).unwrap();
                assert_eq!(data[0], 0x11, "block 1 corrupted during concurrent write to block 5");
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();

        let final_block5 = channel.read_block(5).unwrap();
        assert_eq!(final_block5[0], 0xFF);
        assert_eq!(final_block5[1], 49);
    }

    /// Extending the file while readers run must not disturb existing blocks.
    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_concurrent_extend_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extend.gv");
        let channel = Arc::new(FileChannel::create(&path, DEFAULT_BLOCK_SIZE).unwrap());
        channel.extend(1).unwrap();

        let mut block0 = vec![0u8; DEFAULT_BLOCK_SIZE];
        block0[0] = 0x42;
        block0[DEFAULT_BLOCK_SIZE - 1] = 0x99;
        channel.write_block(0, &block0).unwrap();

        let c_extend = Arc::clone(&channel);
        let c_read = Arc::clone(&channel);

        let extender = std::thread::spawn(move || {
            for i in 2u64..20 {
                c_extend.extend(i).unwrap();
            }
        });

        let reader = std::thread::spawn(move || {
            for _ in 0..100 {
                let data = c_read.read_block(0).unwrap();
                assert_eq!(data[0], 0x42);
                assert_eq!(data[DEFAULT_BLOCK_SIZE - 1], 0x99);
            }
        });

        extender.join().unwrap();
        reader.join().unwrap();
        assert_eq!(channel.block_count().unwrap(), 19);
    }
}
