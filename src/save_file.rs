//! The disk spill file: a single scratch arena shared by every disk-tier buffer.
//!
//! The allocator is a first-fit free list over byte offsets, matching the scale of the rest of
//! this crate's bookkeeping structures — there is no need for anything fancier than a `Vec` of
//! free runs, since spills are infrequent relative to frame cadence and the file is scratch (it
//! is recreated on every process start, see [`SaveFile::create`]).

use {
    crate::error::SaveFileError,
    log::{debug, trace, warn},
    std::{
        fs::{File, OpenOptions},
        io::{Read, Seek, SeekFrom, Write},
        ops::Range,
        path::{Path, PathBuf},
    },
};

#[cfg(feature = "parking_lot")]
use parking_lot::Mutex;

#[cfg(not(feature = "parking_lot"))]
use std::sync::Mutex;

/// An allocator-assigned `(offset, length)` pair inside a [`SaveFile`]'s scratch arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SaveBlock {
    offset: u64,
    size: u64,
}

impl SaveBlock {
    /// Byte length of the allocation.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size
    }
}

struct Inner {
    file: File,
    len: u64,
    max_len: Option<u64>,
    free: Vec<Range<u64>>,
}

impl Inner {
    fn allocate(&mut self, size: u64) -> Option<SaveBlock> {
        // First-fit: the free list is kept sorted by offset, so the first run that's big enough
        // is also the lowest-offset one.
        if let Some(pos) = self.free.iter().position(|run| run.end - run.start >= size) {
            let run = self.free[pos].clone();
            let offset = run.start;

            if run.end - run.start == size {
                self.free.remove(pos);
            } else {
                self.free[pos] = (run.start + size)..run.end;
            }

            return Some(SaveBlock { offset, size });
        }

        // No free run fits; grow the file, if the configured maximum allows it.
        let new_len = self.len + size;
        if let Some(max_len) = self.max_len {
            if new_len > max_len {
                return None;
            }
        }

        let offset = self.len;
        self.len = new_len;

        Some(SaveBlock { offset, size })
    }

    fn free(&mut self, block: SaveBlock) {
        let range = block.range();
        let pos = self
            .free
            .iter()
            .position(|run| run.start >= range.end)
            .unwrap_or(self.free.len());
        self.free.insert(pos, range);
        self.coalesce();
    }

    fn coalesce(&mut self) {
        let mut i = 0;
        while i + 1 < self.free.len() {
            if self.free[i].end == self.free[i + 1].start {
                self.free[i].end = self.free[i + 1].end;
                self.free.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

/// A single on-disk arena backing every `Disk`/`CompressedDisk` vertex buffer.
///
/// The file itself is considered scratch: it is created fresh on [`SaveFile::create`] and no
/// `fsync` is ever issued. It need not survive process exit.
pub struct SaveFile {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl SaveFile {
    /// Creates (truncating any existing file of the same name) a save file at
    /// `directory/prefix.bin`, capped at `max_len` bytes (`None` for unlimited).
    pub fn create(directory: &Path, prefix: &str, max_len: Option<u64>) -> Result<Self, SaveFileError> {
        std::fs::create_dir_all(directory)?;

        let path = directory.join(format!("{prefix}.bin"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        debug!("created save file at {}", path.display());

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                len: 0,
                max_len,
                free: Vec::new(),
            }),
        })
    }

    /// The path of the underlying scratch file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg_attr(not(feature = "parking_lot"), allow(unused_mut))]
    fn lock(&self) -> impl std::ops::DerefMut<Target = Inner> + '_ {
        #[cfg(feature = "parking_lot")]
        {
            self.inner.lock()
        }

        #[cfg(not(feature = "parking_lot"))]
        {
            self.inner.lock().unwrap()
        }
    }

    /// Writes `bytes` at an allocator-chosen offset, returning the [`SaveBlock`] to read it back
    /// with later. Returns `Ok(None)` (not an error) if the configured maximum size would be
    /// exceeded — the caller is expected to keep the buffer resident in a higher tier.
    pub fn write_data(&self, bytes: &[u8]) -> Result<Option<SaveBlock>, SaveFileError> {
        let mut inner = self.lock();

        let Some(block) = inner.allocate(bytes.len() as u64) else {
            warn!(
                "save file write of {} bytes refused: would exceed configured maximum",
                bytes.len()
            );
            return Ok(None);
        };

        inner.file.seek(SeekFrom::Start(block.offset))?;
        inner.file.write_all(bytes)?;

        trace!("wrote {} bytes at offset {}", block.size, block.offset);

        Ok(Some(block))
    }

    /// Reads the bytes previously written at `block` into a freshly-allocated `Vec<u8>`.
    pub fn read_data(&self, block: SaveBlock) -> Result<Vec<u8>, SaveFileError> {
        let mut inner = self.lock();

        let mut buf = vec![0u8; block.size as usize];
        inner.file.seek(SeekFrom::Start(block.offset))?;
        inner
            .file
            .read_exact(&mut buf)
            .map_err(|_| SaveFileError::ReadCorrupt)?;

        Ok(buf)
    }

    /// Returns `block`'s range to the free list, coalescing with adjacent free runs.
    pub fn free(&self, block: SaveBlock) {
        let mut inner = self.lock();
        inner.free(block);
    }

    /// Total bytes currently occupied by the file (allocated and free runs together).
    pub fn len(&self) -> u64 {
        self.lock().len
    }

    /// Whether the file currently holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let save_file = SaveFile::create(dir.path(), "test", None).unwrap();

        let data = b"hello vertex world".to_vec();
        let block = save_file.write_data(&data).unwrap().unwrap();
        let restored = save_file.read_data(block).unwrap();

        assert_eq!(restored, data);
    }

    #[test]
    fn free_block_is_reused_first_fit() {
        let dir = tempdir().unwrap();
        let save_file = SaveFile::create(dir.path(), "test", None).unwrap();

        let a = save_file.write_data(&vec![1u8; 100]).unwrap().unwrap();
        let b = save_file.write_data(&vec![2u8; 100]).unwrap().unwrap();
        save_file.free(a);

        let before_len = save_file.len();
        let c = save_file.write_data(&vec![3u8; 100]).unwrap().unwrap();

        assert_eq!(save_file.len(), before_len, "reused the freed run instead of growing");
        assert_eq!(c.offset, 0);

        let restored_b = save_file.read_data(b).unwrap();
        assert_eq!(restored_b, vec![2u8; 100]);
    }

    #[test]
    fn exceeding_max_len_refuses_without_error() {
        let dir = tempdir().unwrap();
        let save_file = SaveFile::create(dir.path(), "test", Some(1024)).unwrap();

        let result = save_file.write_data(&vec![0u8; 2048]).unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn adjacent_free_runs_coalesce() {
        let dir = tempdir().unwrap();
        let save_file = SaveFile::create(dir.path(), "test", None).unwrap();

        let a = save_file.write_data(&vec![0u8; 64]).unwrap().unwrap();
        let b = save_file.write_data(&vec![0u8; 64]).unwrap().unwrap();
        save_file.free(a);
        save_file.free(b);

        let big = save_file.write_data(&vec![0u8; 128]).unwrap().unwrap();
        assert_eq!(big.offset, 0);
    }
}
