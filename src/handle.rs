//! Scoped read/write access to a buffer's bytes at one pipeline stage.
//!
//! A [`BufferHandle`] is the only way to see a buffer's raw bytes. Acquiring one forces the
//! residency a caller needs (read: whatever is cheapest; write: fully `Resident`, pinned for the
//! handle's lifetime) and releasing it (via `Drop`) restores bookkeeping — this is the "scoped
//! acquisition" pattern the design calls for, implemented the way the rest of the engine ties
//! cleanup to RAII rather than an explicit `close`.

use {
    crate::{
        buffer::{Inner, VertexBuffer},
        error::BufferError,
    },
    std::sync::Arc,
};

#[cfg_attr(not(feature = "parking_lot"), allow(unused_mut))]
fn lock_inner(buffer: &VertexBuffer) -> impl std::ops::DerefMut<Target = Inner> + '_ {
    #[cfg(feature = "parking_lot")]
    {
        buffer.inner.lock()
    }

    #[cfg(not(feature = "parking_lot"))]
    {
        buffer.inner.lock().unwrap()
    }
}

/// A scoped accessor over one pipeline stage of a buffer's bytes.
///
/// Constructing a writable handle forces the buffer `Resident` and pins it there: eviction
/// refuses to touch a pinned buffer (see [`crate::lru::Page`]) for the handle's entire lifetime.
/// Dropping the handle releases the pin and, if the stage-0 byte length changed, resizes the RAM
/// tier's accounting for this buffer.
pub struct BufferHandle {
    buffer: Arc<VertexBuffer>,
    stage: usize,
    writable: bool,
    size_at_open: u64,
}

impl BufferHandle {
    /// Opens a handle onto `stage` of `buffer`. A writable handle forces `Resident` first.
    pub fn open(buffer: Arc<VertexBuffer>, stage: usize, writable: bool) -> Result<Self, BufferError> {
        if writable {
            buffer.make_resident()?;
            buffer.pin();
        }

        let size_at_open = lock_inner(&buffer).stages.read_stage(stage).bytes.len() as u64;

        Ok(Self {
            buffer,
            stage,
            writable,
            size_at_open,
        })
    }

    /// Whether this handle was opened writable.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// A read-only view of the bytes at this handle's stage.
    pub fn bytes(&self) -> Arc<Vec<u8>> {
        Arc::new(lock_inner(&self.buffer).stages.read_stage(self.stage).bytes.clone())
    }

    fn require_writable(&self) -> Result<(), BufferError> {
        if self.writable {
            Ok(())
        } else {
            Err(BufferError::NotResident)
        }
    }

    fn stride(&self) -> Result<u32, BufferError> {
        self.buffer.format_stride()
    }

    /// Resizes this handle's stage to `rows * stride`, zero-initializing any newly-added bytes.
    /// Returns whether the byte length actually changed.
    pub fn set_num_rows(&mut self, rows: u32) -> Result<bool, BufferError> {
        self.require_writable()?;
        let stride = self.stride()? as usize;
        let new_len = rows as usize * stride;

        let mut inner = lock_inner(&self.buffer);
        let stage = inner.stages.write_stage(self.stage);
        let changed = stage.bytes.len() != new_len;
        stage.bytes.resize(new_len, 0);
        stage.data_full_size = new_len as u64;

        Ok(changed)
    }

    /// Same as [`Self::set_num_rows`] but newly-added bytes may be left uninitialized — cheaper
    /// when the caller is about to overwrite them anyway.
    pub fn unclean_set_num_rows(&mut self, rows: u32) -> Result<bool, BufferError> {
        self.require_writable()?;
        let stride = self.stride()? as usize;
        let new_len = rows as usize * stride;

        let mut inner = lock_inner(&self.buffer);
        let stage = inner.stages.write_stage(self.stage);
        let changed = stage.bytes.len() != new_len;

        if new_len > stage.bytes.len() {
            stage.bytes.reserve(new_len - stage.bytes.len());
            // SAFETY: capacity was just reserved above; the new tail bytes are uninitialized,
            // matching the "unclean" contract this method advertises.
            unsafe { stage.bytes.set_len(new_len) };
        } else {
            stage.bytes.truncate(new_len);
        }
        stage.data_full_size = new_len as u64;

        Ok(changed)
    }

    /// Replaces this handle's stage bytes wholesale with a resident copy of `other`'s bytes.
    pub fn copy_data_from(&mut self, other: &Arc<VertexBuffer>) -> Result<(), BufferError> {
        self.require_writable()?;
        other.make_resident()?;

        let source = lock_inner(other).stages.read_stage(0).bytes.clone();

        let mut inner = lock_inner(&self.buffer);
        let stage = inner.stages.write_stage(self.stage);
        stage.data_full_size = source.len() as u64;
        stage.bytes = source;

        Ok(())
    }

    /// Copies `src_len` bytes starting at `src_start` from `other` into this handle's bytes
    /// starting at `dst_start`, growing or shrinking the destination around `dst_start` first if
    /// `src_len != dst_len`. Both ends are clamped to the buffers' actual sizes.
    pub fn copy_subdata_from(
        &mut self,
        dst_start: usize,
        dst_len: usize,
        other: &Arc<VertexBuffer>,
        src_start: usize,
        src_len: usize,
    ) -> Result<(), BufferError> {
        self.require_writable()?;
        other.make_resident()?;

        let source = lock_inner(other).stages.read_stage(0).bytes.clone();
        let src_start = src_start.min(source.len());
        let src_end = (src_start + src_len).min(source.len());
        let region = &source[src_start..src_end];

        let mut inner = lock_inner(&self.buffer);
        let stage = inner.stages.write_stage(self.stage);

        let dst_start = dst_start.min(stage.bytes.len());
        let dst_end = (dst_start + dst_len).min(stage.bytes.len().max(dst_start));

        if region.len() != dst_end - dst_start {
            let new_len = dst_start + region.len() + stage.bytes.len().saturating_sub(dst_end);
            let tail = stage.bytes[dst_end.min(stage.bytes.len())..].to_vec();
            stage.bytes.truncate(dst_start);
            stage.bytes.extend_from_slice(region);
            stage.bytes.extend_from_slice(&tail);
            stage.bytes.resize(new_len, 0);
        } else {
            stage.bytes[dst_start..dst_end].copy_from_slice(region);
        }

        stage.data_full_size = stage.bytes.len() as u64;

        Ok(())
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if !self.writable {
            return;
        }

        let new_size = {
            let mut inner = lock_inner(&self.buffer);
            let stamp = self.buffer.shared.next_stamp();
            let stage = inner.stages.write_stage(self.stage);
            stage.modified = stamp;
            stage.bytes.len() as u64
        };

        self.buffer.unpin();

        if self.stage == 0 && new_size != self.size_at_open {
            self.buffer.resize_in_current_tier(new_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::fixture_buffer;

    #[test]
    fn writable_handle_pins_residency_against_eviction() {
        let buffer = fixture_buffer();
        let handle = BufferHandle::open(Arc::clone(&buffer), 0, true).unwrap();

        assert_eq!(
            crate::lru::Page::evict(&buffer),
            crate::lru::EvictOutcome::Refused
        );

        drop(handle);
    }

    #[test]
    fn set_num_rows_zero_fills_new_bytes() {
        let buffer = fixture_buffer();
        let mut handle = BufferHandle::open(Arc::clone(&buffer), 0, true).unwrap();

        let stride = buffer.format_stride().unwrap();
        let changed = handle.set_num_rows(4).unwrap();

        assert!(changed);
        assert_eq!(handle.bytes().len(), 4 * stride as usize);
    }

    #[test]
    fn copy_data_from_replaces_bytes_wholesale() {
        let source = fixture_buffer();
        let dest = fixture_buffer();

        {
            let mut handle = BufferHandle::open(Arc::clone(&source), 0, true).unwrap();
            handle.set_num_rows(2).unwrap();
        }

        let mut dest_handle = BufferHandle::open(Arc::clone(&dest), 0, true).unwrap();
        dest_handle.copy_data_from(&source).unwrap();

        assert_eq!(dest_handle.bytes().len(), source.data_full_size() as usize);
    }

    #[test]
    fn read_only_handle_does_not_pin() {
        let buffer = fixture_buffer();
        let handle = BufferHandle::open(Arc::clone(&buffer), 0, false).unwrap();

        assert_eq!(
            crate::lru::Page::evict(&buffer),
            crate::lru::EvictOutcome::Demoted
        );

        drop(handle);
    }
}
