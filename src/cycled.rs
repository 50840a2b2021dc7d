//! Copy-on-write storage for a value that is read and written across a bounded ring of pipeline
//! stages.
//!
//! A render/update pipeline with `N` stages in flight needs each stage to see a stable snapshot
//! of a buffer's contents even while a later stage is already writing the next one. [`CycledData`]
//! holds exactly `N` slots and a single read/write cursor pair; writes land on the write cursor's
//! slot and `cycle` advances both cursors, wrapping modulo `N`.

use std::sync::Arc;

/// A ring of `N` copy-on-write slots, one per in-flight pipeline stage.
///
/// `T` is cloned lazily: [`CycledData::write`] only clones the current slot's contents if another
/// `Arc` (typically held by a reader via [`CycledData::read`]) is still alive, matching the usual
/// `Arc::make_mut` copy-on-write idiom.
#[derive(Debug)]
pub struct CycledData<T> {
    slots: Vec<Arc<T>>,
    read_cursor: usize,
    write_cursor: usize,
}

impl<T: Clone> CycledData<T> {
    /// Creates a ring of `stages` slots, all initialized from `initial`.
    ///
    /// # Panics
    ///
    /// Panics if `stages` is zero.
    pub fn new(stages: usize, initial: T) -> Self {
        assert!(stages > 0, "a cycled ring needs at least one stage");

        let shared = Arc::new(initial);
        Self {
            slots: vec![shared; stages],
            read_cursor: 0,
            write_cursor: 0,
        }
    }

    /// Number of stages in the ring.
    pub fn stages(&self) -> usize {
        self.slots.len()
    }

    /// A read-only snapshot of the slot at the current read cursor.
    ///
    /// The returned `Arc` is safe to hold across a `write`/`cycle` on this same `CycledData`: a
    /// concurrent write to a different slot cannot alias it, and a write to this slot (shouldn't
    /// happen while still the read cursor, but is handled safely regardless) would clone instead
    /// of mutating in place.
    pub fn read(&self) -> Arc<T> {
        Arc::clone(&self.slots[self.read_cursor])
    }

    /// A read-only snapshot of the slot `stage` steps ahead of the write cursor (wrapping). Stage
    /// 0 is always the write cursor itself (the upstream/authoring stage); stage 1 is the slot a
    /// write at stage 0 lands in after one [`Self::cycle`], and so on.
    pub fn read_stage(&self, stage: usize) -> Arc<T> {
        let index = (self.write_cursor + stage) % self.slots.len();
        Arc::clone(&self.slots[index])
    }

    /// Mutably accesses the slot at the write cursor, cloning its contents first if any other
    /// handle to it is still outstanding.
    pub fn write(&mut self) -> &mut T {
        self.write_stage(0)
    }

    /// Mutably accesses the slot `stage` steps ahead of the write cursor (wrapping), cloning its
    /// contents first if any other handle to it is still outstanding. A mutation at a nonzero
    /// stage is local to that stage: it is not visible at stage 0 until that many `cycle()` calls
    /// have rotated it into place.
    pub fn write_stage(&mut self, stage: usize) -> &mut T {
        let index = (self.write_cursor + stage) % self.slots.len();
        Arc::make_mut(&mut self.slots[index])
    }

    /// Overwrites the write-cursor slot wholesale, replacing rather than cloning-and-mutating.
    pub fn set(&mut self, value: T) {
        self.slots[self.write_cursor] = Arc::new(value);
    }

    /// Advances both cursors by one stage (wrapping), making the just-written slot the next
    /// read target and freeing the slot after it up for writing.
    pub fn cycle(&mut self) {
        let stages = self.slots.len();
        self.read_cursor = self.write_cursor;
        self.write_cursor = (self.write_cursor + 1) % stages;
    }
}
