//! The four-state vertex buffer residency state machine.
//!
//! Mirrors the design note "implement as a tagged variant for the class and a free function per
//! transition, not as inheritance" — [`Residency`] is the tag, and `make_resident` /
//! `make_compressed` / `make_disk` / `restore_from_disk` are the transition functions. Tier
//! enrollment is re-established on every transition rather than cached, so it can never drift
//! from the tag.

pub mod device;

use {
    crate::{
        codec::Codec,
        cycled::CycledData,
        error::BufferError,
        format::{FormatId, FormatTable},
        lru::{Budget, EvictOutcome, Page},
        save_file::{SaveBlock, SaveFile},
    },
    device::{DeviceContext, DeviceId, DeviceTable},
    log::{trace, warn},
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[cfg(feature = "parking_lot")]
use parking_lot::Mutex;

#[cfg(not(feature = "parking_lot"))]
use std::sync::Mutex;

use crate::lru::LruTier;

/// Advisory tag describing how a buffer's bytes will be used. Consumed by device collaborators,
/// not by this crate's own logic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UsageHint {
    Static = 0,
    Dynamic = 1,
    Stream = 2,
    Client = 3,
}

impl UsageHint {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Static),
            1 => Some(Self::Dynamic),
            2 => Some(Self::Stream),
            3 => Some(Self::Client),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Where a buffer's bytes currently live.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Residency {
    Resident,
    Compressed,
    Disk,
    CompressedDisk,
}

/// The tiers and collaborators every buffer needs to carry out its own transitions and its own
/// eviction hook. Handed out by [`crate::registry::Registry`] at construction; never constructed
/// directly by a caller outside this crate.
pub(crate) struct Shared {
    pub(crate) ram_tier: Arc<Mutex<LruTier<Arc<VertexBuffer>>>>,
    pub(crate) compressed_tier: Arc<Mutex<LruTier<Arc<VertexBuffer>>>>,
    pub(crate) disk_tier: Arc<Mutex<LruTier<Arc<VertexBuffer>>>>,
    pub(crate) save_file: Arc<SaveFile>,
    pub(crate) format_table: Arc<Mutex<FormatTable>>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) compression_level: u32,
    pub(crate) min_compress_size: u64,
    pub(crate) next_id: AtomicU64,
    pub(crate) next_stamp: AtomicU64,
}

impl Shared {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_stamp(&self) -> u64 {
        self.next_stamp.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct StageData {
    pub(crate) bytes: Vec<u8>,
    pub(crate) data_full_size: u64,
    pub(crate) modified: u64,
}

pub(crate) struct Inner {
    pub(crate) residency: Residency,
    pub(crate) stages: CycledData<StageData>,
    pub(crate) save_block: Option<SaveBlock>,
    /// When `residency == Compressed` (or `CompressedDisk`'s disk payload), whether the stored
    /// bytes are the genuine codec output (`false`) or the original bytes kept verbatim because
    /// compression was skipped or did not help (`true`).
    pub(crate) stored_raw: bool,
    pub(crate) pin_count: u32,
    pub(crate) devices: DeviceTable,
}

/// A large, tiered-residency binary buffer ("vertex array").
pub struct VertexBuffer {
    id: u64,
    format: FormatId,
    usage_hint: UsageHint,
    pub(crate) shared: Arc<Shared>,
    pub(crate) inner: Mutex<Inner>,
}

impl PartialEq for VertexBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::fmt::Debug for VertexBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("usage_hint", &self.usage_hint)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(not(feature = "parking_lot"), allow(unused_mut))]
fn lock<T>(mutex: &Mutex<T>) -> impl std::ops::DerefMut<Target = T> + '_ {
    #[cfg(feature = "parking_lot")]
    {
        mutex.lock()
    }

    #[cfg(not(feature = "parking_lot"))]
    {
        mutex.lock().unwrap()
    }
}

impl VertexBuffer {
    pub(crate) fn new(format: FormatId, usage_hint: UsageHint, shared: Arc<Shared>, initial: Vec<u8>) -> Arc<Self> {
        Self::new_with_stages(format, usage_hint, shared, initial, 1)
    }

    /// Same as [`Self::new`], but allocates `stages` pipeline slots instead of one.
    pub(crate) fn new_with_stages(
        format: FormatId,
        usage_hint: UsageHint,
        shared: Arc<Shared>,
        initial: Vec<u8>,
        stages: usize,
    ) -> Arc<Self> {
        let data_full_size = initial.len() as u64;
        let modified = shared.next_stamp();
        let buffer = Arc::new(Self {
            id: shared.next_id(),
            format,
            usage_hint,
            shared,
            inner: Mutex::new(Inner {
                residency: Residency::Resident,
                stages: CycledData::new(
                    stages.max(1),
                    StageData {
                        bytes: initial,
                        data_full_size,
                        modified,
                    },
                ),
                save_block: None,
                stored_raw: true,
                pin_count: 0,
                devices: DeviceTable::default(),
            }),
        });

        lock(&buffer.shared.ram_tier).enroll(Arc::clone(&buffer), data_full_size);

        buffer
    }

    /// Reconstructs a buffer (used by deserialization) with the state machine beginning at
    /// `Resident`, already-decoded native-endian bytes, and a caller-chosen stage count.
    pub(crate) fn from_decoded(
        format: FormatId,
        usage_hint: UsageHint,
        shared: Arc<Shared>,
        bytes: Vec<u8>,
        stages: usize,
    ) -> Arc<Self> {
        let data_full_size = bytes.len() as u64;
        let modified = shared.next_stamp();
        let buffer = Arc::new(Self {
            id: shared.next_id(),
            format,
            usage_hint,
            shared,
            inner: Mutex::new(Inner {
                residency: Residency::Resident,
                stages: CycledData::new(
                    stages.max(1),
                    StageData {
                        bytes,
                        data_full_size,
                        modified,
                    },
                ),
                save_block: None,
                stored_raw: true,
                pin_count: 0,
                devices: DeviceTable::default(),
            }),
        });

        lock(&buffer.shared.ram_tier).enroll(Arc::clone(&buffer), data_full_size);

        buffer
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> FormatId {
        self.format
    }

    pub fn usage_hint(&self) -> UsageHint {
        self.usage_hint
    }

    pub fn residency(&self) -> Residency {
        lock(&self.inner).residency
    }

    /// Uncompressed byte length, valid regardless of current residency.
    pub fn data_full_size(&self) -> u64 {
        lock(&self.inner).stages.read_stage(0).data_full_size
    }

    /// Advances every pipeline stage by one step, making the bytes last written at stage 0
    /// visible to readers of stage 1, and so on around the ring. Called by the host once per
    /// frame, after `lru_epoch`.
    pub fn cycle(&self) {
        lock(&self.inner).stages.cycle();
    }

    /// A clone of this buffer's stage-0 bytes, whatever they currently hold (resident,
    /// compressed, or empty if spilled to disk). Callers that need genuine resident bytes must
    /// call [`Self::make_resident`] first.
    pub(crate) fn resident_bytes(&self) -> Vec<u8> {
        lock(&self.inner).stages.read_stage(0).bytes.clone()
    }

    /// The row width of this buffer's array format.
    pub fn format_stride(&self) -> Result<u32, BufferError> {
        lock(&self.shared.format_table)
            .get(self.format)
            .map(|format| format.stride())
            .ok_or(BufferError::FormatUnregistered)
    }

    /// Updates the byte size this buffer contributes to whichever tier it currently occupies,
    /// without changing residency. Used after an in-place resize of resident bytes.
    pub(crate) fn resize_in_current_tier(self: &Arc<Self>, new_size: u64) {
        let tier = self.tier_for(lock(&self.inner).residency);
        lock(&self.tier_lock(tier)).resize(self, new_size);
    }

    pub(crate) fn pin(&self) {
        lock(&self.inner).pin_count += 1;
    }

    pub(crate) fn unpin(&self) {
        let mut inner = lock(&self.inner);
        inner.pin_count = inner.pin_count.saturating_sub(1);
    }

    /// Registers `device`, creating a context if one is not already present.
    pub fn prepare_now(self: &Arc<Self>, device: DeviceId) -> DeviceContext {
        let mut inner = lock(&self.inner);
        inner.devices.prepare_now(device, self)
    }

    /// Registers `device`, creating a context if one is not already present. Create-or-get, same
    /// as [`Self::prepare_now`]: `is_prepared(device)` is true immediately after this returns, per
    /// §8's "isPrepared(d) after prepare(d) is true".
    pub fn prepare(self: &Arc<Self>, device: DeviceId) -> DeviceContext {
        let mut inner = lock(&self.inner);
        inner.devices.prepare_now(device, self)
    }

    pub fn is_prepared(&self, device: DeviceId) -> bool {
        lock(&self.inner).devices.is_prepared(device)
    }

    /// Drops `device`'s registration. `UnknownDeviceContext` indicates a collaborator bug: the
    /// caller asked to release a device it never prepared.
    pub fn release(&self, device: DeviceId) -> Result<DeviceContext, BufferError> {
        lock(&self.inner)
            .devices
            .release(device)
            .ok_or(BufferError::UnknownDeviceContext)
    }

    pub fn release_all(&self) -> Vec<DeviceContext> {
        lock(&self.inner).devices.release_all()
    }

    /// Withdraws this buffer from whichever tier currently holds it, frees its on-disk
    /// `SaveBlock` (if any), and releases every device context. Called once by
    /// [`crate::registry::Registry::destroy`] when the host is done with a buffer, per §3's
    /// lifecycle: "destroyed when no owner remains, at which point its SaveBlock (if any) is
    /// freed and every device context is released."
    pub(crate) fn destroy(self: &Arc<Self>) {
        let mut inner = lock(&self.inner);

        if inner.pin_count > 0 {
            warn!(
                "vertex buffer {}: destroyed while still pinned by a writable handle",
                self.id
            );
        }

        let tier = self.tier_for(inner.residency);
        if let Some(block) = inner.save_block.take() {
            self.shared.save_file.free(block);
        }
        inner.devices.release_all();
        drop(inner);

        lock(&self.tier_lock(tier)).withdraw(self);
    }

    /// Promotes to `Resident`, decompressing or reading back from disk as needed. A no-op if
    /// already `Resident`.
    pub fn make_resident(self: &Arc<Self>) -> Result<(), BufferError> {
        let mut inner = lock(&self.inner);

        let old_tier = self.tier_for(inner.residency);
        match inner.residency {
            Residency::Resident => {}
            Residency::Compressed => self.decompress_locked(&mut inner)?,
            Residency::Disk => {
                self.restore_from_disk_locked(&mut inner)?;
            }
            Residency::CompressedDisk => {
                self.restore_from_disk_locked(&mut inner)?;
                self.decompress_locked(&mut inner)?;
            }
        }

        let size = inner.stages.read_stage(0).data_full_size;
        drop(inner);

        self.rehome(old_tier, Tier::Ram, size);

        Ok(())
    }

    /// Promotes to at least `Compressed`, restoring from disk first if necessary. A no-op if
    /// already `Compressed`.
    pub fn make_compressed(self: &Arc<Self>) -> Result<(), BufferError> {
        let mut inner = lock(&self.inner);

        let old_tier = self.tier_for(inner.residency);
        match inner.residency {
            Residency::Resident => self.compress_locked(&mut inner),
            Residency::Compressed => {}
            Residency::Disk => {
                self.restore_from_disk_locked(&mut inner)?;
                self.compress_locked(&mut inner);
            }
            Residency::CompressedDisk => self.restore_from_disk_locked(&mut inner)?,
        }

        debug_assert_eq!(inner.residency, Residency::Compressed);
        let size = inner.stages.read_stage(0).bytes.len() as u64;
        drop(inner);

        self.rehome(old_tier, Tier::Compressed, size);

        Ok(())
    }

    /// Demotes to the disk tier, spilling current bytes to the shared save file. Returns
    /// `Err(BufferError::SaveFileFull)` if the save file refuses the write, leaving residency
    /// unchanged (and the current tier re-marked MRU).
    pub fn make_disk(self: &Arc<Self>) -> Result<(), BufferError> {
        let mut inner = lock(&self.inner);

        match inner.residency {
            Residency::Disk | Residency::CompressedDisk => return Ok(()),
            Residency::Resident | Residency::Compressed => {}
        }

        let old_tier = self.tier_for(inner.residency);
        match self.spill_locked(&mut inner) {
            Ok(block_size) => {
                drop(inner);
                self.rehome(old_tier, Tier::Disk, block_size);
                Ok(())
            }
            Err(err) => {
                warn!(
                    "vertex buffer {}: save file refused spill, staying in current tier",
                    self.id
                );
                drop(inner);
                self.touch_tier(old_tier);
                Err(err)
            }
        }
    }

    fn tier_for(&self, residency: Residency) -> Tier {
        match residency {
            Residency::Resident => Tier::Ram,
            Residency::Compressed => Tier::Compressed,
            Residency::Disk | Residency::CompressedDisk => Tier::Disk,
        }
    }

    fn tier_lock(&self, tier: Tier) -> Arc<Mutex<LruTier<Arc<VertexBuffer>>>> {
        match tier {
            Tier::Ram => Arc::clone(&self.shared.ram_tier),
            Tier::Compressed => Arc::clone(&self.shared.compressed_tier),
            Tier::Disk => Arc::clone(&self.shared.disk_tier),
        }
    }

    fn touch_tier(self: &Arc<Self>, tier: Tier) {
        lock(&self.tier_lock(tier)).touch(self);
    }

    /// Withdraws from `old`, enrolls in `new` with `size`, and marks MRU in `new` — the
    /// accounting contract every residency change must uphold.
    fn rehome(self: &Arc<Self>, old: Tier, new: Tier, size: u64) {
        if old != new {
            lock(&self.tier_lock(old)).withdraw(self);
            lock(&self.tier_lock(new)).enroll(Arc::clone(self), size);
        } else {
            lock(&self.tier_lock(new)).resize(self, size);
            self.touch_tier(new);
        }
    }

    fn decompress_locked(&self, inner: &mut Inner) -> Result<(), BufferError> {
        let stage = inner.stages.write();

        if inner.stored_raw {
            inner.residency = Residency::Resident;
            return Ok(());
        }

        let decompressed = self
            .shared
            .codec
            .decompress(&stage.bytes, stage.data_full_size as usize)
            .ok_or(BufferError::CorruptCompressedData)?;

        stage.bytes = decompressed;
        inner.stored_raw = true;
        inner.residency = Residency::Resident;

        Ok(())
    }

    fn compress_locked(&self, inner: &mut Inner) {
        let min_compress_size = self.shared.min_compress_size;
        let level = self.shared.compression_level;
        let codec = Arc::clone(&self.shared.codec);

        let stage = inner.stages.write();

        if stage.data_full_size > min_compress_size {
            if let Some(compressed) = codec.compress(&stage.bytes, level) {
                if compressed.len() < stage.bytes.len() {
                    trace!(
                        "compressed {} bytes to {} bytes",
                        stage.bytes.len(),
                        compressed.len()
                    );
                    stage.bytes = compressed;
                    inner.stored_raw = false;
                    inner.residency = Residency::Compressed;
                    return;
                }
            }
        }

        inner.stored_raw = true;
        inner.residency = Residency::Compressed;
    }

    fn spill_locked(&self, inner: &mut Inner) -> Result<u64, BufferError> {
        let stage = inner.stages.write();
        let block = self.shared.save_file.write_data(&stage.bytes)?;

        let Some(block) = block else {
            return Err(BufferError::SaveFileFull);
        };

        stage.bytes = Vec::new();
        inner.save_block = Some(block);
        inner.residency = match inner.residency {
            Residency::Resident => Residency::Disk,
            Residency::Compressed => Residency::CompressedDisk,
            already @ (Residency::Disk | Residency::CompressedDisk) => already,
        };

        Ok(block.size())
    }

    fn restore_from_disk_locked(&self, inner: &mut Inner) -> Result<(), BufferError> {
        let block = inner.save_block.take().ok_or(BufferError::NoSaveBlock)?;
        let bytes = self
            .shared
            .save_file
            .read_data(block)
            .map_err(|_| BufferError::SaveFileReadError)?;
        self.shared.save_file.free(block);

        inner.residency = match inner.residency {
            Residency::Disk => Residency::Resident,
            Residency::CompressedDisk => Residency::Compressed,
            already @ (Residency::Resident | Residency::Compressed) => already,
        };

        let stage = inner.stages.write();
        stage.bytes = bytes;

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Tier {
    Ram,
    Compressed,
    Disk,
}

impl Page for Arc<VertexBuffer> {
    fn evict(&self) -> EvictOutcome {
        let mut inner = lock(&self.inner);

        if inner.pin_count > 0 {
            return EvictOutcome::Refused;
        }

        let old_tier = self.tier_for(inner.residency);

        match inner.residency {
            Residency::Resident => {
                let compressed_budget = lock(&self.shared.compressed_tier).budget();
                if compressed_budget == Budget::Bytes(0) {
                    self.evict_to_disk(old_tier, &mut inner)
                } else {
                    self.compress_locked(&mut inner);
                    let size = inner.stages.read_stage(0).bytes.len() as u64;
                    drop(inner);
                    self.withdraw_from_tier_if_unheld(old_tier);
                    lock(&self.shared.compressed_tier).enroll(Arc::clone(self), size);
                    EvictOutcome::Demoted
                }
            }
            Residency::Compressed => self.evict_to_disk(old_tier, &mut inner),
            Residency::Disk | Residency::CompressedDisk => {
                warn!("vertex buffer {}: disk tier does not auto-evict", self.id);
                EvictOutcome::Refused
            }
        }
    }
}

impl VertexBuffer {
    fn evict_to_disk(self: &Arc<Self>, old_tier: Tier, inner: &mut Inner) -> EvictOutcome {
        match self.spill_locked(inner) {
            Ok(block_size) => {
                self.withdraw_from_tier_if_unheld(old_tier);
                lock(&self.shared.disk_tier).enroll(Arc::clone(self), block_size);
                EvictOutcome::Demoted
            }
            Err(_) => {
                warn!(
                    "vertex buffer {}: save file refused eviction spill",
                    self.id
                );
                EvictOutcome::Refused
            }
        }
    }

    /// Withdraws this buffer from `tier`'s bookkeeping, but only if `tier`'s lock is not already
    /// held by the calling thread.
    ///
    /// `evict` is normally called by [`LruTier::begin_epoch`] while it holds `tier`'s own lock for
    /// the whole sweep; in that (common) case `begin_epoch` already removes the entry itself on a
    /// `Demoted` outcome, and a blocking `lock()` here would deadlock against the guard it still
    /// holds across this call. A non-blocking `try_lock()` naturally distinguishes the two
    /// callers: it fails harmlessly when re-entered from within that tier's own sweep, and
    /// succeeds when `evict` is invoked directly (as the property tests do, and as any future
    /// caller outside a sweep would) — which is exactly the case that left a page enrolled in two
    /// tiers at once before this existed.
    fn withdraw_from_tier_if_unheld(self: &Arc<Self>, tier: Tier) {
        let tier_arc = self.tier_lock(tier);

        #[cfg(feature = "parking_lot")]
        if let Some(mut guard) = tier_arc.try_lock() {
            guard.withdraw(self);
        }

        #[cfg(not(feature = "parking_lot"))]
        if let Ok(mut guard) = tier_arc.try_lock() {
            guard.withdraw(self);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        codec::Deflate,
        format::{ArrayFormat, Column},
    };
    use std::path::Path;

    /// A table with exactly one interned format, at `FormatId::for_tests(0)`.
    fn fixture_format_table() -> FormatTable {
        let mut table = FormatTable::new();
        table.intern(ArrayFormat::new(
            16,
            vec![Column {
                offset: 0,
                component_count: 4,
                component_size: 4,
            }],
        ));
        table
    }

    pub(crate) fn fixture_shared() -> Arc<Shared> {
        Arc::new(Shared {
            ram_tier: Arc::new(Mutex::new(LruTier::new(Budget::Unlimited))),
            compressed_tier: Arc::new(Mutex::new(LruTier::new(Budget::Unlimited))),
            disk_tier: Arc::new(Mutex::new(LruTier::new(Budget::Unlimited))),
            save_file: Arc::new(
                SaveFile::create(Path::new(&std::env::temp_dir()), "buffer-mod-tests", None).unwrap(),
            ),
            format_table: Arc::new(Mutex::new(fixture_format_table())),
            codec: Arc::new(Deflate),
            compression_level: 1,
            min_compress_size: 64,
            next_id: AtomicU64::new(0),
            next_stamp: AtomicU64::new(0),
        })
    }

    pub(crate) fn fixture_buffer() -> Arc<VertexBuffer> {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        VertexBuffer::new(format, UsageHint::Static, shared, vec![0u8; 128])
    }

    #[test]
    fn tiny_buffer_skips_codec() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, vec![7u8; 32]);

        buffer.make_compressed().unwrap();
        assert_eq!(buffer.residency(), Residency::Compressed);
        assert_eq!(lock(&buffer.inner).stages.read().bytes.len(), 32);

        buffer.make_resident().unwrap();
        assert_eq!(buffer.residency(), Residency::Resident);
        assert_eq!(lock(&buffer.inner).stages.read().bytes, vec![7u8; 32]);
    }

    #[test]
    fn compression_cycle_round_trips() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let data = vec![0x7Au8; 10_000];
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, data.clone());

        buffer.make_compressed().unwrap();
        assert!(lock(&buffer.inner).stages.read().bytes.len() < data.len());

        buffer.make_resident().unwrap();
        assert_eq!(lock(&buffer.inner).stages.read().bytes, data);
    }

    #[test]
    fn make_disk_then_restore_round_trips() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let data = vec![3u8; 4096];
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, data.clone());

        buffer.make_disk().unwrap();
        assert_eq!(buffer.residency(), Residency::Disk);
        assert!(lock(&buffer.inner).stages.read().bytes.is_empty());

        buffer.make_resident().unwrap();
        assert_eq!(buffer.residency(), Residency::Resident);
        assert_eq!(lock(&buffer.inner).stages.read().bytes, data);
    }

    #[test]
    fn make_compressed_restores_a_disk_resident_buffer() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let data = vec![0x5Cu8; 10_000];
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, data.clone());

        buffer.make_disk().unwrap();
        assert_eq!(buffer.residency(), Residency::Disk);

        buffer.make_compressed().unwrap();
        assert_eq!(buffer.residency(), Residency::Compressed);

        buffer.make_resident().unwrap();
        assert_eq!(lock(&buffer.inner).stages.read().bytes, data);
    }

    #[test]
    fn is_prepared_after_prepare() {
        let buffer = fixture_buffer();

        assert!(!buffer.is_prepared(DeviceId(1)));
        buffer.prepare(DeviceId(1));
        assert!(buffer.is_prepared(DeviceId(1)));
    }

    #[test]
    fn destroy_frees_save_block_withdraws_from_tier_and_releases_devices() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, Arc::clone(&shared), vec![1u8; 4096]);
        buffer.prepare(DeviceId(1));

        buffer.make_disk().unwrap();
        assert!(lock(&buffer.inner).save_block.is_some());
        assert!(lock(&shared.disk_tier).contains(&buffer));

        let len_after_spill = shared.save_file.len();
        buffer.destroy();

        assert!(lock(&buffer.inner).save_block.is_none());
        assert!(!lock(&shared.disk_tier).contains(&buffer));
        assert!(!buffer.is_prepared(DeviceId(1)));

        // The freed block's range went back to the free list, not just forgotten: a same-size
        // write reuses it instead of growing the file.
        shared.save_file.write_data(&vec![2u8; 4096]).unwrap().unwrap();
        assert_eq!(shared.save_file.len(), len_after_spill);
    }

    #[test]
    fn release_unknown_device_is_an_assertion_class_error() {
        let buffer = fixture_buffer();

        let result = buffer.release(DeviceId(1));

        assert!(matches!(result, Err(BufferError::UnknownDeviceContext)));
    }

    #[test]
    fn disk_tier_refuses_eviction() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, vec![1u8; 128]);

        buffer.make_disk().unwrap();

        assert_eq!(Page::evict(&buffer), EvictOutcome::Refused);
    }

    #[test]
    fn pinned_buffer_refuses_eviction() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, vec![1u8; 128]);

        buffer.pin();

        assert_eq!(Page::evict(&buffer), EvictOutcome::Refused);
    }

    #[test]
    fn evict_called_outside_an_epoch_does_not_leave_the_page_enrolled_in_two_tiers() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, Arc::clone(&shared), vec![1u8; 128]);

        assert_eq!(Page::evict(&buffer), EvictOutcome::Demoted);

        assert!(!lock(&shared.ram_tier).contains(&buffer));
        assert!(lock(&shared.compressed_tier).contains(&buffer));
    }

    #[test]
    fn evict_to_disk_outside_an_epoch_withdraws_from_the_compressed_tier() {
        let shared = fixture_shared();
        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, Arc::clone(&shared), vec![1u8; 128]);
        buffer.make_compressed().unwrap();

        assert_eq!(Page::evict(&buffer), EvictOutcome::Demoted);

        assert!(!lock(&shared.compressed_tier).contains(&buffer));
        assert!(lock(&shared.disk_tier).contains(&buffer));
    }

    #[test]
    fn save_file_exhaustion_keeps_buffer_resident() {
        let mut shared = fixture_shared();
        Arc::get_mut(&mut shared).unwrap().save_file =
            Arc::new(SaveFile::create(&std::env::temp_dir(), "buffer-mod-exhaustion", Some(1024)).unwrap());

        let format = FormatId::for_tests(0);
        let buffer = VertexBuffer::new(format, UsageHint::Static, shared, vec![9u8; 2048]);

        let result = buffer.make_disk();

        assert!(matches!(result, Err(BufferError::SaveFileFull)));
        assert_eq!(buffer.residency(), Residency::Resident);
    }

    #[test]
    fn promotion_preserves_bytes_under_random_transition_sequences() {
        use rand::{rngs::SmallRng, Rng, SeedableRng};

        const TRANSITIONS: [fn(&Arc<VertexBuffer>) -> Result<(), BufferError>; 3] = [
            |buffer| buffer.make_resident(),
            |buffer| buffer.make_compressed(),
            |buffer| buffer.make_disk(),
        ];

        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);

            let shared = fixture_shared();
            let format = FormatId::for_tests(0);
            let len = rng.gen_range(1..4096);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let buffer = VertexBuffer::new(format, UsageHint::Static, shared, data.clone());

            for _ in 0..rng.gen_range(1..12) {
                let transition = TRANSITIONS[rng.gen_range(0..TRANSITIONS.len())];
                // A refused spill (disk exhaustion doesn't apply here, but a pinned buffer would)
                // leaves residency unchanged, so any error is fine to ignore for this property.
                let _ = transition(&buffer);
            }

            buffer.make_resident().unwrap();
            assert_eq!(
                lock(&buffer.inner).stages.read().bytes,
                data,
                "seed {seed}: make_resident did not reproduce the originally written bytes"
            );
        }
    }
}
