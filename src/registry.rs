//! Process-wide (but explicitly constructed) owner of the three tiers, the save file, the format
//! table, and the epoch driver.
//!
//! Nothing here is a hidden global: a [`Registry`] is an ordinary value a host constructs once
//! (typically from [`crate::config::Config`]) and then threads through wherever buffers are
//! created or read back, matching the rest of the engine's preference for explicit ownership over
//! `lazy_static`/`OnceCell` singletons.

use {
    crate::{
        buffer::{Shared, UsageHint, VertexBuffer},
        codec::Deflate,
        config::Config,
        error::{BufferError, Error, SerializeError},
        format::{ArrayFormat, FormatId, FormatTable},
        handle::BufferHandle,
        lru::{Budget, LruTier},
        save_file::SaveFile,
        serialize::{self, DecodedBuffer},
    },
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[cfg(feature = "parking_lot")]
use parking_lot::Mutex;

#[cfg(not(feature = "parking_lot"))]
use std::sync::Mutex;

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

fn budget_from(value: Option<u64>) -> Budget {
    match value {
        None => Budget::Unlimited,
        Some(bytes) => Budget::Bytes(bytes),
    }
}

/// Owns everything a [`VertexBuffer`] needs to carry out its own transitions, plus the format
/// table and the per-frame epoch driver.
pub struct Registry {
    shared: Arc<Shared>,
    format_table: Arc<Mutex<FormatTable>>,
}

impl Registry {
    /// Builds a registry from a resolved [`Config`], creating the save file eagerly at
    /// `vertex_save_file_directory()/vertex_save_file_prefix().bin`.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let save_file = SaveFile::create(
            &config.vertex_save_file_directory(),
            &config.vertex_save_file_prefix(),
            config.max_disk_vertex_data(),
        )
        .map_err(Error::SaveFile)?;

        let format_table = Arc::new(Mutex::new(FormatTable::new()));

        let shared = Arc::new(Shared {
            ram_tier: Arc::new(Mutex::new(LruTier::new(budget_from(config.max_ram_vertex_data())))),
            compressed_tier: Arc::new(Mutex::new(LruTier::new(budget_from(
                config.max_compressed_vertex_data(),
            )))),
            disk_tier: Arc::new(Mutex::new(LruTier::new(Budget::Unlimited))),
            save_file: Arc::new(save_file),
            format_table: Arc::clone(&format_table),
            codec: Arc::new(Deflate),
            compression_level: config.vertex_data_compression_level(),
            min_compress_size: config.min_vertex_data_compress_size(),
            next_id: AtomicU64::new(0),
            next_stamp: AtomicU64::new(0),
        });

        Ok(Self { shared, format_table })
    }

    /// Interns `format`, returning its canonical id. See [`FormatTable::intern`].
    pub fn intern_format(&self, format: ArrayFormat) -> FormatId {
        lock(&self.format_table).intern(format)
    }

    /// Creates a new, fully resident buffer of `initial.len()` bytes under `format`.
    ///
    /// Returns [`BufferError::FormatUnregistered`] if `format` was not produced by
    /// [`Self::intern_format`] on this registry.
    pub fn create(
        &self,
        format: FormatId,
        usage_hint: UsageHint,
        initial: Vec<u8>,
    ) -> Result<Arc<VertexBuffer>, BufferError> {
        if !lock(&self.format_table).contains(format) {
            return Err(BufferError::FormatUnregistered);
        }

        Ok(VertexBuffer::new(format, usage_hint, Arc::clone(&self.shared), initial))
    }

    /// Same as [`Self::create`], but allocates `stages` pipeline slots instead of one. Used by
    /// buffers that are mutated upstream while downstream pipeline stages still read an older
    /// snapshot; see [`crate::buffer::VertexBuffer::cycle`].
    pub fn create_with_stages(
        &self,
        format: FormatId,
        usage_hint: UsageHint,
        initial: Vec<u8>,
        stages: usize,
    ) -> Result<Arc<VertexBuffer>, BufferError> {
        if !lock(&self.format_table).contains(format) {
            return Err(BufferError::FormatUnregistered);
        }

        Ok(VertexBuffer::new_with_stages(
            format,
            usage_hint,
            Arc::clone(&self.shared),
            initial,
            stages,
        ))
    }

    /// Destroys `buffer`: withdraws it from whichever tier currently holds it, frees its on-disk
    /// `SaveBlock` (if any), and releases every device context. Per §3's lifecycle, call this once
    /// the host holds the last owner of `buffer` and is finished with it; `buffer` itself is
    /// consumed so the caller cannot keep using it afterward.
    pub fn destroy(&self, buffer: Arc<VertexBuffer>) {
        buffer.destroy();
    }

    /// Opens a scoped accessor onto `stage` of `buffer`.
    pub fn open_handle(
        &self,
        buffer: Arc<VertexBuffer>,
        stage: usize,
        writable: bool,
    ) -> Result<BufferHandle, BufferError> {
        BufferHandle::open(buffer, stage, writable)
    }

    /// Writes `buffer`'s durable tail to `writer`, forcing it `Resident` first.
    pub fn write_buffer<W: std::io::Write>(
        &self,
        writer: &mut W,
        buffer: &Arc<VertexBuffer>,
        stream_is_foreign_endian: bool,
    ) -> Result<(), Error> {
        buffer.make_resident().map_err(Error::Buffer)?;

        let format_id = buffer.format();
        let table = lock(&self.format_table);
        let format = table
            .get(format_id)
            .ok_or(SerializeError::FormatUnresolved)
            .map_err(Error::Serialize)?;

        serialize::write_buffer(
            writer,
            format_id,
            format,
            buffer.usage_hint(),
            buffer.resident_bytes(),
            stream_is_foreign_endian,
        )
        .map_err(Error::Serialize)
    }

    /// Reads one buffer's durable tail from `reader`, resolving its array-format pointer against
    /// this registry's table (substituting a canonical equivalent and finishing any deferred
    /// endian flip), and constructs a new, fully resident [`VertexBuffer`].
    pub fn read_buffer<R: std::io::Read>(
        &self,
        reader: &mut R,
        stream_is_foreign_endian: bool,
        stages: usize,
    ) -> Result<Arc<VertexBuffer>, Error> {
        // First pass: the stream's own format pointer is almost never already valid in this
        // process's table (ids are assigned per-process), so the flip is deferred and the format
        // gets re-resolved against whatever the caller has interned under the same descriptor.
        let mut decoded: DecodedBuffer =
            serialize::read_buffer(reader, None, stream_is_foreign_endian).map_err(Error::Serialize)?;

        let resolved_id = decoded.format;
        let format = {
            let table = lock(&self.format_table);
            table.get(resolved_id).cloned()
        }
        .ok_or(SerializeError::FormatUnresolved)
        .map_err(Error::Serialize)?;

        serialize::finish_pending_flip(&mut decoded, &format);

        Ok(VertexBuffer::from_decoded(
            resolved_id,
            decoded.usage_hint,
            Arc::clone(&self.shared),
            decoded.bytes,
            stages,
        ))
    }

    /// Calls `begin_epoch()` on the RAM and Compressed tiers (never Disk, which does not
    /// auto-evict). The host calls this once per frame.
    pub fn lru_epoch(&self) {
        lock(&self.shared.ram_tier).begin_epoch();
        lock(&self.shared.compressed_tier).begin_epoch();
    }

    /// Total bytes currently resident across the RAM tier.
    pub fn ram_bytes(&self) -> u64 {
        lock(&self.shared.ram_tier).total_bytes()
    }

    /// Total bytes currently held in the compressed-in-RAM tier.
    pub fn compressed_bytes(&self) -> u64 {
        lock(&self.shared.compressed_tier).total_bytes()
    }

    /// Total bytes currently spilled to disk (both `Disk` and `CompressedDisk` buffers).
    pub fn disk_bytes(&self) -> u64 {
        lock(&self.shared.disk_tier).total_bytes()
    }
}

/// Re-exported for hosts that need to name a device context without depending on
/// `crate::buffer::device` directly.
pub use crate::buffer::device::DeviceContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Column;

    fn test_config(prefix: &str) -> Config {
        Config::for_tests(prefix)
    }

    fn position_format() -> ArrayFormat {
        ArrayFormat::new(
            12,
            vec![Column {
                offset: 0,
                component_count: 3,
                component_size: 4,
            }],
        )
    }

    #[test]
    fn create_rejects_unregistered_format() {
        let registry = Registry::new(&test_config("registry-create-rejects")).unwrap();
        let foreign = FormatId::for_tests(9999);

        let result = registry.create(foreign, UsageHint::Static, vec![0u8; 12]);

        assert!(matches!(result, Err(BufferError::FormatUnregistered)));
    }

    #[test]
    fn destroy_releases_devices_and_frees_disk_space() {
        let registry = Registry::new(&test_config("registry-destroy")).unwrap();
        let format = registry.intern_format(position_format());

        let buffer = registry.create(format, UsageHint::Static, vec![7u8; 4096]).unwrap();
        buffer.prepare(crate::buffer::device::DeviceId(1));
        buffer.make_disk().unwrap();

        registry.destroy(Arc::clone(&buffer));

        assert!(!buffer.is_prepared(crate::buffer::device::DeviceId(1)));
    }

    #[test]
    fn create_then_epoch_does_not_panic_under_unlimited_budget() {
        let registry = Registry::new(&test_config("registry-epoch")).unwrap();
        let format = registry.intern_format(position_format());

        let buffer = registry.create(format, UsageHint::Static, vec![1u8; 12]).unwrap();
        registry.lru_epoch();

        assert_eq!(buffer.residency(), crate::buffer::Residency::Resident);
    }

    #[test]
    fn write_then_read_round_trips_through_the_registry() {
        let registry = Registry::new(&test_config("registry-roundtrip")).unwrap();
        let format = registry.intern_format(position_format());

        let data = vec![0x11u8; 12];
        let buffer = registry.create(format, UsageHint::Dynamic, data.clone()).unwrap();

        let mut stream = Vec::new();
        registry.write_buffer(&mut stream, &buffer, false).unwrap();

        let restored = registry.read_buffer(&mut stream.as_slice(), false, 1).unwrap();

        assert_eq!(restored.resident_bytes(), data);
        assert_eq!(restored.usage_hint(), UsageHint::Dynamic);
    }

    #[test]
    fn spill_under_pressure_pushes_most_buffers_to_disk() {
        use crate::buffer::Residency;

        let registry = Registry::new(&Config::for_tests_with_budgets("registry-spill", 1024, 0)).unwrap();
        let format = registry.intern_format(position_format());

        let buffers: Vec<_> = (0..10)
            .map(|_| registry.create(format, UsageHint::Static, vec![0xABu8; 512]).unwrap())
            .collect();

        registry.lru_epoch();

        let on_disk = buffers
            .iter()
            .filter(|b| matches!(b.residency(), Residency::Disk | Residency::CompressedDisk))
            .count();
        assert!(on_disk >= 8, "expected at least 8 of 10 buffers on disk, got {on_disk}");

        let spilled = buffers
            .iter()
            .find(|b| matches!(b.residency(), Residency::Disk | Residency::CompressedDisk))
            .unwrap();
        let handle = registry.open_handle(Arc::clone(spilled), 0, true).unwrap();
        assert_eq!(spilled.residency(), Residency::Resident);
        drop(handle);
    }

    #[test]
    fn pipeline_isolation_delays_visibility_until_cycle() {
        let registry = Registry::new(&test_config("registry-pipeline")).unwrap();
        let format = registry.intern_format(ArrayFormat::new(
            4,
            vec![Column {
                offset: 0,
                component_count: 1,
                component_size: 4,
            }],
        ));

        let buffer = registry
            .create_with_stages(format, UsageHint::Dynamic, vec![0u8; 4], 2)
            .unwrap();
        let source = registry.create(format, UsageHint::Dynamic, vec![1, 2, 3, 4]).unwrap();

        {
            let mut handle = registry.open_handle(Arc::clone(&buffer), 0, true).unwrap();
            handle.copy_data_from(&source).unwrap();
        }

        let stage1_before = registry.open_handle(Arc::clone(&buffer), 1, false).unwrap();
        assert_eq!(*stage1_before.bytes(), vec![0u8; 4], "stage 1 unaffected before cycle");
        drop(stage1_before);

        buffer.cycle();

        let stage1_after = registry.open_handle(Arc::clone(&buffer), 1, false).unwrap();
        assert_eq!(*stage1_after.bytes(), vec![1, 2, 3, 4], "stage 1 sees the write after cycle");
    }
}
