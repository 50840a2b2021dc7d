//! Durable, endianness-aware wire format for a single buffer.
//!
//! This module owns the byte layout only; resolving a stream's array-format pointer against a
//! live [`FormatTable`] and constructing the resulting [`VertexBuffer`] is the registry's job
//! (`crate::registry`), matching the "generic object serializer hands us a parent record, we
//! just handle the buffer-specific tail" split the rest of the engine's save format uses.

use {
    crate::{
        buffer::UsageHint,
        error::SerializeError,
        format::{ArrayFormat, FormatId, FormatTable},
    },
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Read, Write},
};

/// The format version this crate writes.
pub const CURRENT_FORMAT_VERSION: u16 = 2;

/// The oldest stream version this crate can still read. Streams below this are rejected before
/// any buffer bytes are touched.
pub const MIN_SUPPORTED_STREAM_VERSION: u16 = 1;

/// Everything read back from a stream before the array-format pointer has been resolved against
/// a live [`FormatTable`].
pub struct DecodedBuffer {
    /// Raw interning-table index as it appeared in the stream; not yet meaningful until resolved
    /// against the destination process's own format table.
    pub format: FormatId,
    pub usage_hint: UsageHint,
    pub bytes: Vec<u8>,
    /// Set when the stream's endianness differed from native but the array format could not be
    /// resolved immediately (not yet interned locally) — the byte-level component flip is still
    /// pending and must be finished with [`finish_pending_flip`] once the real format is known.
    pub endian_reversed: bool,
}

/// Writes one buffer's durable tail (everything after the generic object serializer's parent
/// record): array-format pointer, usage hint, byte count, raw bytes.
///
/// `buffer` must already be `Resident`; call [`crate::buffer::VertexBuffer::make_resident`]
/// first. If `stream_is_foreign_endian` is set, each column's multi-byte components are reversed
/// per the array format before writing.
pub fn write_buffer<W: Write>(
    writer: &mut W,
    format_id: FormatId,
    format: &ArrayFormat,
    usage_hint: UsageHint,
    mut bytes: Vec<u8>,
    stream_is_foreign_endian: bool,
) -> Result<(), SerializeError> {
    if stream_is_foreign_endian {
        reverse_components(&mut bytes, format);
    }

    if bytes.len() > u32::MAX as usize {
        return Err(SerializeError::TooLarge);
    }

    writer.write_u16::<LittleEndian>(CURRENT_FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(format_id.raw())?;
    writer.write_u8(usage_hint.as_u8())?;
    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
    writer.write_all(&bytes)?;

    Ok(())
}

/// Reads one buffer's durable tail. If the stream's endianness differs from native and `format`
/// (a format already resolved/interned by the caller, if any) is `None`, the byte-level flip is
/// deferred and `DecodedBuffer::endian_reversed` is set — the caller must finish it with
/// [`finish_pending_flip`] once the array format is known.
pub fn read_buffer<R: Read>(
    reader: &mut R,
    format: Option<&ArrayFormat>,
    stream_is_foreign_endian: bool,
) -> Result<DecodedBuffer, SerializeError> {
    let version = reader.read_u16::<LittleEndian>()?;
    if version < MIN_SUPPORTED_STREAM_VERSION {
        return Err(SerializeError::StaleVersion {
            found: version,
            minimum: MIN_SUPPORTED_STREAM_VERSION,
        });
    }

    let format_id = FormatId::from_raw(reader.read_u32::<LittleEndian>()?);
    let usage_hint = UsageHint::from_u8(reader.read_u8()?).unwrap_or(UsageHint::Static);

    let mut bytes = if version == 1 {
        // Version 1 wrote the byte run as a bincode-default `Vec<u8>`: a little-endian `u64`
        // length prefix followed by the raw bytes.
        let len = reader.read_u64::<LittleEndian>()?;
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        buf
    } else {
        let len = reader.read_u32::<LittleEndian>()?;
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        buf
    };

    let mut endian_reversed = false;
    if stream_is_foreign_endian {
        match format {
            Some(format) => reverse_components(&mut bytes, format),
            None => endian_reversed = true,
        }
    }

    Ok(DecodedBuffer {
        format: format_id,
        usage_hint,
        bytes,
        endian_reversed,
    })
}

/// Finishes a deferred endian flip once the array format referenced by a [`DecodedBuffer`] has
/// been resolved (interned, possibly substituted for a canonical equivalent already known to this
/// process's [`FormatTable`]).
pub fn finish_pending_flip(decoded: &mut DecodedBuffer, format: &ArrayFormat) {
    if decoded.endian_reversed {
        reverse_components(&mut decoded.bytes, format);
        decoded.endian_reversed = false;
    }
}

/// Reverses each multi-byte component in place, row by row, per `format`'s column layout.
/// Components of size 0 or 1 are untouched since byte order is irrelevant for them.
fn reverse_components(bytes: &mut [u8], format: &ArrayFormat) {
    let stride = format.stride() as usize;
    if stride == 0 {
        return;
    }

    for row in bytes.chunks_mut(stride) {
        for column in format.columns() {
            if column.component_size <= 1 {
                continue;
            }

            let component_size = column.component_size as usize;
            let offset = column.offset as usize;

            for index in 0..column.component_count as usize {
                let start = offset + index * component_size;
                let end = start + component_size;
                if end <= row.len() {
                    row[start..end].reverse();
                }
            }
        }
    }
}
