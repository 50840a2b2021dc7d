//! The compression collaborator.
//!
//! The design treats the codec as an opaque `compress`/`decompress` pair owned outside this
//! crate. [`Codec`] is the seam: the state machine in [`crate::buffer`] only ever calls through
//! it, never reaching for a concrete compressor directly, mirroring how `pak::compression`
//! abstracts over Brotli/Snap behind one small trait-like enum. [`Deflate`] is the concrete,
//! always-available implementation backing this crate's own tests and default [`Registry`].
//!
//! [`Registry`]: crate::registry::Registry

use flate2::{
    write::{DeflateDecoder, DeflateEncoder},
    Compression,
};
use std::io::Write;

/// A pluggable compress/decompress pair. Buffers never assume a particular codec; they only see
/// this trait, so a host could swap in a different algorithm without touching the state machine.
pub trait Codec: Send + Sync {
    /// Compresses `input` at the given level (1-9). Returns `None` on any codec failure; the
    /// caller falls back to storing the bytes uncompressed but still labeled `Compressed`, per
    /// the design's `make_compressed` contract.
    fn compress(&self, input: &[u8], level: u32) -> Option<Vec<u8>>;

    /// Decompresses `input`, which must have been produced by a prior [`Codec::compress`] call
    /// from the same implementation. Returns `None` on failure (corrupt input).
    fn decompress(&self, input: &[u8], expected_len: usize) -> Option<Vec<u8>>;
}

/// The default codec: DEFLATE via `flate2`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deflate;

impl Codec for Deflate {
    fn compress(&self, input: &[u8], level: u32) -> Option<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(input).ok()?;
        encoder.finish().ok()
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Option<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(Vec::with_capacity(expected_len));
        decoder.write_all(input).ok()?;
        decoder.finish().ok()
    }
}
