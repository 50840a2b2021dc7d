#![deny(warnings)]
#![allow(dead_code)]

//! A tiered memory manager for large, immutable-ish binary "vertex array" buffers backing a
//! real-time rendering pipeline.
//!
//! Buffers cascade through four residency classes — `Resident`, `Compressed`, `Disk`, and
//! `CompressedDisk` — each governed by an independent byte-budgeted LRU ([`lru::LruTier`]). A
//! [`registry::Registry`] owns the tiers, the on-disk scratch arena ([`save_file::SaveFile`]),
//! and the array-format interning table, and drives eviction once per frame via
//! [`registry::Registry::lru_epoch`]. Callers never see raw bytes directly; a
//! [`handle::BufferHandle`] scopes read/write access and forces whatever residency the access
//! needs.

extern crate pretty_env_logger;

#[macro_use]
extern crate log as log_crate;

pub mod buffer;
pub mod codec;
pub mod config;
pub mod cycled;
mod error;
pub mod format;
pub mod handle;
pub mod lru;
pub mod registry;
pub mod save_file;
pub mod serialize;

pub use self::error::{BufferError, ConfigError, Error, LruError, SaveFileError, SerializeError};

/// Things used by nearly every caller of this crate.
pub mod prelude {
    pub use crate::{
        buffer::{device::DeviceId, Residency, UsageHint, VertexBuffer},
        config::Config,
        error::Error,
        format::{ArrayFormat, Column, FormatId},
        handle::BufferHandle,
        registry::Registry,
    };
}

/// Enables `pretty_env_logger` for hosts and tests that want this crate's `trace!`/`debug!`
/// output without wiring up their own logger.
pub fn init_debug() {
    let _ = pretty_env_logger::try_init();
}
