//! Per-buffer device-context registration.
//!
//! A device collaborator (the scene graph's rendering-state guardian — out of scope here) asks a
//! buffer to `prepare` itself and gets back an opaque [`DeviceContext`] it can hold on to. The
//! buffer owns the forward edge (`device → context`); the context carries only a [`Weak`]
//! back-reference to the buffer, so the two sides never form an `Arc` cycle, per the design's
//! "device-context back-links" note.

use {
    super::VertexBuffer,
    std::{
        collections::HashMap,
        sync::{Arc, Weak},
    },
};

/// Opaque identity of a device collaborator. The core never interprets this beyond equality and
/// hashing — it is whatever the collaborator chooses (a pointer value, a slot index, ...).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DeviceId(pub u64);

/// A handle a device collaborator receives from [`VertexBuffer::prepare`] / `prepare_now`.
///
/// Holding a `DeviceContext` does not keep the buffer alive: [`DeviceContext::buffer`] upgrades
/// the internal weak reference and yields `None` once the buffer itself has been dropped.
#[derive(Clone)]
pub struct DeviceContext {
    device: DeviceId,
    buffer: Weak<VertexBuffer>,
}

impl DeviceContext {
    /// The device this context was prepared for.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// The buffer this context was prepared against, if it still exists.
    pub fn buffer(&self) -> Option<Arc<VertexBuffer>> {
        self.buffer.upgrade()
    }
}

/// The per-buffer `device → context` map.
#[derive(Default)]
pub(crate) struct DeviceTable {
    contexts: HashMap<DeviceId, DeviceContext>,
}

impl DeviceTable {
    pub(crate) fn is_prepared(&self, device: DeviceId) -> bool {
        self.contexts.contains_key(&device)
    }

    /// Returns the existing context for `device`, creating one against `owner` if absent.
    /// Idempotent: calling this twice for the same device returns the same context.
    pub(crate) fn prepare_now(&mut self, device: DeviceId, owner: &Arc<VertexBuffer>) -> DeviceContext {
        self.contexts
            .entry(device)
            .or_insert_with(|| DeviceContext {
                device,
                buffer: Arc::downgrade(owner),
            })
            .clone()
    }

    pub(crate) fn release(&mut self, device: DeviceId) -> Option<DeviceContext> {
        self.contexts.remove(&device)
    }

    /// Drops every registration, returning a snapshot taken before clearing — so a caller's
    /// per-context release callback may itself call back into this table (e.g. to re-prepare)
    /// without racing the iteration.
    pub(crate) fn release_all(&mut self) -> Vec<DeviceContext> {
        let snapshot: Vec<_> = self.contexts.values().cloned().collect();
        self.contexts.clear();
        snapshot
    }
}
