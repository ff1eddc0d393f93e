//! Interfaces of the two external collaborators the reconciler drives: the
//! render surface that owns display handles, and the oracle that knows which
//! regions are currently active.

use super::layout::Anchor;
use crate::core::{RegionKey, RenderError};
use std::fmt;

/// Opaque reference to one rendered line owned by a [`RenderProvider`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderHandle(u64);

impl RenderHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderHandle#{}", self.0)
    }
}

/// The render surface.
///
/// Every method is only ever called from the serialized execution context
/// of the anchor's collection.
pub trait RenderProvider: Send + Sync {
    /// Creates an empty line display at `anchor`.
    fn spawn(&self, anchor: &Anchor, line_index: usize) -> Result<RenderHandle, RenderError>;

    fn set_text(&self, handle: RenderHandle, text: &str) -> Result<(), RenderError>;

    /// Whether `handle` still exists on the surface.
    fn is_live(&self, handle: RenderHandle) -> bool;

    /// Best-effort removal. A handle that is already gone is not an error.
    fn destroy(&self, handle: RenderHandle);
}

pub type ActivationCallback = Box<dyn FnOnce() + Send + 'static>;

/// Knows which regions are active, i.e. may have handles spawned in them.
pub trait RegionOracle: Send + Sync {
    /// Non-blocking poll.
    fn is_active(&self, region: &RegionKey) -> bool;

    /// Runs `callback` once `region` becomes active, or right away if it
    /// already is. Must not force the region to activate.
    fn run_when_active(&self, region: &RegionKey, callback: ActivationCallback);
}
