// ============================================================================
// signdb Library
// ============================================================================

pub mod config;
pub mod context;
pub mod core;
pub mod display;
pub mod scheduler;
pub mod session;
pub mod storage;

// Re-export main types for convenience
pub use config::SignConfig;
pub use context::{ContextStatus, EditProgress, SignContext};
pub use crate::core::{
    MAX_LINE_LENGTH, MAX_LINES, Owner, REGION_SIZE, RegionKey, RenderError, Result, Rgb,
    SignError, SignId, SignRecord, SpatialKey,
};
pub use display::{
    CollectionExecutor, InMemoryRenderer, InlineExecutor, LineLayout, ManualRegionOracle,
    Reconciler, RegionOracle, RenderHandle, RenderProvider, TaskExecutor,
};
pub use scheduler::{ReconcileScheduler, ScheduleIntervals};
pub use session::{EditInput, EditSession, EditSessions};
pub use storage::RecordStore;
