pub mod index;
pub mod persistence;
pub mod store;

pub use index::{IndexViolation, StoreIndices};
pub use persistence::{LoadedSigns, SignFile};
pub use store::RecordStore;
