pub mod error;
pub mod id;
pub mod record;
pub mod types;

pub use error::{RenderError, Result, SignError};
pub use id::SignId;
pub use record::{MAX_LINE_LENGTH, MAX_LINES, Owner, Rgb, SignRecord};
pub use types::{REGION_SIZE, RegionKey, SpatialKey};
