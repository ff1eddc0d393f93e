pub mod executor;
pub mod layout;
pub mod memory;
pub mod projection;
pub mod provider;
pub mod reconciler;

pub use executor::{CollectionExecutor, Job, TaskExecutor};
pub use layout::{Anchor, LineLayout};
pub use memory::{InMemoryRenderer, InlineExecutor, ManualRegionOracle, RenderCalls, RenderedLine};
pub use projection::{Plan, Projection, plan};
pub use provider::{ActivationCallback, RegionOracle, RenderHandle, RenderProvider};
pub use reconciler::Reconciler;
