//! Model catalog, identifiers and rate-limit state

pub mod catalog;
pub mod descriptor;
pub mod discovery;
pub mod model_id;
pub mod rate_limit;
pub mod tier;

pub use catalog::{CatalogSnapshot, ModelCatalog, RefreshReport};
pub use descriptor::ModelDescriptor;
pub use discovery::{
    DiscoveredModel, DiscoveryError, HttpDiscovery, ModelDiscovery, StaticDiscovery,
};
pub use model_id::{ExclusionSet, ModelId};
pub use rate_limit::{CooldownState, RateLimitTracker};
pub use tier::Tier;
