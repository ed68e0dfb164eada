//! Project configuration model and its persistence.
//!
//! A project is described by a single JSON document at its root
//! (`stack-project.json`). The pipeline never holds that document open; it
//! re-reads and merges through [`ProjectStore::update`] for every write.

mod store;
mod types;

pub use store::{merge_edits, JsonProjectStore, ProjectStore};
pub use types::{
    slug, AdminUiConfig, BrokerConfig, CacheConfig, DatabaseConfig, InstanceConfig,
    ProjectConfiguration, ServiceConfig,
};
