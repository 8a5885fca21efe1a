//! Model registry
//!
//! Durable catalog of local and cloud model records with a single active
//! model. Storage is pluggable through [`RecordStore`].

mod record;
#[allow(clippy::module_inception)]
mod registry;
mod store;

pub use record::{ModelKind, ModelPurpose, ModelRecord, CLOUD_BACKEND, LOCAL_BACKEND};
pub use registry::ModelRegistry;
pub use store::{JsonFileStore, MemoryStore, RecordStore};
