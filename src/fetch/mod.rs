//! Artifact acquisition
//!
//! [`ArtifactFetcher`] downloads model files from an [`ArtifactSource`] with
//! resume support, progress reporting and cooperative cancellation.

mod fetcher;
mod locator;
mod progress;
mod source;

pub use fetcher::{ArtifactFetcher, FetchRequest};
pub use locator::{default_model_id, local_filename, ArtifactLocator};
pub use progress::{FetchStatus, ProgressEvent, TransferState};
pub use source::{ArtifactSource, HubSource};
