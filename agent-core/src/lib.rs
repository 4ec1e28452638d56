pub mod backoff;
pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use backoff::Backoff;
pub use config::EnvConfig;
pub use error::{AgentError, Taxonomy};
pub use types::{ArtifactBundle, ArtifactFile, ChangeSummary, Lease, Slice, SupervisedUnit, UnitState};
