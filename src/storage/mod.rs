mod artifacts;

pub use artifacts::{ArtifactError, ArtifactStore};
