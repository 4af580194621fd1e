mod types;

pub use types::{ArtifactHttpConfig, ControllerConfig, parse_tags};
