pub mod configuration;

pub use configuration::{ConfigurationManager, PipelineConfiguration, PipelineError};
