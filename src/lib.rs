pub mod core;
pub mod services;
pub mod utils;

pub use crate::core::config::Config;
pub use crate::core::error::ErrorKind;
pub use crate::core::state::{GenerationRequest, StoryExperience, StoryInput};
pub use crate::services::cancel::CancelToken;
pub use crate::services::workflow::{PipelineEvent, StoryPipeline};
