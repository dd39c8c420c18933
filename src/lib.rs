pub mod artifact;
pub mod config;
pub mod error;
pub mod manifest;
pub mod ml;
pub mod npy;
pub mod observability;
pub mod pipeline;
pub mod prediction;
pub mod preflight;
pub mod presets;
pub mod settings;
pub mod stages;
pub mod store;
pub mod table;
pub mod tracking;

pub use error::{PipelineError, StageResult};
pub use pipeline::{PipelineOutcome, TrainingPipeline};
pub use settings::PipelineSettings;
