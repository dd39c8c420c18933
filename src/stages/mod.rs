//! Pipeline stages. Each consumes the artifact of its predecessor and produces
//! exactly one artifact of its own.

pub mod ingestion;
pub mod publisher;
pub mod trainer;
pub mod transformation;
pub mod validation;

use crate::error::StageResult;

pub use ingestion::DataIngestion;
pub use publisher::ModelPublisher;
pub use trainer::ModelTrainer;
pub use transformation::DataTransformation;
pub use validation::DataValidation;

pub trait Stage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;
    fn run(&self, input: Self::Input) -> StageResult<Self::Output>;
}
