use anyhow::{Context, Result, ensure};
use ndarray::{Array1, Array2, Axis, concatenate};
use tracing::info;

use crate::artifact::{TransformationArtifact, ValidationArtifact};
use crate::config::TransformationPaths;
use crate::error::{PipelineError, StageResult};
use crate::ml::binarize_label;
use crate::ml::imputer::{Preprocessor, build_transformer};
use crate::ml::predictor::write_json;
use crate::npy::write_npy;
use crate::settings::ImputerSettings;
use crate::stages::Stage;
use crate::table::Table;

/// Fits the imputer on the training features and materializes `[X | y]` matrices.
pub struct DataTransformation {
    target_column: String,
    imputer: ImputerSettings,
    paths: TransformationPaths,
}

impl DataTransformation {
    pub fn new(
        target_column: impl Into<String>,
        imputer: ImputerSettings,
        paths: TransformationPaths,
    ) -> Self {
        Self {
            target_column: target_column.into(),
            imputer,
            paths,
        }
    }

    fn features_and_target(&self, table: &Table) -> Result<(Table, Array1<f64>)> {
        let (features, target) = table.split_target(&self.target_column)?;
        ensure!(
            target.iter().all(|v| !v.is_nan()),
            "Target column '{}' has missing values",
            self.target_column
        );
        Ok((features, target.mapv(binarize_label)))
    }

    fn persist(&self, preprocessor: &Preprocessor, train: &Array2<f64>, test: &Array2<f64>) -> Result<()> {
        write_npy(&self.paths.transformed_train_file, train)?;
        write_npy(&self.paths.transformed_test_file, test)?;
        write_json(&self.paths.transformed_object_file, preprocessor)?;
        write_json(&self.paths.final_preprocessor_file, preprocessor)
            .context("Failed to publish preprocessor to the final model directory")
    }
}

fn with_target(x: Array2<f64>, y: Array1<f64>) -> Result<Array2<f64>> {
    let y = y.insert_axis(Axis(1));
    concatenate(Axis(1), &[x.view(), y.view()]).context("Failed to append target column")
}

impl Stage for DataTransformation {
    type Input = ValidationArtifact;
    type Output = TransformationArtifact;

    fn name(&self) -> &'static str {
        "data_transformation"
    }

    fn run(&self, validation: ValidationArtifact) -> StageResult<TransformationArtifact> {
        let train = Table::read_csv(&validation.valid_train_file_path)
            .map_err(PipelineError::transformation("DataTransformation::read_data"))?;
        let test = Table::read_csv(&validation.valid_test_file_path)
            .map_err(PipelineError::transformation("DataTransformation::read_data"))?;

        let (x_train, y_train) = self
            .features_and_target(&train)
            .map_err(PipelineError::transformation("DataTransformation::split_target"))?;
        let (x_test, y_test) = self
            .features_and_target(&test)
            .map_err(PipelineError::transformation("DataTransformation::split_target"))?;

        let mut preprocessor = build_transformer(&self.imputer)
            .map_err(PipelineError::transformation("DataTransformation::build_transformer"))?;
        let train_matrix = preprocessor
            .fit_transform(&x_train)
            .and_then(|x| with_target(x, y_train))
            .map_err(PipelineError::transformation("DataTransformation::fit_transform"))?;
        let test_matrix = preprocessor
            .transform(&x_test)
            .and_then(|x| with_target(x, y_test))
            .map_err(PipelineError::transformation("DataTransformation::transform"))?;

        self.persist(&preprocessor, &train_matrix, &test_matrix)
            .map_err(PipelineError::transformation("DataTransformation::persist"))?;
        info!(
            train_shape = ?train_matrix.dim(),
            test_shape = ?test_matrix.dim(),
            imputed_train_cells = x_train.missing_count(),
            imputed_test_cells = x_test.missing_count(),
            "Features transformed"
        );

        Ok(TransformationArtifact {
            transformed_object_file_path: self.paths.transformed_object_file.clone(),
            transformed_train_file_path: self.paths.transformed_train_file.clone(),
            transformed_test_file_path: self.paths.transformed_test_file.clone(),
        })
    }
}
