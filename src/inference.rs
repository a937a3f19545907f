use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::context::PipelineContext;
use crate::dataset::{self, LoadReport};
use crate::error::{DatasetRole, Error, Result};
use crate::extractor::{FeatureExtractor, FeatureVector};
use crate::metrics::{ClassificationReport, ConfusionMatrix};
use crate::model_store::ModelArtifact;
use crate::preprocessing;

/// Confidence reported when the model has no probability estimates.
/// It is a fixed approximation, not a measurement.
pub const PLACEHOLDER_CONFIDENCE: f32 = 0.95;

/// Where a `Classification`'s confidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource
{
    /// The maximum posterior probability, which belongs to the predicted class.
    ModelProbability,
    /// `PLACEHOLDER_CONFIDENCE`; the model (e.g. an uncalibrated SVM) has no probabilities.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification
{
    pub label: String,
    pub class_index: usize,
    /// Always within [0, 1].
    pub confidence: f32,
    pub confidence_source: ConfidenceSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct Evaluation
{
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
    pub load: LoadReport,
}

/// Runs raw images through preprocessing, the feature extractor and a persisted model.
/// Labels are always resolved through the class list stored in the artifact.
pub struct InferenceService
{
    extractor: Arc<dyn FeatureExtractor>,
    artifact: ModelArtifact,
}

impl InferenceService
{
    /// Loads `best_model` from the context's store. Fails with `ModelLoad` if it is
    /// missing or corrupt and with `ExtractorMismatch` if it was trained on other features.
    pub fn load(context: &PipelineContext) -> Result<Self>
    {
        let store = context.model_store();
        let artifact = store.load_best()?;
        info!(
            "Loaded {} (accuracy {:.4}, trained {}) from {:?}",
            artifact.algorithm, artifact.accuracy, artifact.trained_at, store.dir());
        InferenceService::from_artifact(context.extractor.clone(), artifact)
    }

    pub fn load_named(context: &PipelineContext, name: &str) -> Result<Self>
    {
        let artifact = context.model_store().load(name)?;
        InferenceService::from_artifact(context.extractor.clone(), artifact)
    }

    pub fn from_artifact(extractor: Arc<dyn FeatureExtractor>, artifact: ModelArtifact) -> Result<Self>
    {
        if extractor.feature_length() != artifact.feature_length || extractor.name() != artifact.extractor {
            return Err(Error::ExtractorMismatch {
                algorithm: artifact.algorithm.clone(),
                trained: artifact.extractor.clone(),
                trained_length: artifact.feature_length,
                current: extractor.name().to_string(),
                current_length: extractor.feature_length(),
            });
        }
        Ok(InferenceService { extractor, artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact
    {
        &self.artifact
    }

    /// Undecodable bytes give `Error::Decode`, which callers should treat as bad input.
    pub fn classify(&self, image_bytes: &[u8]) -> Result<Classification>
    {
        let tensor = preprocessing::preprocess_bytes(image_bytes)?;
        let features = self.extractor.extract(&tensor)?;
        self.classify_features(&features)
    }

    pub fn classify_file(&self, path: &Path) -> Result<Classification>
    {
        let bytes = std::fs::read(path)?;
        self.classify(&bytes)
    }

    pub fn classify_features(&self, features: &FeatureVector) -> Result<Classification>
    {
        if features.len() != self.artifact.feature_length {
            return Err(Error::Shape { expected: vec![self.artifact.feature_length], actual: vec![features.len()] });
        }

        let (class_index, proba) = self.artifact.model.predict_with_proba(features.view())?;
        let label = self.artifact.classes.resolve(class_index)?.to_string();

        // The label is the argmax of the posteriors, so the maximum is the label's own probability.
        let posterior = proba.map(|p| p.iter().copied().fold(f32::NEG_INFINITY, f32::max));
        let (confidence, confidence_source) = match posterior
        {
            Some(p) if p.is_finite() => (p.clamp(0.0, 1.0), ConfidenceSource::ModelProbability),
            _ => (PLACEHOLDER_CONFIDENCE, ConfidenceSource::Placeholder),
        };

        debug!("Classified as {} ({:.4}, {:?})", label, confidence, confidence_source);
        Ok(Classification { label, class_index, confidence, confidence_source })
    }

    /// Scores the loaded model on a labeled directory laid out like the training data.
    pub fn evaluate_directory(&self, root: &Path) -> Result<Evaluation>
    {
        let classes = &self.artifact.classes;
        let (test_set, load) = dataset::load_dataset(root, classes, self.extractor.as_ref())?;
        if test_set.is_empty() {
            return Err(Error::EmptyDataset { role: DatasetRole::Evaluation });
        }

        let predictions = self.artifact.model.predict_batch(test_set.features())?;
        let confusion = ConfusionMatrix::new(test_set.labels(), &predictions, classes.len());
        let report = ClassificationReport::from_confusion(&confusion, classes);
        info!("Evaluated {} on {} examples: accuracy {:.4}", self.artifact.algorithm, test_set.len(), report.accuracy);

        Ok(Evaluation { report, confusion, load })
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Cursor;

    use chrono::Utc;
    use image::{ImageFormat, Rgb, RgbImage};
    use uuid::Uuid;

    use super::*;
    use crate::classes::ClassList;
    use crate::classifier::{KnnParams, ModelSpec, SvmParams};
    use crate::dataset::LabeledDataset;
    use crate::extractor::GridPoolExtractor;
    use crate::model_store::ARTIFACT_FORMAT_VERSION;

    fn png(color: [u8; 3]) -> Vec<u8>
    {
        let img = RgbImage::from_pixel(32, 24, Rgb(color));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn service(spec: ModelSpec) -> InferenceService
    {
        let extractor: Arc<dyn FeatureExtractor> = Arc::new(GridPoolExtractor::new(1).unwrap());
        let mut vectors = Vec::new();
        let mut labels = Vec::new();
        for (label, color) in [(0, [220, 20, 20]), (0, [240, 40, 10]), (1, [20, 20, 220]), (1, [10, 60, 240])]
        {
            let tensor = preprocessing::preprocess_bytes(&png(color)).unwrap();
            vectors.push(extractor.extract(&tensor).unwrap());
            labels.push(label);
        }
        let dataset = LabeledDataset::from_vectors(&vectors, labels, ClassList::electric_vehicles(), 3).unwrap();
        let artifact = ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            algorithm: "test".to_string(),
            classes: ClassList::electric_vehicles(),
            extractor: extractor.name().to_string(),
            feature_length: 3,
            accuracy: 1.0,
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            model: spec.fit(&dataset).unwrap(),
        };
        InferenceService::from_artifact(extractor, artifact).unwrap()
    }

    #[test]
    fn classifies_with_probability()
    {
        let service = service(ModelSpec::Svm(SvmParams::default()));
        let result = service.classify(&png([230, 30, 30])).unwrap();
        assert_eq!(result.label, "electric bus");
        assert_eq!(result.class_index, 0);
        assert_eq!(result.confidence_source, ConfidenceSource::ModelProbability);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn confidence_is_the_maximum_posterior()
    {
        for spec in [ModelSpec::Svm(SvmParams::default()), ModelSpec::RandomForest(Default::default()), ModelSpec::Knn(KnnParams { k: 3 })]
        {
            let service = service(spec);
            for color in [[230, 30, 30], [120, 40, 140], [90, 60, 160], [15, 30, 230]]
            {
                let tensor = preprocessing::preprocess_bytes(&png(color)).unwrap();
                let features = service.extractor.extract(&tensor).unwrap();
                let result = service.classify_features(&features).unwrap();
                let proba = service.artifact().model.predict_proba(features.view()).unwrap().unwrap();
                let best = proba.iter().copied().fold(f32::NEG_INFINITY, f32::max);

                assert_eq!(result.confidence, best);
                assert_eq!(proba[result.class_index], best);
                assert!(result.confidence >= 0.5);
            }
        }
    }

    #[test]
    fn uncalibrated_model_reports_placeholder()
    {
        let service = service(ModelSpec::Svm(SvmParams { probability: false, ..Default::default() }));
        let result = service.classify(&png([15, 30, 230])).unwrap();
        assert_eq!(result.label, "electric car");
        assert_eq!(result.confidence, PLACEHOLDER_CONFIDENCE);
        assert_eq!(result.confidence_source, ConfidenceSource::Placeholder);
    }

    #[test]
    fn repeated_calls_are_identical()
    {
        let service = service(ModelSpec::RandomForest(Default::default()));
        let bytes = png([200, 50, 90]);
        assert_eq!(service.classify(&bytes).unwrap(), service.classify(&bytes).unwrap());
    }

    #[test]
    fn undecodable_input_is_a_client_error()
    {
        let service = service(ModelSpec::Knn(Default::default()));
        let err = service.classify(b"GIF89a but not really").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn extractor_mismatch_is_rejected()
    {
        let service = service(ModelSpec::Knn(Default::default()));
        let other: Arc<dyn FeatureExtractor> = Arc::new(GridPoolExtractor::new(2).unwrap());
        match InferenceService::from_artifact(other, service.artifact().clone())
        {
            Err(Error::ExtractorMismatch { algorithm, trained_length, current_length, .. }) => {
                assert_eq!(algorithm, "test");
                assert_eq!(trained_length, 3);
                assert_eq!(current_length, 12);
            },
            Err(e) => panic!("expected an extractor mismatch, got {}", e),
            Ok(_) => panic!("a 12-feature extractor was accepted for a 3-feature model"),
        }
    }
}
