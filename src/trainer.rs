use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::classifier::{default_registry, Candidate, ModelSpec, TrainedModel};
use crate::context::PipelineContext;
use crate::dataset::{self, LabeledDataset, LoadReport};
use crate::error::{DatasetRole, Error, Result};
use crate::metrics;
use crate::model_store::{ModelArtifact, ModelStore, ARTIFACT_FORMAT_VERSION};

#[derive(Debug, Clone, Serialize)]
pub enum CandidateOutcome
{
    Fitted { name: String, accuracy: f32, path: PathBuf, elapsed: Duration },
    Failed { name: String, error: String },
}

impl CandidateOutcome
{
    pub fn name(&self) -> &str
    {
        match self
        {
            CandidateOutcome::Fitted { name, .. } => name,
            CandidateOutcome::Failed { name, .. } => name,
        }
    }

    pub fn accuracy(&self) -> Option<f32>
    {
        match self
        {
            CandidateOutcome::Fitted { accuracy, .. } => Some(*accuracy),
            CandidateOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport
{
    pub run_id: Uuid,
    /// In registry order.
    pub candidates: Vec<CandidateOutcome>,
    pub best_name: String,
    pub best_accuracy: f32,
    /// Present when the datasets were loaded from directories.
    pub train_load: Option<LoadReport>,
    pub eval_load: Option<LoadReport>,
}

/// Fits every candidate on `train_set`, scores it on `eval_set`, persists each
/// fitted model under its name and the winner under `best_model`.
///
/// The winner is the first candidate whose accuracy is strictly greater than every
/// earlier one, so ties keep the earlier-declared candidate. A candidate that fails
/// to fit is reported and skipped. Empty datasets fail before anything is written.
pub fn train(
    train_set: &LabeledDataset,
    eval_set: &LabeledDataset,
    registry: &[Candidate],
    store: &ModelStore,
    extractor_name: &str,
) -> Result<TrainingReport>
{
    if train_set.is_empty() {
        return Err(Error::EmptyDataset { role: DatasetRole::Training });
    }
    if eval_set.is_empty() {
        return Err(Error::EmptyDataset { role: DatasetRole::Evaluation });
    }
    if train_set.classes() != eval_set.classes() {
        return Err(Error::InvalidConfig("training and evaluation datasets use different class lists".to_string()));
    }
    if train_set.feature_length() != eval_set.feature_length() {
        return Err(Error::Shape { expected: vec![train_set.feature_length()], actual: vec![eval_set.feature_length()] });
    }

    let run_id = Uuid::new_v4();
    info!(
        "Training run {}: {} training examples {:?}, {} evaluation examples {:?}",
        run_id, train_set.len(), train_set.class_counts(), eval_set.len(), eval_set.class_counts());

    let mut candidates = Vec::with_capacity(registry.len());
    let mut best: Option<ModelArtifact> = None;

    for candidate in registry
    {
        info!("Training {}...", candidate.name);
        let now = Instant::now();
        let (model, accuracy) = match fit_and_score(&candidate.spec, train_set, eval_set)
        {
            Ok(scored) => scored,
            Err(e) => {
                error!("{} failed: {}", candidate.name, e);
                candidates.push(CandidateOutcome::Failed { name: candidate.name.clone(), error: e.to_string() });
                continue;
            }
        };
        let elapsed = now.elapsed();
        info!("{} accuracy: {:.4} ({:?})", candidate.name, accuracy, elapsed);

        let artifact = ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            algorithm: candidate.name.clone(),
            classes: train_set.classes().clone(),
            extractor: extractor_name.to_string(),
            feature_length: train_set.feature_length(),
            accuracy,
            run_id,
            trained_at: Utc::now(),
            model,
        };
        let path = store.save(&candidate.name, &artifact)?;
        candidates.push(CandidateOutcome::Fitted { name: candidate.name.clone(), accuracy, path, elapsed });

        if best.as_ref().map_or(true, |b| accuracy > b.accuracy) {
            best = Some(artifact);
        }
    }

    let best = best.ok_or(Error::NoCandidateSucceeded)?;
    store.save_best(&best)?;

    Ok(TrainingReport {
        run_id,
        candidates,
        best_name: best.algorithm,
        best_accuracy: best.accuracy,
        train_load: None,
        eval_load: None,
    })
}

/// Loads `<train_root>/<class>/*` and `<eval_root>/<class>/*` with the context's
/// extractor and trains the default registry into the context's model store.
/// A candidate that fits but cannot score the evaluation set counts as failed.
fn fit_and_score(spec: &ModelSpec, train_set: &LabeledDataset, eval_set: &LabeledDataset) -> Result<(TrainedModel, f32)>
{
    let model = spec.fit(train_set)?;
    let predictions = model.predict_batch(eval_set.features())?;
    let accuracy = metrics::accuracy(eval_set.labels(), &predictions);
    Ok((model, accuracy))
}

pub fn train_from_directories(context: &PipelineContext, train_root: &Path, eval_root: &Path) -> Result<TrainingReport>
{
    let classes = &context.config.classes;
    let extractor = context.extractor.as_ref();

    info!("Extracting features...");
    let (train_set, train_load) = dataset::load_dataset(train_root, classes, extractor)?;
    let (eval_set, eval_load) = dataset::load_dataset(eval_root, classes, extractor)?;

    let registry = default_registry(&context.config.classifiers);
    let mut report = train(&train_set, &eval_set, &registry, &context.model_store(), extractor.name())?;
    report.train_load = Some(train_load);
    report.eval_load = Some(eval_load);
    Ok(report)
}
