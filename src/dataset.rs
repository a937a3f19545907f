//! Builds labeled feature matrices from a directory laid out as `<root>/<class name>/<image file>`.

use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::Serialize;
use walkdir::WalkDir;

use crate::classes::ClassList;
use crate::error::{Error, Result};
use crate::extractor::{FeatureExtractor, FeatureVector};
use crate::preprocessing::{self, PreprocessedTensor};

// Number of images decoded in parallel before their features are extracted.
const PREPROCESS_CHUNK_SIZE: usize = 32;

/// Feature vectors paired with integer class labels.
/// Row `i` of `features` belongs to `labels[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset
{
    features: Array2<f32>,
    labels: Vec<usize>,
    classes: ClassList,
}

impl LabeledDataset
{
    pub fn new(features: Array2<f32>, labels: Vec<usize>, classes: ClassList) -> Result<Self>
    {
        if features.nrows() != labels.len() {
            return Err(Error::Shape { expected: vec![labels.len(), features.ncols()], actual: features.shape().to_vec() });
        }
        if let Some(&label) = labels.iter().find(|&&label| label >= classes.len()) {
            return Err(Error::UnknownClassIndex { index: label, num_classes: classes.len() });
        }
        Ok(LabeledDataset { features, labels, classes })
    }

    pub fn from_vectors(vectors: &[FeatureVector], labels: Vec<usize>, classes: ClassList, feature_length: usize) -> Result<Self>
    {
        let mut flat = Vec::with_capacity(vectors.len() * feature_length);
        for vector in vectors
        {
            if vector.len() != feature_length {
                return Err(Error::Shape { expected: vec![feature_length], actual: vec![vector.len()] });
            }
            flat.extend(vector.iter().copied());
        }
        let features = Array2::from_shape_vec((vectors.len(), feature_length), flat)
            .map_err(|e| anyhow::anyhow!("Error building feature matrix: {}", e))?;
        LabeledDataset::new(features, labels, classes)
    }

    pub fn len(&self) -> usize
    {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.labels.is_empty()
    }

    pub fn feature_length(&self) -> usize
    {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<'_, f32>
    {
        self.features.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32>
    {
        self.features.index_axis(Axis(0), index)
    }

    pub fn labels(&self) -> &[usize]
    {
        &self.labels
    }

    pub fn classes(&self) -> &ClassList
    {
        &self.classes
    }

    /// Number of examples per class, indexed by label.
    pub fn class_counts(&self) -> Vec<usize>
    {
        let mut counts = vec![0; self.classes.len()];
        for &label in &self.labels
        {
            counts[label] += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile
{
    pub path: PathBuf,
    pub reason: String,
}

/// What happened to a single file during dataset construction.
#[derive(Debug)]
pub enum FileOutcome
{
    Loaded { path: PathBuf, label: usize, features: FeatureVector },
    Skipped(SkippedFile),
}

/// Lets callers audit data quality instead of skips being invisible.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport
{
    /// Indexed by label.
    pub loaded_per_class: Vec<usize>,
    /// Classes with no directory under the root.
    pub missing_classes: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport
{
    pub fn loaded_count(&self) -> usize
    {
        self.loaded_per_class.iter().sum()
    }

    pub fn skipped_count(&self) -> usize
    {
        self.skipped.len()
    }
}

/// Walks `<root>/<class>/` for every class in `classes` order (the order defines the label),
/// extracting one feature vector per readable image.
///
/// Unreadable files and extractor failures are skipped and recorded in the report;
/// a missing class directory yields zero examples for that class. Neither is an error,
/// so callers must check the dataset is non-empty before training.
pub fn load_dataset(root: &Path, classes: &ClassList, extractor: &dyn FeatureExtractor) -> Result<(LabeledDataset, LoadReport)>
{
    let feature_length = extractor.feature_length();
    let mut report = LoadReport { loaded_per_class: vec![0; classes.len()], ..Default::default() };
    let mut vectors: Vec<FeatureVector> = Vec::new();
    let mut labels: Vec<usize> = Vec::new();

    let now = std::time::Instant::now();
    for (label, class_name) in classes.iter().enumerate()
    {
        let class_dir = match find_class_dir(root, class_name)
        {
            Some(dir) => dir,
            None => {
                warn!("No directory for class {:?} under {:?}; it will have no examples", class_name, root);
                report.missing_classes.push(class_name.to_string());
                continue;
            }
        };

        let files = list_image_files(&class_dir, &mut report.skipped);
        for chunk in files.chunks(PREPROCESS_CHUNK_SIZE)
        {
            for (path, tensor) in preprocessing::preprocess_batch(chunk)
            {
                match extract_file(path, label, tensor, extractor, feature_length)
                {
                    FileOutcome::Loaded { features, label, .. } => {
                        vectors.push(features);
                        labels.push(label);
                        report.loaded_per_class[label] += 1;
                    },
                    FileOutcome::Skipped(skipped) => {
                        warn!("Skipping {:?}: {}", skipped.path, skipped.reason);
                        report.skipped.push(skipped);
                    },
                }
            }
        }
    }

    info!(
        "Loaded {} examples from {:?} in {:?} ({} skipped)",
        vectors.len(), root, now.elapsed(), report.skipped_count());

    let dataset = LabeledDataset::from_vectors(&vectors, labels, classes.clone(), feature_length)?;
    Ok((dataset, report))
}

/// Runs the extractor on one preprocessed file. Any failure becomes a skip.
pub fn extract_file(
    path: PathBuf,
    label: usize,
    tensor: Result<PreprocessedTensor>,
    extractor: &dyn FeatureExtractor,
    feature_length: usize,
) -> FileOutcome
{
    let features = tensor.and_then(|tensor| extractor.extract(&tensor));
    match features
    {
        Ok(features) if features.len() == feature_length => FileOutcome::Loaded { path, label, features },
        Ok(features) => FileOutcome::Skipped(SkippedFile {
            path,
            reason: format!("extractor returned {} features, expected {}", features.len(), feature_length),
        }),
        Err(e) => FileOutcome::Skipped(SkippedFile { path, reason: e.to_string() }),
    }
}

fn find_class_dir(root: &Path, class_name: &str) -> Option<PathBuf>
{
    ClassList::directory_candidates(class_name)
        .into_iter()
        .map(|dir_name| root.join(dir_name))
        .find(|dir| dir.is_dir())
}

/// Regular files directly inside `dir`, sorted by file name. Subdirectories are ignored.
fn list_image_files(dir: &Path, skipped: &mut Vec<SkippedFile>) -> Vec<PathBuf>
{
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true).sort_by_file_name()
    {
        match entry
        {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            },
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                skipped.push(SkippedFile { path, reason: e.to_string() });
            },
        }
    }
    files
}
