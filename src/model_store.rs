//! Persistence for trained classifiers.
//! The store is a directory with one `<name>.bin` per candidate plus `best_model.bin`;
//! each file is a bincode-serialized `ModelArtifact`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classes::ClassList;
use crate::classifier::TrainedModel;
use crate::error::{Error, Result};

/// Reserved artifact name for the selected model.
pub const BEST_MODEL_NAME: &str = "best_model";

const ARTIFACT_EXTENSION: &str = "bin";

/// Bumped whenever the serialized layout changes; older artifacts fail to load.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// A fitted classifier together with everything needed to use it safely:
/// the class list its integer labels refer to, and the extractor it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact
{
    pub format_version: u32,
    /// Registry name of the candidate, e.g. "SVM".
    pub algorithm: String,
    pub classes: ClassList,
    pub extractor: String,
    pub feature_length: usize,
    /// Held-out accuracy measured at training time.
    pub accuracy: f32,
    /// Shared by every artifact written in the same training run.
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub model: TrainedModel,
}

pub struct ModelStore
{
    dir: PathBuf,
}

impl ModelStore
{
    pub fn new(dir: impl Into<PathBuf>) -> Self
    {
        ModelStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path
    {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf
    {
        self.dir.join(format!("{}.{}", name, ARTIFACT_EXTENSION))
    }

    /// Writes to a temporary file first so a crash never leaves a half-written artifact.
    pub fn save(&self, name: &str, artifact: &ModelArtifact) -> Result<PathBuf>
    {
        fs::create_dir_all(&self.dir)?;
        let path = self.artifact_path(name);
        let tmp_path = self.dir.join(format!("{}.{}.tmp", name, ARTIFACT_EXTENSION));

        let bytes = bincode::serialize(artifact)?;
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &path)?;

        debug!("Saved {} ({} bytes) to {:?}", name, bytes.len(), path);
        Ok(path)
    }

    pub fn save_best(&self, artifact: &ModelArtifact) -> Result<PathBuf>
    {
        let path = self.save(BEST_MODEL_NAME, artifact)?;
        info!("Best model is {} with accuracy {:.4}", artifact.algorithm, artifact.accuracy);
        Ok(path)
    }

    /// Any failure here (missing file, corrupt bytes, wrong format version) is a `ModelLoad` error.
    pub fn load(&self, name: &str) -> Result<ModelArtifact>
    {
        let path = self.artifact_path(name);
        let model_load_error = |reason: String| Error::ModelLoad { path: path.clone(), reason };

        let bytes = fs::read(&path).map_err(|e| model_load_error(e.to_string()))?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes).map_err(|e| model_load_error(e.to_string()))?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(model_load_error(format!(
                "artifact format version {} is not supported (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION)));
        }
        if artifact.model.num_classes() != artifact.classes.len() {
            return Err(model_load_error(format!(
                "model predicts {} classes but the artifact lists {}",
                artifact.model.num_classes(), artifact.classes.len())));
        }
        if artifact.model.feature_length() != artifact.feature_length {
            return Err(model_load_error(format!(
                "model expects {} features but the artifact records {}",
                artifact.model.feature_length(), artifact.feature_length)));
        }

        Ok(artifact)
    }

    pub fn load_best(&self) -> Result<ModelArtifact>
    {
        self.load(BEST_MODEL_NAME)
    }

    /// Names of every artifact in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>>
    {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)?
        {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == ARTIFACT_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
