use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::classes::ClassList;
use crate::classifier::ClassifierParams;
use crate::error::{Error, Result};
use crate::extractor::DEFAULT_GRID_SIZE;

/// Which feature extractor the pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig
{
    /// MobileNetV2 (ImageNet weights, no top, average pooling) exported to ONNX.
    Onnx { model_path: PathBuf },
    /// The model-free grid pooling baseline.
    Grid { grid_size: usize },
}

impl Default for ExtractorConfig
{
    fn default() -> Self
    {
        ExtractorConfig::Onnx { model_path: PathBuf::from("models").join("mobilenet_v2.onnx") }
    }
}

/// Pipeline configuration, read from JSON. Every field has a default,
/// so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    pub extractor: ExtractorConfig,
    /// Directory holding one artifact per candidate plus `best_model`.
    pub model_store: PathBuf,
    /// Order defines the integer labels.
    pub classes: ClassList,
    pub classifiers: ClassifierParams,
}

impl Default for Config
{
    fn default() -> Self
    {
        Config {
            extractor: ExtractorConfig::default(),
            model_store: PathBuf::from("models"),
            classes: ClassList::electric_vehicles(),
            classifiers: ClassifierParams::default(),
        }
    }
}

impl Config
{
    pub fn load(path: &Path) -> Result<Self>
    {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Uses `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self>
    {
        match path
        {
            Some(path) => Config::load(path),
            None => Ok(Config::default()),
        }
    }

    pub fn validate(&self) -> Result<()>
    {
        if self.classes.len() < 2 {
            return Err(Error::InvalidConfig("at least two classes are required".to_string()));
        }
        if let ExtractorConfig::Grid { grid_size } = self.extractor {
            if grid_size == 0 {
                return Err(Error::InvalidConfig("grid_size must be at least 1".to_string()));
            }
        }
        let params = &self.classifiers;
        if !(params.svm.c > 0.0) {
            return Err(Error::InvalidConfig(format!("svm.c must be positive, got {}", params.svm.c)));
        }
        if !(params.svm.eps > 0.0) {
            return Err(Error::InvalidConfig(format!("svm.eps must be positive, got {}", params.svm.eps)));
        }
        if params.forest.n_trees == 0 {
            return Err(Error::InvalidConfig("forest.n_trees must be at least 1".to_string()));
        }
        for (name, value) in [
            ("forest.bootstrap_proportion", params.forest.bootstrap_proportion),
            ("forest.feature_proportion", params.forest.feature_proportion),
        ]
        {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::InvalidConfig(format!("{} must be in (0, 1], got {}", name, value)));
            }
        }
        if params.knn.k == 0 {
            return Err(Error::InvalidConfig("knn.k must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn grid_baseline() -> Self
    {
        Config { extractor: ExtractorConfig::Grid { grid_size: DEFAULT_GRID_SIZE }, ..Default::default() }
    }
}
