use std::sync::Arc;

use log::info;

use crate::config::{Config, ExtractorConfig};
use crate::error::Result;
use crate::extractor::{FeatureExtractor, GridPoolExtractor, MobileNetV2Extractor};
use crate::model_store::ModelStore;

/// Process-wide state, built once at startup and passed to every component
/// that extracts features. The extractor is immutable after load.
#[derive(Clone)]
pub struct PipelineContext
{
    pub config: Config,
    pub extractor: Arc<dyn FeatureExtractor>,
}

impl PipelineContext
{
    /// Loads the configured extractor. For the ONNX extractor this is the expensive step.
    pub fn from_config(config: Config) -> Result<Self>
    {
        config.validate()?;
        let extractor: Arc<dyn FeatureExtractor> = match &config.extractor
        {
            ExtractorConfig::Onnx { model_path } => Arc::new(MobileNetV2Extractor::new(model_path)?),
            ExtractorConfig::Grid { grid_size } => Arc::new(GridPoolExtractor::new(*grid_size)?),
        };
        info!("Using feature extractor {} ({} features)", extractor.name(), extractor.feature_length());
        Ok(PipelineContext { config, extractor })
    }

    pub fn with_extractor(config: Config, extractor: Arc<dyn FeatureExtractor>) -> Self
    {
        PipelineContext { config, extractor }
    }

    pub fn model_store(&self) -> ModelStore
    {
        ModelStore::new(self.config.model_store.clone())
    }
}
