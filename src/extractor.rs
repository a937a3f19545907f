use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use ndarray::{s, Array1};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;

use crate::error::{Error, Result};
use crate::preprocessing::{PreprocessedTensor, FEATURE_VECTOR_LENGTH, IMAGE_INPUT_SIZE, INPUT_SHAPE, NUM_CHANNELS};

/// A fixed-length embedding of one image. Immutable once produced.
pub type FeatureVector = Array1<f32>;

/// Maps a preprocessed image tensor to a fixed-length feature vector.
///
/// Implementations must be pure functions of their input (no training-mode
/// behavior) and safe to share across threads; the extractor is loaded once
/// per process and handed to every component that needs it.
pub trait FeatureExtractor: Send + Sync
{
    /// Width of every vector returned by `extract()`.
    fn feature_length(&self) -> usize;

    /// Short identifier recorded alongside trained models.
    fn name(&self) -> &str;

    fn extract(&self, tensor: &PreprocessedTensor) -> Result<FeatureVector>;
}

/// The preprocessor is the only producer of extractor input, so a mismatch here
/// is a programming error rather than bad user data.
pub fn check_input_shape(tensor: &PreprocessedTensor) -> Result<()>
{
    if tensor.shape() != INPUT_SHAPE {
        return Err(Error::Shape { expected: INPUT_SHAPE.to_vec(), actual: tensor.shape().to_vec() });
    }
    Ok(())
}

/// MobileNetV2 with ImageNet weights, the classification head removed and
/// global average pooling applied, so each image yields a 1280-wide vector.
///
/// Uses an ONNX representation of the Keras model (`include_top=False, pooling="avg"`)
/// so it can run through the ONNX runtime. Batch normalization and dropout are
/// frozen in the exported graph.
///
/// `Session::run` needs exclusive access, so concurrent callers are serialized on a mutex.
pub struct MobileNetV2Extractor
{
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl MobileNetV2Extractor
{
    pub fn new(model_path: &Path) -> Result<Self>
    {
        if !model_path.is_file() {
            return Err(Error::ModelLoad {
                path: model_path.to_path_buf(),
                reason: "feature extractor model file not found".to_string(),
            });
        }

        // This takes a moment; load once on startup and keep it for the whole process.
        let now = std::time::Instant::now();
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("Failed to create session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!("Failed to set optimization level: {}", e))?
            .with_intra_threads(4)
            .map_err(|e| anyhow::anyhow!("Failed to set intra threads: {}", e))?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| anyhow::anyhow!("Failed to set execution providers: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| Error::ModelLoad { path: model_path.to_path_buf(), reason: e.to_string() })?;

        let input_name = session.inputs.first()
            .map(|input| input.name.clone())
            .ok_or_else(|| Error::ModelLoad { path: model_path.to_path_buf(), reason: "model has no inputs".to_string() })?;
        let output_name = session.outputs.first()
            .map(|output| output.name.clone())
            .ok_or_else(|| Error::ModelLoad { path: model_path.to_path_buf(), reason: "model has no outputs".to_string() })?;

        info!("Loaded feature extractor {:?} in {:?}", model_path, now.elapsed());
        debug!("Extractor input: {}, output: {}", input_name, output_name);

        Ok(MobileNetV2Extractor { session: Mutex::new(session), input_name, output_name })
    }
}

impl FeatureExtractor for MobileNetV2Extractor
{
    fn feature_length(&self) -> usize
    {
        FEATURE_VECTOR_LENGTH
    }

    fn name(&self) -> &str
    {
        "mobilenet_v2"
    }

    fn extract(&self, tensor: &PreprocessedTensor) -> Result<FeatureVector>
    {
        check_input_shape(tensor)?;

        let input_value = Value::from_array(tensor.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create input value: {}", e))?;

        let mut session = self.session.lock()
            .map_err(|_| anyhow::anyhow!("Feature extractor session lock was poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => &input_value])
            .map_err(|e| anyhow::anyhow!("Failed to run feature extractor: {}", e))?;

        // Output is (batch, FEATURE_VECTOR_LENGTH) with a batch of one.
        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow::anyhow!("Failed to extract output array: {}", e))?;

        if output.len() != FEATURE_VECTOR_LENGTH {
            return Err(Error::Shape { expected: vec![1, FEATURE_VECTOR_LENGTH], actual: output.shape().to_vec() });
        }

        Ok(output.iter().copied().collect::<FeatureVector>())
    }
}

pub const DEFAULT_GRID_SIZE: usize = 4;

/// A model-free baseline: average-pools each channel over a `grid x grid`
/// partition of the input. Deterministic and cheap; useful for smoke runs and
/// tests where the ONNX weights are unavailable.
pub struct GridPoolExtractor
{
    grid: usize,
    name: String,
}

impl GridPoolExtractor
{
    pub fn new(grid: usize) -> Result<Self>
    {
        if grid == 0 || grid > IMAGE_INPUT_SIZE {
            return Err(Error::InvalidConfig(format!("grid size must be in 1..={}, got {}", IMAGE_INPUT_SIZE, grid)));
        }
        Ok(GridPoolExtractor { grid, name: format!("grid_pool_{}", grid) })
    }

    fn cell_bounds(&self, cell: usize) -> (usize, usize)
    {
        (cell * IMAGE_INPUT_SIZE / self.grid, (cell + 1) * IMAGE_INPUT_SIZE / self.grid)
    }
}

impl Default for GridPoolExtractor
{
    fn default() -> Self
    {
        GridPoolExtractor { grid: DEFAULT_GRID_SIZE, name: format!("grid_pool_{}", DEFAULT_GRID_SIZE) }
    }
}

impl FeatureExtractor for GridPoolExtractor
{
    fn feature_length(&self) -> usize
    {
        self.grid * self.grid * NUM_CHANNELS
    }

    fn name(&self) -> &str
    {
        &self.name
    }

    fn extract(&self, tensor: &PreprocessedTensor) -> Result<FeatureVector>
    {
        check_input_shape(tensor)?;

        let mut features = Vec::with_capacity(self.feature_length());
        for gy in 0..self.grid
        {
            let (y0, y1) = self.cell_bounds(gy);
            for gx in 0..self.grid
            {
                let (x0, x1) = self.cell_bounds(gx);
                for c in 0..NUM_CHANNELS
                {
                    let mean = tensor.slice(s![0, y0..y1, x0..x1, c]).mean().unwrap_or(0.0);
                    features.push(mean);
                }
            }
        }

        Ok(Array1::from(features))
    }
}
