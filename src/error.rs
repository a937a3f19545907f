use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Which dataset a training-time error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatasetRole
{
    Training,
    Evaluation,
}

impl fmt::Display for DatasetRole
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self
        {
            DatasetRole::Training => write!(f, "training"),
            DatasetRole::Evaluation => write!(f, "evaluation"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Tensor shape {actual:?} does not match the expected shape {expected:?}")]
    Shape { expected: Vec<usize>, actual: Vec<usize> },
    #[error("The {role} dataset contains no examples")]
    EmptyDataset { role: DatasetRole },
    #[error("Unable to load model artifact {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("Training data has no examples of class {index}")]
    MissingClass { index: usize },
    #[error("Model {algorithm} expects {trained_length} features from {trained}, but the extractor is {current} with {current_length}")]
    ExtractorMismatch { algorithm: String, trained: String, trained_length: usize, current: String, current_length: usize },
    #[error("Every candidate classifier failed to fit")]
    NoCandidateSucceeded,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Classifier produced class index {index}, but only {num_classes} classes are known")]
    UnknownClassIndex { index: usize, num_classes: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error("SVM training failed: {0}")]
    Svm(#[from] linfa_svm::SvmError),
    #[error("Model fitting failed: {0}")]
    Linfa(#[from] linfa::error::Error),
    #[error("Nearest neighbour index: {0}")]
    NearestNeighbourBuild(#[from] linfa_nn::BuildError),
    #[error("Nearest neighbour query: {0}")]
    NearestNeighbour(#[from] linfa_nn::NnError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error
{
    /// True when the failure was caused by the caller's input rather than by
    /// the pipeline. Only undecodable images qualify.
    pub fn is_client_error(&self) -> bool
    {
        matches!(self, Error::Decode(_))
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
      S: serde::ser::Serializer,
    {
      serializer.serialize_str(self.to_string().as_ref())
    }
}

/// Wraps an error with whether the caller is at fault, so an outer
/// HTTP or CLI layer can map it to a client or server failure.
#[derive(Serialize, Debug)]
pub struct ClassifyFailure {
  pub client_error: bool,
  pub error: Error,
}

impl From<Error> for ClassifyFailure {
  fn from(error: Error) -> Self {
    ClassifyFailure { client_error: error.is_client_error(), error }
  }
}
