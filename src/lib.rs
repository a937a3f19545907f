pub mod classes;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod inference;
pub mod metrics;
pub mod model_store;
pub mod preprocessing;
pub mod trainer;

pub use classes::ClassList;
pub use config::Config;
pub use context::PipelineContext;
pub use error::{ClassifyFailure, Error, Result};
pub use inference::{Classification, InferenceService};
pub use trainer::{train, train_from_directories, TrainingReport};
