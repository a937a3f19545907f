//! Classical classifiers fitted over extracted feature vectors.
//!
//! The learners come from linfa (`linfa-svm`, `linfa-ensemble` over `linfa-trees`,
//! `linfa-nn`). Each is wrapped in a serde type so a fitted model can be persisted
//! as a bincode blob and reloaded read-only.

pub mod forest;
pub mod knn;
pub mod svm;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledDataset;
use crate::error::{DatasetRole, Error, Result};

pub use forest::{ForestParams, RandomForest};
pub use knn::{KNearestNeighbors, KnnParams};
pub use svm::{LinearSvm, SvmParams};

pub trait Classifier
{
    fn num_classes(&self) -> usize;

    fn feature_length(&self) -> usize;

    /// The model's raw decision, used when it has no posterior estimates.
    fn decide(&self, x: ArrayView1<f32>) -> Result<usize>;

    /// Per-class posterior estimates summing to 1, if the model has them.
    fn predict_proba(&self, _x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
    {
        Ok(None)
    }

    /// Predicted class together with the posteriors it was read from.
    /// When posteriors exist the class is their argmax, so label and confidence always agree.
    fn predict_with_proba(&self, x: ArrayView1<f32>) -> Result<(usize, Option<Array1<f32>>)>
    {
        match self.predict_proba(x)?
        {
            Some(proba) => Ok((argmax(proba.view()), Some(proba))),
            None => Ok((self.decide(x)?, None)),
        }
    }

    fn predict(&self, x: ArrayView1<f32>) -> Result<usize>
    {
        Ok(self.predict_with_proba(x)?.0)
    }
}

/// A fitted classifier of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedModel
{
    Svm(LinearSvm),
    RandomForest(RandomForest),
    Knn(KNearestNeighbors),
}

impl TrainedModel
{
    pub fn as_classifier(&self) -> &dyn Classifier
    {
        match self
        {
            TrainedModel::Svm(model) => model,
            TrainedModel::RandomForest(model) => model,
            TrainedModel::Knn(model) => model,
        }
    }

    pub fn predict(&self, x: ArrayView1<f32>) -> Result<usize>
    {
        self.check_input(x)?;
        self.as_classifier().predict(x)
    }

    pub fn predict_proba(&self, x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
    {
        self.check_input(x)?;
        self.as_classifier().predict_proba(x)
    }

    pub fn predict_with_proba(&self, x: ArrayView1<f32>) -> Result<(usize, Option<Array1<f32>>)>
    {
        self.check_input(x)?;
        self.as_classifier().predict_with_proba(x)
    }

    pub fn predict_batch(&self, x: ArrayView2<f32>) -> Result<Vec<usize>>
    {
        x.axis_iter(Axis(0)).map(|row| self.predict(row)).collect()
    }

    // The linfa models panic on a width mismatch instead of returning an error.
    fn check_input(&self, x: ArrayView1<f32>) -> Result<()>
    {
        let expected = self.feature_length();
        if x.len() != expected {
            return Err(Error::Shape { expected: vec![expected], actual: vec![x.len()] });
        }
        Ok(())
    }

    pub fn feature_length(&self) -> usize
    {
        self.as_classifier().feature_length()
    }

    pub fn num_classes(&self) -> usize
    {
        self.as_classifier().num_classes()
    }
}

/// Which algorithm to fit, with its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ModelSpec
{
    Svm(SvmParams),
    RandomForest(ForestParams),
    Knn(KnnParams),
}

impl ModelSpec
{
    pub fn fit(&self, dataset: &LabeledDataset) -> Result<TrainedModel>
    {
        if dataset.is_empty() {
            return Err(Error::EmptyDataset { role: DatasetRole::Training });
        }
        let x = dataset.features();
        let y = dataset.labels();
        let num_classes = dataset.classes().len();
        match self
        {
            ModelSpec::Svm(params) => Ok(TrainedModel::Svm(LinearSvm::fit(x, y, num_classes, params)?)),
            ModelSpec::RandomForest(params) => Ok(TrainedModel::RandomForest(RandomForest::fit(x, y, num_classes, params)?)),
            ModelSpec::Knn(params) => Ok(TrainedModel::Knn(KNearestNeighbors::fit(x, y, num_classes, params)?)),
        }
    }
}

/// A named entry in the trainer's candidate registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate
{
    pub name: String,
    pub spec: ModelSpec,
}

impl Candidate
{
    pub fn new(name: impl Into<String>, spec: ModelSpec) -> Self
    {
        Candidate { name: name.into(), spec }
    }
}

/// Hyperparameters for the default registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams
{
    pub svm: SvmParams,
    pub forest: ForestParams,
    pub knn: KnnParams,
}

/// The fixed registry, in declaration order: SVM, RandomForest, KNN.
/// Order matters: on equal accuracy the earlier candidate wins.
pub fn default_registry(params: &ClassifierParams) -> Vec<Candidate>
{
    vec![
        Candidate::new("SVM", ModelSpec::Svm(params.svm.clone())),
        Candidate::new("RandomForest", ModelSpec::RandomForest(params.forest.clone())),
        Candidate::new("KNN", ModelSpec::Knn(params.knn.clone())),
    ]
}

/// Index of the first maximum; ties go to the lower class index.
pub(crate) fn argmax(values: ArrayView1<f32>) -> usize
{
    let mut best = 0;
    for (i, &v) in values.iter().enumerate()
    {
        if v > values[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn check_fit_inputs(x: ArrayView2<f32>, y: &[usize], num_classes: usize) -> Result<()>
{
    if x.nrows() == 0 {
        return Err(Error::EmptyDataset { role: DatasetRole::Training });
    }
    if x.nrows() != y.len() {
        return Err(Error::Shape { expected: vec![y.len(), x.ncols()], actual: x.shape().to_vec() });
    }
    if num_classes < 2 {
        return Err(Error::InvalidConfig(format!("need at least 2 classes, got {}", num_classes)));
    }
    if let Some(&label) = y.iter().find(|&&label| label >= num_classes) {
        return Err(Error::UnknownClassIndex { index: label, num_classes });
    }
    Ok(())
}


#[cfg(test)]
mod tests
{
    use ndarray::array;

    use super::*;
    use crate::classes::ClassList;

    /// A model whose raw decision contradicts its own posteriors.
    struct Disagreeing;

    impl Classifier for Disagreeing
    {
        fn num_classes(&self) -> usize
        {
            2
        }

        fn feature_length(&self) -> usize
        {
            1
        }

        fn decide(&self, _x: ArrayView1<f32>) -> Result<usize>
        {
            Ok(1)
        }

        fn predict_proba(&self, _x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
        {
            Ok(Some(array![0.62f32, 0.38]))
        }
    }

    #[test]
    fn argmax_prefers_first_maximum()
    {
        assert_eq!(argmax(array![0.5f32, 0.5].view()), 0);
        assert_eq!(argmax(array![0.1f32, 0.7, 0.2].view()), 1);
    }

    #[test]
    fn label_follows_posteriors_over_raw_decision()
    {
        let (label, proba) = Disagreeing.predict_with_proba(array![0.0f32].view()).unwrap();
        assert_eq!(label, 0);
        assert_eq!(proba.unwrap()[label], 0.62);
        assert_eq!(Disagreeing.predict(array![0.0f32].view()).unwrap(), 0);
    }

    #[test]
    fn default_registry_order()
    {
        let names: Vec<String> = default_registry(&ClassifierParams::default()).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["SVM", "RandomForest", "KNN"]);
    }

    #[test]
    fn fitting_empty_dataset_fails()
    {
        let dataset = LabeledDataset::new(ndarray::Array2::zeros((0, 4)), vec![], ClassList::electric_vehicles()).unwrap();
        for candidate in default_registry(&ClassifierParams::default())
        {
            let result = candidate.spec.fit(&dataset);
            assert!(matches!(result, Err(Error::EmptyDataset { role: DatasetRole::Training })));
        }
    }

    #[test]
    fn every_default_candidate_separates_blobs()
    {
        let (x, y) = test_data::two_blobs(20, 6, 7);
        let dataset = LabeledDataset::new(x.clone(), y.clone(), ClassList::electric_vehicles()).unwrap();
        for candidate in default_registry(&ClassifierParams::default())
        {
            let model = candidate.spec.fit(&dataset).unwrap();
            assert_eq!(model.predict_batch(x.view()).unwrap(), y, "{} misclassified training blobs", candidate.name);
            assert_eq!(model.num_classes(), 2);
            assert_eq!(model.feature_length(), 6);
        }
    }

    #[test]
    fn predicted_label_is_the_most_probable_class()
    {
        let (x, y) = test_data::two_blobs(15, 2, 11);
        let dataset = LabeledDataset::new(x, y, ClassList::electric_vehicles()).unwrap();
        for candidate in default_registry(&ClassifierParams::default())
        {
            let model = candidate.spec.fit(&dataset).unwrap();
            // Walk the segment between the two blob centres, through the boundary.
            for step in 0..=60
            {
                let t = -3.0 + step as f32 * 0.1;
                let point = array![t, t];
                let (label, proba) = model.predict_with_proba(point.view()).unwrap();
                let proba = proba.unwrap();
                let best = proba.iter().cloned().fold(f32::MIN, f32::max);
                assert_eq!(proba[label], best, "{} at {}", candidate.name, t);
                assert_eq!(model.predict(point.view()).unwrap(), label);
            }
        }
    }

    #[test]
    fn wrong_feature_width_is_a_shape_error()
    {
        let (x, y) = test_data::two_blobs(5, 3, 1);
        let dataset = LabeledDataset::new(x, y, ClassList::electric_vehicles()).unwrap();
        for candidate in default_registry(&ClassifierParams::default())
        {
            let model = candidate.spec.fit(&dataset).unwrap();
            assert!(matches!(model.predict(array![1.0f32, 2.0].view()), Err(Error::Shape { .. })));
        }
    }

    #[test]
    fn trained_model_survives_bincode()
    {
        let (x, y) = test_data::two_blobs(5, 3, 1);
        let dataset = LabeledDataset::new(x.clone(), y, ClassList::electric_vehicles()).unwrap();
        let params = ClassifierParams { forest: ForestParams { n_trees: 5, ..Default::default() }, ..Default::default() };
        for candidate in default_registry(&params)
        {
            let model = candidate.spec.fit(&dataset).unwrap();
            let bytes = bincode::serialize(&model).unwrap();
            let restored: TrainedModel = bincode::deserialize(&bytes).unwrap();
            assert_eq!(restored.predict_batch(x.view()).unwrap(), model.predict_batch(x.view()).unwrap());
            assert_eq!(restored.predict_proba(x.row(0)).unwrap(), model.predict_proba(x.row(0)).unwrap());
        }
    }

    #[test]
    fn model_spec_json_is_tagged()
    {
        let spec: ModelSpec = serde_json::from_str(r#"{"algorithm": "knn", "k": 3}"#).unwrap();
        assert_eq!(spec, ModelSpec::Knn(KnnParams { k: 3 }));
    }
}
