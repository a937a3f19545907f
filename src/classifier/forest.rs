use linfa::dataset::DatasetBase;
use linfa::traits::{Fit, Predict};
use linfa::ParamGuard;
use linfa_ensemble::{EnsembleLearner, EnsembleLearnerParams};
use linfa_trees::DecisionTree;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::classifier::{argmax, check_fit_inputs, Classifier};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams
{
    pub n_trees: usize,
    /// `None` grows each tree until its leaves are pure.
    pub max_depth: Option<usize>,
    /// Fewest examples a node needs before it may be split.
    pub min_weight_split: f32,
    /// Size of each tree's bootstrap sample (drawn with replacement) relative to the training set.
    pub bootstrap_proportion: f64,
    /// Share of the feature columns each tree sees.
    pub feature_proportion: f64,
    pub seed: u64,
}

impl Default for ForestParams
{
    fn default() -> Self
    {
        ForestParams {
            n_trees: 100,
            max_depth: None,
            min_weight_split: 2.0,
            bootstrap_proportion: 1.0,
            feature_proportion: 0.5,
            seed: 42,
        }
    }
}

/// Bagged Gini decision trees. Each tree only sees its own subset of feature
/// columns, so the column indices are stored next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest
{
    trees: Vec<DecisionTree<f32, usize>>,
    tree_features: Vec<Vec<usize>>,
    num_classes: usize,
    feature_length: usize,
}

impl RandomForest
{
    pub fn fit(x: ArrayView2<f32>, y: &[usize], num_classes: usize, params: &ForestParams) -> Result<Self>
    {
        check_fit_inputs(x, y, num_classes)?;

        let tree_params = DecisionTree::<f32, usize>::params()
            .max_depth(params.max_depth)
            .min_weight_split(params.min_weight_split);
        // The ensemble unwraps every tree fit, so bad tree parameters have to surface here.
        tree_params.check_ref()?;

        let dataset = DatasetBase::new(x.to_owned(), Array1::from(y.to_vec()));
        let fitted: std::result::Result<EnsembleLearner<DecisionTree<f32, usize>>, linfa::Error> =
            EnsembleLearnerParams::new_fixed_rng(tree_params, StdRng::seed_from_u64(params.seed))
                .ensemble_size(params.n_trees)
                .bootstrap_proportion(params.bootstrap_proportion)
                .feature_proportion(params.feature_proportion)
                .fit(&dataset);
        let EnsembleLearner { models, model_features } = fitted?;

        Ok(RandomForest { trees: models, tree_features: model_features, num_classes, feature_length: x.ncols() })
    }

    pub fn n_trees(&self) -> usize
    {
        self.trees.len()
    }

    /// Share of trees voting for each class. Counting the votes here rather than
    /// through the ensemble keeps ties resolved by class index.
    fn vote_fractions(&self, x: ArrayView1<f32>) -> Array1<f32>
    {
        let mut votes = Array1::<f32>::zeros(self.num_classes);
        for (tree, columns) in self.trees.iter().zip(&self.tree_features)
        {
            let row = x.select(Axis(0), columns).insert_axis(Axis(0));
            let predicted: Array1<usize> = tree.predict(&row);
            if let Some(&class) = predicted.get(0).filter(|&&class| class < self.num_classes) {
                votes[class] += 1.0;
            }
        }
        let total = votes.sum();
        if total > 0.0 { votes / total } else { votes }
    }
}

impl Classifier for RandomForest
{
    fn num_classes(&self) -> usize
    {
        self.num_classes
    }

    fn feature_length(&self) -> usize
    {
        self.feature_length
    }

    fn decide(&self, x: ArrayView1<f32>) -> Result<usize>
    {
        Ok(argmax(self.vote_fractions(x).view()))
    }

    fn predict_proba(&self, x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
    {
        Ok(Some(self.vote_fractions(x)))
    }
}
