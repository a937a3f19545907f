use linfa_nn::{distance::L2Dist, CommonNearestNeighbour, NearestNeighbour};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::classifier::{argmax, check_fit_inputs, Classifier};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnParams
{
    pub k: usize,
}

impl Default for KnnParams
{
    fn default() -> Self
    {
        KnnParams { k: 5 }
    }
}

/// Uniform-vote k-nearest-neighbors over Euclidean distance.
/// The fitted model is the training set itself; a linear-search index is
/// built over it for each query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KNearestNeighbors
{
    k: usize,
    features: Array2<f32>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl KNearestNeighbors
{
    /// If there are fewer than `k` training examples, all of them vote.
    pub fn fit(x: ArrayView2<f32>, y: &[usize], num_classes: usize, params: &KnnParams) -> Result<Self>
    {
        check_fit_inputs(x, y, num_classes)?;
        if params.k == 0 {
            return Err(Error::InvalidConfig("KNN k must be at least 1".to_string()));
        }
        // Surfaces zero-width features now instead of on the first query.
        CommonNearestNeighbour::LinearSearch.from_batch(&x, L2Dist)?;
        Ok(KNearestNeighbors { k: params.k, features: x.to_owned(), labels: y.to_vec(), num_classes })
    }

    /// Indices of the nearest training examples, closest first.
    pub fn neighbors(&self, x: ArrayView1<f32>) -> Result<Vec<usize>>
    {
        let index = CommonNearestNeighbour::LinearSearch.from_batch(&self.features, L2Dist)?;
        let nearest = index.k_nearest(x, self.k)?;
        Ok(nearest.into_iter().map(|(_, i)| i).collect())
    }

    fn votes(&self, x: ArrayView1<f32>) -> Result<Array1<f32>>
    {
        let neighbors = self.neighbors(x)?;
        let mut votes = Array1::<f32>::zeros(self.num_classes);
        for &i in &neighbors
        {
            votes[self.labels[i]] += 1.0;
        }
        Ok(votes / neighbors.len().max(1) as f32)
    }
}

impl Classifier for KNearestNeighbors
{
    fn num_classes(&self) -> usize
    {
        self.num_classes
    }

    fn feature_length(&self) -> usize
    {
        self.features.ncols()
    }

    fn decide(&self, x: ArrayView1<f32>) -> Result<usize>
    {
        Ok(argmax(self.votes(x)?.view()))
    }

    fn predict_proba(&self, x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
    {
        Ok(Some(self.votes(x)?))
    }
}
