use linfa::dataset::{DatasetBase, Pr};
use linfa::traits::{Fit, Predict};
use linfa_svm::{Svm, SvmError};
use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::classifier::{argmax, check_fit_inputs, Classifier};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams
{
    /// Penalty on margin violations, the same for both sides of every machine.
    pub c: f64,
    /// Stopping tolerance of the SMO solver.
    pub eps: f64,
    /// Fit Platt sigmoids so the model can report class probabilities.
    pub probability: bool,
}

impl Default for SvmParams
{
    fn default() -> Self
    {
        SvmParams { c: 1.0, eps: 1e-3, probability: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Machine
{
    Calibrated(Svm<f64, Pr>),
    Uncalibrated(Svm<f64, bool>),
}

impl Machine
{
    fn fit(records: &Array2<f64>, positive: Array1<bool>, params: &SvmParams, calibrate: bool) -> Result<Self>
    {
        let dataset = DatasetBase::new(records.clone(), positive);
        let machine = if calibrate {
            let fitted: std::result::Result<Svm<f64, Pr>, SvmError> = Svm::<f64, Pr>::params()
                .pos_neg_weights(params.c, params.c)
                .eps(params.eps)
                .linear_kernel()
                .fit(&dataset);
            Machine::Calibrated(fitted?)
        } else {
            let fitted: std::result::Result<Svm<f64, bool>, SvmError> = Svm::<f64, bool>::params()
                .pos_neg_weights(params.c, params.c)
                .eps(params.eps)
                .linear_kernel()
                .fit(&dataset);
            Machine::Uncalibrated(fitted?)
        };
        Ok(machine)
    }

    /// Signed distance-like score; positive means the machine's positive class.
    fn decision(&self, x: &Array1<f64>) -> f64
    {
        match self
        {
            Machine::Calibrated(svm) => svm.weighted_sum(x) - svm.rho,
            Machine::Uncalibrated(svm) => svm.weighted_sum(x) - svm.rho,
        }
    }

    fn probability(&self, x: &Array1<f64>) -> Option<f32>
    {
        match self
        {
            Machine::Calibrated(svm) => {
                let p: Pr = svm.predict(x.view());
                Some(*p)
            },
            Machine::Uncalibrated(_) => None,
        }
    }
}

/// Linear-kernel SVM solved with SMO. Two classes use a single machine whose
/// positive side is class 1; more classes use one machine per class against the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm
{
    machines: Vec<Machine>,
    num_classes: usize,
    feature_length: usize,
}

impl LinearSvm
{
    pub fn fit(x: ArrayView2<f32>, y: &[usize], num_classes: usize, params: &SvmParams) -> Result<Self>
    {
        check_fit_inputs(x, y, num_classes)?;
        if let Some(index) = (0..num_classes).find(|class| !y.contains(class)) {
            return Err(Error::MissingClass { index });
        }

        let records = x.mapv(f64::from);
        let positives: Vec<usize> = if num_classes == 2 { vec![1] } else { (0..num_classes).collect() };
        let machines = match LinearSvm::fit_machines(&records, y, &positives, params, params.probability)
        {
            Err(Error::Svm(SvmError::Platt(e))) => {
                warn!("Platt calibration failed ({}); the SVM will not report probabilities", e);
                LinearSvm::fit_machines(&records, y, &positives, params, false)?
            },
            other => other?,
        };

        Ok(LinearSvm { machines, num_classes, feature_length: x.ncols() })
    }

    fn fit_machines(
        records: &Array2<f64>,
        y: &[usize],
        positives: &[usize],
        params: &SvmParams,
        calibrate: bool,
    ) -> Result<Vec<Machine>>
    {
        positives
            .iter()
            .map(|&class| {
                let positive: Array1<bool> = y.iter().map(|&label| label == class).collect();
                Machine::fit(records, positive, params, calibrate)
            })
            .collect()
    }

    pub fn is_calibrated(&self) -> bool
    {
        self.machines.iter().all(|m| matches!(m, Machine::Calibrated(_)))
    }

    pub fn decision_values(&self, x: ArrayView1<f32>) -> Array1<f64>
    {
        let x = x.mapv(f64::from);
        self.machines.iter().map(|m| m.decision(&x)).collect()
    }
}

impl Classifier for LinearSvm
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
        let decisions = self.decision_values(x);
        if self.machines.len() == 1 {
            return Ok(if decisions[0] >= 0.0 { 1 } else { 0 });
        }
        Ok(argmax(decisions.mapv(|d| d as f32).view()))
    }

    fn predict_proba(&self, x: ArrayView1<f32>) -> Result<Option<Array1<f32>>>
    {
        let x = x.mapv(f64::from);
        let Some(p) = self.machines.iter().map(|m| m.probability(&x)).collect::<Option<Vec<f32>>>() else {
            return Ok(None);
        };

        if p.len() == 1 {
            return Ok(Some(Array1::from(vec![1.0 - p[0], p[0]])));
        }
        let total: f32 = p.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Ok(None);
        }
        Ok(Some(Array1::from(p) / total))
    }
}
