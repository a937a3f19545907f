//! Scoring for fitted classifiers: accuracy for model selection, plus the
//! confusion matrix and per-class report used when evaluating a saved model.

use std::fmt;

use serde::Serialize;

use crate::classes::ClassList;

/// Fraction of exact label matches. Empty input scores 0.
pub fn accuracy(truth: &[usize], predicted: &[usize]) -> f32
{
    if truth.is_empty() {
        return 0.0;
    }
    let correct = truth.iter().zip(predicted.iter()).filter(|(t, p)| t == p).count();
    correct as f32 / truth.len() as f32
}

/// Rows are true classes, columns are predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix
{
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix
{
    pub fn new(truth: &[usize], predicted: &[usize], num_classes: usize) -> Self
    {
        let mut counts = vec![vec![0; num_classes]; num_classes];
        for (&t, &p) in truth.iter().zip(predicted.iter())
        {
            if t < num_classes && p < num_classes {
                counts[t][p] += 1;
            }
        }
        ConfusionMatrix { counts }
    }

    pub fn get(&self, truth: usize, predicted: usize) -> usize
    {
        self.counts[truth][predicted]
    }

    pub fn num_classes(&self) -> usize
    {
        self.counts.len()
    }

    pub fn total(&self) -> usize
    {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize
    {
        (0..self.num_classes()).map(|i| self.counts[i][i]).sum()
    }

    fn predicted_count(&self, class: usize) -> usize
    {
        self.counts.iter().map(|row| row[class]).sum()
    }

    fn support(&self, class: usize) -> usize
    {
        self.counts[class].iter().sum()
    }
}

impl fmt::Display for ConfusionMatrix
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for row in &self.counts
        {
            let cells: Vec<String> = row.iter().map(|c| format!("{:>5}", c)).collect();
            writeln!(f, "[{} ]", cells.join(""))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics
{
    pub class_name: String,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AveragedMetrics
{
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Per-class precision/recall/F1 with accuracy, macro and support-weighted averages.
/// Undefined ratios (no predictions or no support for a class) are reported as 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport
{
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f32,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub total_support: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f32
{
    if denominator == 0 { 0.0 } else { numerator as f32 / denominator as f32 }
}

impl ClassificationReport
{
    pub fn from_confusion(matrix: &ConfusionMatrix, class_names: &ClassList) -> Self
    {
        let classes: Vec<ClassMetrics> = (0..matrix.num_classes()).map(|i| {
            let true_positives = matrix.get(i, i);
            let precision = ratio(true_positives, matrix.predicted_count(i));
            let recall = ratio(true_positives, matrix.support(i));
            let f1 = if precision + recall > 0.0 { 2.0 * precision * recall / (precision + recall) } else { 0.0 };
            ClassMetrics {
                class_name: class_names.name(i).unwrap_or("?").to_string(),
                precision,
                recall,
                f1,
                support: matrix.support(i),
            }
        }).collect();

        let total_support = matrix.total();
        let n = classes.len().max(1) as f32;
        let macro_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f32>() / n,
            recall: classes.iter().map(|c| c.recall).sum::<f32>() / n,
            f1: classes.iter().map(|c| c.f1).sum::<f32>() / n,
        };
        let weight = |c: &ClassMetrics| ratio(c.support, total_support);
        let weighted_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision * weight(c)).sum(),
            recall: classes.iter().map(|c| c.recall * weight(c)).sum(),
            f1: classes.iter().map(|c| c.f1 * weight(c)).sum(),
        };

        ClassificationReport {
            classes,
            accuracy: ratio(matrix.correct(), total_support),
            macro_avg,
            weighted_avg,
            total_support,
        }
    }
}

impl fmt::Display for ClassificationReport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let width = self.classes.iter().map(|c| c.class_name.len()).max().unwrap_or(0).max(12);
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support", width = width)?;
        writeln!(f)?;
        for c in &self.classes
        {
            writeln!(f, "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}", c.class_name, c.precision, c.recall, c.f1, c.support, width = width)?;
        }
        writeln!(f)?;
        writeln!(f, "{:>width$} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, self.total_support, width = width)?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)]
        {
            writeln!(f, "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}", name, avg.precision, avg.recall, avg.f1, self.total_support, width = width)?;
        }
        Ok(())
    }
}
