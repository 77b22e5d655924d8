use ndarray::{Array2, ArrayView2};

use super::{CrossEntropy, LossFn};
use crate::{MlErr, Result};

/// Cross entropy with online hard example mining.
///
/// Only the hard samples are trained on: those whose loss exceeds `-ln(thresh)`, as long as
/// there are at least `min_kept` of them, otherwise the `min_kept` samples with the highest loss.
#[derive(Debug, Clone, Copy)]
pub struct OhemCrossEntropy {
    ce: CrossEntropy,
    thresh: f32,
    min_kept: usize,
}

impl OhemCrossEntropy {
    /// Creates a new `OhemCrossEntropy`.
    ///
    /// # Arguments
    /// * `thresh` - The probability below which a sample counts as hard, in `(0, 1]`.
    /// * `min_kept` - The least amount of samples to keep per batch.
    /// * `ignore_index` - The label of the samples to leave out.
    pub fn new(thresh: f32, min_kept: usize, ignore_index: usize) -> Result<Self> {
        if !(thresh > 0.0 && thresh <= 1.0) {
            return Err(MlErr::InvalidConfig(format!(
                "ohem threshold must be a probability in (0, 1], got {thresh}"
            )));
        }

        if min_kept == 0 {
            return Err(MlErr::InvalidConfig(
                "ohem must keep at least one sample".into(),
            ));
        }

        Ok(Self {
            ce: CrossEntropy::new(ignore_index),
            thresh: -thresh.ln(),
            min_kept,
        })
    }

    /// Computes the per sample losses and which ones are kept.
    fn select(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<(Vec<f32>, Vec<bool>)> {
        let per_sample = self.ce.per_sample(y_pred, y)?;
        let losses: Vec<f32> = per_sample.iter().map(|l| l.unwrap_or(0.0)).collect();

        let mut hardest: Vec<usize> = (0..per_sample.len())
            .filter(|&i| per_sample[i].is_some())
            .collect();
        hardest.sort_by(|&a, &b| losses[b].total_cmp(&losses[a]));

        let mut keep = vec![false; losses.len()];

        let chosen = match hardest.get(self.min_kept) {
            Some(&i) if losses[i] > self.thresh => {
                let n = hardest.partition_point(|&i| losses[i] > self.thresh);
                &hardest[..n]
            }
            Some(_) => &hardest[..self.min_kept],
            None => &hardest[..],
        };

        chosen.iter().for_each(|&i| keep[i] = true);
        Ok((losses, keep))
    }
}

impl LossFn for OhemCrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        let (losses, keep) = self.select(y_pred, y)?;
        let kept: Vec<f32> = losses
            .into_iter()
            .zip(keep)
            .filter_map(|(loss, keep)| keep.then_some(loss))
            .collect();

        if kept.is_empty() {
            return Ok(0.0);
        }

        Ok(kept.iter().sum::<f32>() / kept.len() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (_, keep) = self.select(y_pred, y)?;
        self.ce.masked_prime(y_pred, y, &keep)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    // Losses: ln 2 for the uniform rows, about 0 for the confident one, about 10 for the wrong one.
    fn batch() -> (Array2<f32>, Array2<f32>) {
        let y_pred = array![[0., 0.], [10., -10.], [0., 0.], [-10., 10.]];
        let y = array![[0.], [0.], [1.], [0.]];
        (y_pred, y)
    }

    #[test]
    fn keeps_every_hard_sample_when_there_are_enough() {
        let (y_pred, y) = batch();
        let ohem = OhemCrossEntropy::new(0.7, 1, 255).unwrap();

        let loss = ohem.loss(y_pred.view(), y.view()).unwrap();
        let expected = (2. * 2f32.ln() + 20.) / 3.;

        assert!((loss - expected).abs() < 1e-3);
    }

    #[test]
    fn falls_back_to_the_hardest_samples() {
        let (y_pred, y) = batch();
        let ohem = OhemCrossEntropy::new(0.7, 3, 255).unwrap();

        let d = ohem.loss_prime(y_pred.view(), y.view()).unwrap();

        assert_eq!(d.row(1), array![0., 0.]);
        assert!(d.row(3)[0] < 0.0);
    }

    #[test]
    fn keeps_the_top_min_kept_when_few_are_hard() {
        let y_pred = array![[0., 0.], [10., -10.], [5., -5.]];
        let y = array![[0.], [0.], [0.]];
        let ohem = OhemCrossEntropy::new(0.7, 1, 255).unwrap();

        let loss = ohem.loss(y_pred.view(), y.view()).unwrap();

        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        assert!(OhemCrossEntropy::new(0.0, 1, 255).is_err());
        assert!(OhemCrossEntropy::new(1.5, 1, 255).is_err());
    }
}
