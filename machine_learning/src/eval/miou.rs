use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis};

use super::Evaluator;
use crate::{
    MlErr, Result,
    arch::{Model, Network},
    dataset::Dataset,
};

/// Mean intersection over union of the predicted classes, averaged over the classes that appear
/// either in the labels or the predictions.
#[derive(Debug, Clone)]
pub struct MeanIou {
    dataset: Arc<Dataset>,
    n_classes: usize,
    batch_size: usize,
    ignore_index: usize,
}

impl MeanIou {
    /// Creates a new `MeanIou`.
    ///
    /// # Arguments
    /// * `dataset` - The held-out samples, labels being class indices in a single column.
    /// * `n_classes` - The amount of classes the network predicts.
    /// * `batch_size` - The amount of rows per forward pass.
    /// * `ignore_index` - The label of the samples to leave out.
    pub fn new(
        dataset: Arc<Dataset>,
        n_classes: usize,
        batch_size: usize,
        ignore_index: usize,
    ) -> Self {
        Self {
            dataset,
            n_classes,
            batch_size: batch_size.max(1),
            ignore_index,
        }
    }

    /// Adds a batch of predictions to the confusion matrix, rows being labels and columns
    /// predictions.
    fn accumulate(
        &self,
        confusion: &mut Array2<u64>,
        logits: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<()> {
        if logits.ncols() != self.n_classes {
            return Err(MlErr::SizeMismatch {
                what: "evaluated classes",
                got: logits.ncols(),
                expected: self.n_classes,
            });
        }

        for (row, &label) in logits.outer_iter().zip(y.column(0)) {
            if label < 0.0 || label.fract() != 0.0 || !label.is_finite() {
                return Err(MlErr::InvalidLabel {
                    label,
                    classes: self.n_classes,
                });
            }

            let label = label as usize;
            if label == self.ignore_index {
                continue;
            }

            if label >= self.n_classes {
                return Err(MlErr::InvalidLabel {
                    label: label as f32,
                    classes: self.n_classes,
                });
            }

            if row.iter().any(|z| !z.is_finite()) {
                return Err(MlErr::NonFinite { what: "logits" });
            }

            let pred = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &z)| {
                    if z > best.1 { (i, z) } else { best }
                })
                .0;

            confusion[[label, pred]] += 1;
        }

        Ok(())
    }
}

impl Evaluator for MeanIou {
    fn evaluate<M: Model>(&self, net: &mut Network<M>) -> Result<f32> {
        let n = self.n_classes;
        let mut confusion = Array2::<u64>::zeros((n, n));

        for start in (0..self.dataset.len()).step_by(self.batch_size) {
            let (x, y) = self.dataset.rows(start, self.batch_size)?;
            let logits = net.forward(x)?;
            self.accumulate(&mut confusion, logits.view(), y)?;
        }

        let labels = confusion.sum_axis(Axis(1));
        let preds = confusion.sum_axis(Axis(0));

        let ious: Vec<f32> = (0..n)
            .filter_map(|c| {
                let tp = confusion[[c, c]];
                let union = labels[c] + preds[c] - tp;
                (union > 0).then(|| tp as f32 / union as f32)
            })
            .collect();

        if ious.is_empty() {
            return Err(MlErr::EmptyDataset);
        }

        debug!(classes = ious.len(); "computed per class iou");
        Ok(ious.iter().sum::<f32>() / ious.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Sequential, layers::Layer};

    /// A network that passes its two inputs through as logits.
    fn identity() -> Network<Sequential> {
        let model = Sequential::new([Layer::dense((2, 2), None)]);
        Network::new(model, vec![1., 0., 0., 1., 0., 0.]).unwrap()
    }

    fn eval(x: Vec<f32>, y: Vec<f32>) -> Result<f32> {
        let ds = Dataset::new(x, 2, y, 1).unwrap();
        MeanIou::new(Arc::new(ds), 2, 3, 255).evaluate(&mut identity())
    }

    #[test]
    fn perfect_predictions_score_one() {
        let miou = eval(vec![1., 0., 0., 1., 1., 0.], vec![0., 1., 0.]).unwrap();
        assert_eq!(miou, 1.0);
    }

    #[test]
    fn averages_the_per_class_iou() {
        // labels 0, 0, 1, predictions 0, 1, 1: iou(0) = 1/2, iou(1) = 1/2
        let miou = eval(vec![1., 0., 0., 1., 0., 1.], vec![0., 0., 1.]).unwrap();
        assert_eq!(miou, 0.5);
    }

    #[test]
    fn ignored_labels_do_not_count() {
        let miou = eval(vec![1., 0., 0., 1.], vec![0., 255.]).unwrap();
        assert_eq!(miou, 1.0);
    }

    #[test]
    fn nothing_to_score_is_an_error() {
        let err = eval(vec![1., 0.], vec![255.]).unwrap_err();
        assert!(matches!(err, MlErr::EmptyDataset));
    }
}
