use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::LossFn;
use crate::{MlErr, Result};

/// Softmax cross entropy over class logits, labels being class indices in a single column.
///
/// Samples labelled `ignore_index` contribute neither to the loss nor to the gradient.
#[derive(Debug, Clone, Copy)]
pub struct CrossEntropy {
    ignore_index: usize,
}

impl CrossEntropy {
    pub fn new(ignore_index: usize) -> Self {
        Self { ignore_index }
    }

    /// Computes the loss of every sample, `None` for the ignored ones.
    pub(super) fn per_sample(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<Vec<Option<f32>>> {
        let classes = check_dims(y_pred, y)?;

        y_pred
            .outer_iter()
            .zip(y.column(0))
            .map(|(logits, &label)| {
                let Some(class) = self.class(label, classes)? else {
                    return Ok(None);
                };

                let loss = log_sum_exp(logits) - logits[class];
                if !loss.is_finite() {
                    return Err(MlErr::NonFinite { what: "logits" });
                }

                Ok(Some(loss))
            })
            .collect()
    }

    /// Writes `(softmax(logits) - onehot(label)) / kept` on every kept row, zero elsewhere.
    pub(super) fn masked_prime(
        &self,
        y_pred: ArrayView2<f32>,
        y: ArrayView2<f32>,
        keep: &[bool],
    ) -> Result<Array2<f32>> {
        let classes = check_dims(y_pred, y)?;
        let kept = keep.iter().filter(|k| **k).count();
        let mut d = Array2::zeros(y_pred.dim());

        if kept == 0 {
            return Ok(d);
        }

        let scale = 1.0 / kept as f32;

        for ((mut row, logits), (&label, &keep)) in d
            .outer_iter_mut()
            .zip(y_pred.outer_iter())
            .zip(y.column(0).iter().zip(keep))
        {
            if !keep {
                continue;
            }

            let Some(class) = self.class(label, classes)? else {
                continue;
            };

            let lse = log_sum_exp(logits);
            row.zip_mut_with(&logits, |d, &z| *d = (z - lse).exp() * scale);
            row[class] -= scale;
        }

        Ok(d)
    }

    /// Resolves a label into a class index, `None` if the sample is ignored.
    fn class(&self, label: f32, classes: usize) -> Result<Option<usize>> {
        if label < 0.0 || label.fract() != 0.0 || !label.is_finite() {
            return Err(MlErr::InvalidLabel { label, classes });
        }

        let class = label as usize;

        if class == self.ignore_index {
            return Ok(None);
        }

        if class >= classes {
            return Err(MlErr::InvalidLabel { label, classes });
        }

        Ok(Some(class))
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<f32> {
        let losses: Vec<f32> = self.per_sample(y_pred, y)?.into_iter().flatten().collect();

        if losses.is_empty() {
            return Ok(0.0);
        }

        Ok(losses.iter().sum::<f32>() / losses.len() as f32)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<Array2<f32>> {
        let keep: Vec<bool> = self
            .per_sample(y_pred, y)?
            .iter()
            .map(Option::is_some)
            .collect();

        self.masked_prime(y_pred, y, &keep)
    }
}

fn log_sum_exp(logits: ArrayView1<f32>) -> f32 {
    let max = logits.fold(f32::NEG_INFINITY, |m, &z| m.max(z));
    max + logits.mapv(|z| (z - max).exp()).sum().ln()
}

/// Checks that there's one label per prediction row and returns the amount of classes.
fn check_dims(y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<usize> {
    if y.ncols() != 1 {
        return Err(MlErr::SizeMismatch {
            what: "label columns",
            got: y.ncols(),
            expected: 1,
        });
    }

    if y_pred.nrows() != y.nrows() {
        return Err(MlErr::SizeMismatch {
            what: "predictions and labels",
            got: y_pred.nrows(),
            expected: y.nrows(),
        });
    }

    Ok(y_pred.len_of(Axis(1)))
}
