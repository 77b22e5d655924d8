use crate::Result;

pub trait Optimizer {
    /// Takes one step over `params` following `grad`.
    ///
    /// # Returns
    /// An error if the sizes don't match or the step produced non-finite parameters.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn set_learning_rate(&mut self, learning_rate: f32);

    fn learning_rate(&self) -> f32;
}
