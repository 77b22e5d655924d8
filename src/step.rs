use comms::ProcessGroup;
use machine_learning::{
    MlErr,
    arch::{Model, loss::LossFn},
    dataset::Batch,
    optimization::{LrScheduler, Optimizer},
};

use crate::{
    error::{Result, TrainErr},
    model_handle::ModelHandle,
};

/// What one optimization step reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// This process' loss on its batch, before the update.
    pub loss: f32,
    /// The learning rate the update used.
    pub lr: f64,
}

/// Runs single optimization steps over a model handle.
pub struct StepExecutor<L, O, S> {
    loss_fn: L,
    optimizer: O,
    scheduler: S,
}

impl<L, O, S> StepExecutor<L, O, S>
where
    L: LossFn,
    O: Optimizer,
    S: LrScheduler,
{
    pub fn new(loss_fn: L, optimizer: O, scheduler: S) -> Self {
        Self {
            loss_fn,
            optimizer,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Performs one step: clear the gradient, forward, loss, backward, synchronize the gradient
    /// with the group and update the parameters.
    ///
    /// Every process of the group must call this the same amount of times, the gradient
    /// synchronization blocks until all of them reach it.
    ///
    /// # Arguments
    /// * `handle` - The model being trained.
    /// * `batch` - This process' batch for the step.
    /// * `step` - The index of the step, which decides the learning rate.
    pub async fn step<M, G>(
        &mut self,
        handle: &mut ModelHandle<M, G>,
        batch: &Batch,
        step: usize,
    ) -> Result<StepOutcome>
    where
        M: Model,
        G: ProcessGroup,
    {
        let failed = |source: MlErr| TrainErr::Step { step, source };
        let lr = self.scheduler.lr(step);

        let net = handle.net_mut();
        net.zero_grad();

        let y_pred = net.forward(batch.x.view()).map_err(failed)?;
        let loss = self
            .loss_fn
            .loss(y_pred.view(), batch.y.view())
            .map_err(failed)?;

        if !loss.is_finite() {
            return Err(TrainErr::NonFinite { step, what: "loss" });
        }

        let d = self
            .loss_fn
            .loss_prime(y_pred.view(), batch.y.view())
            .map_err(failed)?;
        net.backward(d).map_err(failed)?;

        handle
            .sync_gradients()
            .await
            .map_err(|source| TrainErr::Sync {
                op: "gradient all-reduce",
                source,
            })?;

        let net = handle.net_mut();
        if !net.grad().iter().all(|g| g.is_finite()) {
            return Err(TrainErr::NonFinite {
                step,
                what: "gradient",
            });
        }

        self.optimizer.set_learning_rate(lr as f32);
        let (params, grad) = net.params_and_grad();
        self.optimizer.update_params(grad, params).map_err(failed)?;

        Ok(StepOutcome { loss, lr })
    }
}
