use std::{sync::Arc, time::Instant};

use comms::ProcessGroup;
use log::info;
use machine_learning::{
    MlErr,
    arch::{
        Model, Network, Sequential,
        activations::ActFn,
        layers::Layer,
        loss::{LossFn, OhemCrossEntropy},
    },
    dataset::{DataLoader, Dataset, DistributedSampler},
    eval::MeanIou,
    optimization::{LrScheduler, Optimizer, Sgd, WarmupPolyLr},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    bootstrap::DistributedContext,
    config::TrainConfig,
    error::{Result, TrainErr},
    feed::{EpochFeed, Fetch},
    handoff::{self, CheckpointMeta, HandoffOutcome},
    model_handle::ModelHandle,
    monitor::ProgressMonitor,
    step::StepExecutor,
    telemetry::Telemetry,
};

/// The state a finished loop hands over.
pub struct Trained<M: Model, G: ProcessGroup> {
    pub handle: ModelHandle<M, G>,
    /// Completed steps.
    pub steps: usize,
    /// The epoch the loop ended in.
    pub epoch: u64,
}

/// Drives the step sequence until the budget is spent.
pub struct TrainLoop<M: Model, G: ProcessGroup, L, O, S> {
    handle: ModelHandle<M, G>,
    feed: EpochFeed,
    executor: StepExecutor<L, O, S>,
    max_steps: usize,
    report_interval: usize,
    step: usize,
}

impl<M, G, L, O, S> TrainLoop<M, G, L, O, S>
where
    M: Model,
    G: ProcessGroup,
    L: LossFn,
    O: Optimizer,
    S: LrScheduler,
{
    pub fn new(
        handle: ModelHandle<M, G>,
        feed: EpochFeed,
        executor: StepExecutor<L, O, S>,
        max_steps: usize,
        report_interval: usize,
    ) -> Self {
        Self {
            handle,
            feed,
            executor,
            max_steps,
            report_interval,
            step: 0,
        }
    }

    /// Runs every step of the budget and waits for the rest of the group at the end.
    ///
    /// On failure the group is told to abort so no process keeps waiting on this one.
    pub async fn run(mut self, telemetry: &mut Telemetry) -> Result<Trained<M, G>> {
        if let Err(e) = self.drive(telemetry).await {
            self.handle.abort(&e.to_string()).await;
            return Err(e);
        }

        Ok(Trained {
            handle: self.handle,
            steps: self.step,
            epoch: self.feed.epoch(),
        })
    }

    async fn drive(&mut self, telemetry: &mut Telemetry) -> Result<()> {
        let mut monitor = ProgressMonitor::new(self.max_steps, self.report_interval, Instant::now());

        while self.step < self.max_steps {
            let batch = match self.feed.next() {
                Fetch::Batch(batch) => batch,
                Fetch::Exhausted => self.feed.rollover()?,
            };

            let outcome = self
                .executor
                .step(&mut self.handle, &batch, self.step)
                .await?;
            self.step += 1;

            if let Some(report) = monitor.record(outcome.loss, outcome.lr, Instant::now()) {
                telemetry.report(&report);
            }
        }

        self.handle
            .barrier()
            .await
            .map_err(|source| TrainErr::Sync {
                op: "end of training barrier",
                source,
            })
    }
}

/// The dense segmentation head trained by this binary, `crop_size -> hidden -> n_classes`.
pub fn build_model(cfg: &TrainConfig) -> Sequential {
    Sequential::new([
        Layer::dense((cfg.crop_size, cfg.hidden), Some(ActFn::relu())),
        Layer::dense((cfg.hidden, cfg.n_classes), None),
    ])
}

/// Checks that the dataset fits the model.
fn check_dataset(cfg: &TrainConfig, dataset: &Dataset) -> Result<()> {
    if dataset.x_size() != cfg.crop_size {
        return Err(TrainErr::Data(MlErr::SizeMismatch {
            what: "sample width",
            got: dataset.x_size(),
            expected: cfg.crop_size,
        }));
    }

    if dataset.y_size() != 1 {
        return Err(TrainErr::Data(MlErr::SizeMismatch {
            what: "label width",
            got: dataset.y_size(),
            expected: 1,
        }));
    }

    Ok(())
}

type Executor = StepExecutor<OhemCrossEntropy, Sgd, WarmupPolyLr>;

/// Builds everything a rank trains with that doesn't involve the group.
fn prepare(
    cfg: &TrainConfig,
    ctx: &DistributedContext,
    dataset: Arc<Dataset>,
) -> Result<(EpochFeed, Network<Sequential>, Executor)> {
    let config_err = |e: MlErr| TrainErr::Config(e.to_string());

    check_dataset(cfg, &dataset)?;
    let sampler = DistributedSampler::new(dataset.len(), ctx.rank(), ctx.world_size(), cfg.seed)
        .map_err(TrainErr::Data)?;
    let loader = DataLoader::new(dataset, sampler, cfg.batch_size()?, cfg.n_workers()?)
        .map_err(TrainErr::Data)?;
    let feed = EpochFeed::new(loader);

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let net = Network::init(build_model(cfg), &mut rng).map_err(config_err)?;

    let loss_fn = OhemCrossEntropy::new(cfg.ohem_thresh, cfg.min_kept(), cfg.ignore_index)
        .map_err(config_err)?;
    let scheduler = WarmupPolyLr::new(cfg.schedule).map_err(config_err)?;
    let optimizer = Sgd::new(
        net.size(),
        scheduler.lr(0) as f32,
        scheduler.momentum() as f32,
        scheduler.weight_decay() as f32,
    );

    Ok((feed, net, StepExecutor::new(loss_fn, optimizer, scheduler)))
}

/// Trains this rank's replica over an already formed group.
///
/// # Arguments
/// * `cfg` - The run's configuration.
/// * `ctx` - This process' place in the job.
/// * `group` - The group every rank of the job belongs to.
/// * `dataset` - The whole training set, partitioned here by rank.
/// * `telemetry` - The run's log sink.
pub async fn train<G: ProcessGroup>(
    cfg: &TrainConfig,
    ctx: &DistributedContext,
    mut group: G,
    dataset: Arc<Dataset>,
    telemetry: &mut Telemetry,
) -> Result<Trained<Sequential, G>> {
    let (feed, net, executor) = match prepare(cfg, ctx, dataset) {
        Ok(parts) => parts,
        Err(e) => {
            group.abort(&e.to_string()).await;
            return Err(e);
        }
    };

    let handle = if ctx.is_distributed() {
        ModelHandle::replicate(net, group)
            .await
            .map_err(|source| TrainErr::Sync {
                op: "parameter broadcast",
                source,
            })?
    } else {
        ModelHandle::bare(net)
    };

    info!(
        rank = ctx.rank(),
        params = handle.net().size(),
        max_steps = cfg.max_steps();
        "starting training"
    );

    let trained = TrainLoop::new(handle, feed, executor, cfg.max_steps(), cfg.report_interval)
        .run(telemetry)
        .await?;

    info!(rank = ctx.rank(), epoch = trained.epoch; "reached the step budget");
    Ok(trained)
}

/// Leaves the group and, on the lead rank, persists and evaluates the trained network.
///
/// # Returns
/// The handoff's outcome on the lead rank, `None` on the rest.
pub async fn finish<M: Model, G: ProcessGroup>(
    cfg: &TrainConfig,
    ctx: &DistributedContext,
    trained: Trained<M, G>,
    telemetry: &mut Telemetry,
) -> Result<Option<HandoffOutcome>> {
    let Trained { handle, steps, .. } = trained;
    let net = handle.into_inner().await;

    if !ctx.is_lead() {
        return Ok(None);
    }

    let meta = CheckpointMeta {
        steps,
        world_size: ctx.world_size(),
    };

    let val_path = cfg.val_path();
    let load_evaluator = || -> machine_learning::Result<MeanIou> {
        let dataset = Dataset::load(&val_path)?;
        Ok(MeanIou::new(
            Arc::new(dataset),
            cfg.n_classes,
            cfg.batch_size,
            cfg.ignore_index,
        ))
    };

    handoff::handoff(net, &cfg.checkpoint_path(), meta, load_evaluator, telemetry).map(Some)
}
