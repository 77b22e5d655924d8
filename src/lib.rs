pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod handoff;
pub mod model_handle;
pub mod monitor;
pub mod step;
pub mod telemetry;

use std::{fs, path::PathBuf, sync::Arc};

use comms::ProcessGroup;
use log::warn;
use machine_learning::dataset::Dataset;

pub use config::TrainConfig;
pub use error::{Phase, Result, TrainErr};
pub use handoff::HandoffOutcome;
pub use telemetry::Telemetry;

/// What a finished run reports.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rank: usize,
    pub steps: usize,
    pub epoch: u64,
    /// Only present on the lead rank.
    pub handoff: Option<HandoffOutcome>,
}

/// Runs a whole training job from this process' point of view: bootstrap, the training loop and
/// the final handoff.
///
/// # Arguments
/// * `cfg` - The run's configuration.
/// * `local_rank` - The ordinal given by the launcher, negative if there was none.
pub async fn run(cfg: TrainConfig, local_rank: i64) -> Result<RunSummary> {
    cfg.validate()?;

    fs::create_dir_all(&cfg.result_dir).map_err(|e| TrainErr::Persist {
        path: cfg.result_dir.clone(),
        source: e.into(),
    })?;

    let (ctx, mut group) = bootstrap::establish(local_rank, &cfg).await?;

    let mut telemetry = Telemetry::new(ctx.rank(), ctx.is_lead());
    let log_path: PathBuf = cfg.log_path();
    if let Err(e) = telemetry.attach_log_file(&log_path) {
        warn!("could not open the run log at {}: {e}", log_path.display());
    }

    let dataset = match Dataset::load(cfg.train_path()) {
        Ok(dataset) => Arc::new(dataset),
        Err(e) => {
            let e = TrainErr::Data(e);
            group.abort(&e.to_string()).await;
            return Err(e);
        }
    };

    let trained = controller::train(&cfg, &ctx, group, dataset, &mut telemetry).await?;
    let (steps, epoch) = (trained.steps, trained.epoch);
    let handoff = controller::finish(&cfg, &ctx, trained, &mut telemetry).await?;

    Ok(RunSummary {
        rank: ctx.rank(),
        steps,
        epoch,
        handoff,
    })
}
